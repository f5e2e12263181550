// Copyright 2024 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Raw message payloads

/// Append `text` to `out`, turning every bare `\n` into `\r\n`
fn push_crlf(out: &mut Vec<u8>, text: &str) {
    let mut previous = None;
    for &byte in text.as_bytes() {
        if byte == b'\n' && previous != Some(b'\r') {
            out.push(b'\r');
        }
        out.push(byte);
        previous = Some(byte);
    }
}

/// Build the payload handed to the transport.
///
/// Headers are written in order `From`, `To` (only if `to` is set), `Subject`
/// and `Content-Type`, followed by an empty line and the body. Header values
/// are copied verbatim, without any encoding. Line endings in the body are
/// normalized to `\r\n`.
#[must_use]
pub fn compose(
    from: &str,
    to: Option<&str>,
    subject: &str,
    content_type: &str,
    body: &str,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        from.len() + to.map_or(0, str::len) + subject.len() + content_type.len() + body.len() + 48,
    );

    out.extend_from_slice(b"From: ");
    out.extend_from_slice(from.as_bytes());
    out.extend_from_slice(b"\r\n");

    if let Some(to) = to {
        out.extend_from_slice(b"To: ");
        out.extend_from_slice(to.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"Subject: ");
    out.extend_from_slice(subject.as_bytes());
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(b"Content-Type: ");
    out.extend_from_slice(content_type.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");

    push_crlf(&mut out, body);
    out.extend_from_slice(b"\r\n");

    out
}
