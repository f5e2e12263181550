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

//! SASL PLAIN credentials

use std::fmt;

use base64ct::{Base64, Encoding};
use thiserror::Error;

/// Hosts on which credentials may be sent over an unencrypted connection
const LOCALHOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Reasons why credentials were not handed over to the server
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The connection is not encrypted and the server is not local
    #[error("refusing to send credentials over an unencrypted connection")]
    Unencrypted,

    /// The credentials were built for another server
    #[error("credentials were not issued for this server")]
    WrongHost,
}

/// Credentials for the SASL `PLAIN` mechanism (RFC 4616)
#[derive(Clone, PartialEq, Eq)]
pub struct PlainAuth {
    identity: String,
    username: String,
    password: String,
    host: String,
}

impl PlainAuth {
    /// Credentials for `username`, acting as `identity` on `host`. An empty
    /// identity means acting as `username`.
    #[must_use]
    pub fn new(
        identity: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            username: username.into(),
            password: password.into(),
            host: host.into(),
        }
    }

    /// The authorization identity
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The authentication identity
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The server these credentials are meant for
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Compute the base64-encoded initial response sent along `AUTH PLAIN`
    /// to `server`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not encrypted while the server is
    /// not on the local machine, or if `server` is not the host these
    /// credentials were built for.
    pub fn initial_response(&self, server: &str, encrypted: bool) -> Result<String, AuthError> {
        if !encrypted && !LOCALHOSTS.contains(&server) {
            return Err(AuthError::Unencrypted);
        }

        if server != self.host {
            return Err(AuthError::WrongHost);
        }

        let mut message = Vec::with_capacity(
            self.identity.len() + self.username.len() + self.password.len() + 2,
        );
        message.extend_from_slice(self.identity.as_bytes());
        message.push(0);
        message.extend_from_slice(self.username.as_bytes());
        message.push(0);
        message.extend_from_slice(self.password.as_bytes());

        Ok(Base64::encode_string(&message))
    }
}

impl fmt::Debug for PlainAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainAuth")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
