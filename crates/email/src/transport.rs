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

//! Email transport backends

use std::sync::Arc;

use lettre::{
    address::{AddressError, Envelope},
    transport::smtp::{
        authentication::Mechanism,
        client::{SmtpConnection, TlsParameters},
        extension::ClientId,
    },
    Address,
};
use thiserror::Error;

use crate::auth::{AuthError, PlainAuth};

/// Mechanisms lettre recognizes in the `AUTH` EHLO keyword
const KNOWN_MECHANISMS: [Mechanism; 3] = [Mechanism::Plain, Mechanism::Login, Mechanism::Xoauth2];

/// Everything needed to submit one message: where to connect, how to
/// authenticate, the envelope and the raw payload
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    /// Hostname of the SMTP server
    pub host: &'a str,

    /// Port of the SMTP server
    pub port: u16,

    /// Credentials, if the server requires authentication
    pub auth: Option<&'a PlainAuth>,

    /// Envelope sender
    pub from: &'a str,

    /// Envelope recipients
    pub to: &'a [String],

    /// Raw message, headers included
    pub message: &'a [u8],
}

/// Something able to submit a message to a mail server in one go
pub trait SendMail: Send + Sync {
    /// Submit a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be handed over, for any
    /// reason.
    fn send_mail(&self, submission: &Submission<'_>) -> Result<(), Error>;
}

impl<T: SendMail + ?Sized> SendMail for Arc<T> {
    fn send_mail(&self, submission: &Submission<'_>) -> Result<(), Error> {
        self.as_ref().send_mail(submission)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Envelope(#[from] lettre::error::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("the server does not support AUTH")]
    AuthUnsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A wrapper around the supported backends
#[derive(Default, Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

#[derive(Default)]
enum TransportInner {
    #[default]
    Blackhole,
    Smtp {
        hello_name: ClientId,
    },
}

impl Transport {
    fn new(inner: TransportInner) -> Self {
        let inner = Arc::new(inner);
        Self { inner }
    }

    /// Construct a blackhole transport
    #[must_use]
    pub fn blackhole() -> Self {
        Self::new(TransportInner::Blackhole)
    }

    /// Construct a SMTP transport. Every message opens its own connection,
    /// which is upgraded with STARTTLS when the server offers it.
    #[must_use]
    pub fn smtp() -> Self {
        Self::new(TransportInner::Smtp {
            hello_name: ClientId::Domain("localhost".to_owned()),
        })
    }
}

/// Everything that happens on an open connection before `QUIT`
fn deliver(
    connection: &mut SmtpConnection,
    hello_name: &ClientId,
    submission: &Submission<'_>,
    envelope: &Envelope,
) -> Result<(), Error> {
    if connection.can_starttls() {
        tracing::debug!("Upgrading the connection with STARTTLS");
        let tls_parameters = TlsParameters::new(submission.host.to_owned())?;
        connection.starttls(&tls_parameters, hello_name)?;
    }

    if let Some(auth) = submission.auth {
        // PLAIN is tried as long as the server advertises AUTH at all, its
        // reply tells whether the mechanism is accepted
        let server_info = connection.server_info();
        if !KNOWN_MECHANISMS
            .into_iter()
            .any(|mechanism| server_info.supports_auth_mechanism(mechanism))
        {
            return Err(Error::AuthUnsupported);
        }

        let response = auth.initial_response(submission.host, connection.is_encrypted())?;
        connection.command(format!("AUTH PLAIN {response}\r\n"))?;
        tracing::debug!(auth.username = auth.username(), "Authenticated");
    }

    connection.send(envelope, submission.message)?;
    Ok(())
}

fn send_smtp(hello_name: &ClientId, submission: &Submission<'_>) -> Result<(), Error> {
    let from: Address = submission.from.parse()?;
    let to = submission
        .to
        .iter()
        .map(|to| to.parse())
        .collect::<Result<Vec<Address>, _>>()?;
    let envelope = Envelope::new(Some(from), to)?;

    tracing::debug!(
        smtp.host = submission.host,
        smtp.port = submission.port,
        "Connecting to the SMTP server"
    );
    let mut connection = SmtpConnection::connect(
        (submission.host, submission.port),
        None,
        hello_name,
        None,
        None,
    )?;

    match deliver(&mut connection, hello_name, submission, &envelope) {
        Ok(()) => {
            connection.quit()?;
            Ok(())
        }
        Err(e) => {
            connection.abort();
            Err(e)
        }
    }
}

impl SendMail for Transport {
    fn send_mail(&self, submission: &Submission<'_>) -> Result<(), Error> {
        match self.inner.as_ref() {
            TransportInner::Blackhole => {
                tracing::warn!(
                    email.from = submission.from,
                    email.recipients = submission.to.len(),
                    "An email was supposed to be sent but no email backend is configured"
                );
            }
            TransportInner::Smtp { hello_name } => {
                send_smtp(hello_name, submission)?;
            }
        };

        Ok(())
    }
}
