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

//! Send emails through a configured mail server

use std::{fmt, sync::Arc};

use mailroom_config::{DeliveryPolicy, MailConfig, MailTransportKind};
use thiserror::Error;

use crate::{
    auth::PlainAuth,
    message::compose,
    template::{self, TemplateError, Value},
    transport::{self, SendMail, Submission, Transport},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] transport::Error),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Partial(#[from] PartialDelivery),
}

/// A recipient of a personalized mailing which didn't get its email
#[derive(Debug)]
pub struct FailedDelivery {
    /// Address of the recipient
    pub recipient: String,

    /// Why the email could not be sent
    pub error: Error,
}

/// Outcome of a personalized mailing where some emails failed
#[derive(Debug, Default, Error)]
#[error(
    "{} out of {} personalized emails could not be sent",
    .failed.len(),
    .failed.len() + .delivered.len()
)]
pub struct PartialDelivery {
    /// Recipients which got their email, in order
    pub delivered: Vec<String>,

    /// Recipients which didn't, in order
    pub failed: Vec<FailedDelivery>,
}

/// Sends emails on behalf of a single account
#[derive(Clone)]
pub struct Client {
    host: String,
    port: u16,
    username: String,
    password: String,
    identity: String,
    delivery: DeliveryPolicy,
    transport: Arc<dyn SendMail>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("identity", &self.identity)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Constructs a new [`Client`] from the configuration, using the backend
    /// it selects
    #[must_use]
    pub fn new(config: &MailConfig) -> Self {
        let transport = match config.transport {
            MailTransportKind::Smtp => Transport::smtp(),
            MailTransportKind::Blackhole => Transport::blackhole(),
        };

        Self::with_transport(config, transport)
    }

    /// Constructs a new [`Client`] from the configuration, sending through
    /// the given transport
    #[must_use]
    pub fn with_transport(config: &MailConfig, transport: impl SendMail + 'static) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            identity: config.identity.clone(),
            delivery: config.delivery,
            transport: Arc::new(transport),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn delivery(&self) -> DeliveryPolicy {
        self.delivery
    }

    fn auth(&self) -> PlainAuth {
        PlainAuth::new(
            self.identity.as_str(),
            self.username.as_str(),
            self.password.as_str(),
            self.host.as_str(),
        )
    }

    fn submit(&self, to: &[String], message: &[u8]) -> Result<(), transport::Error> {
        let auth = self.auth();
        self.transport.send_mail(&Submission {
            host: &self.host,
            port: self.port,
            auth: Some(&auth),
            from: &self.username,
            to,
            message,
        })
    }

    /// Send an email to a single recipient
    ///
    /// # Errors
    ///
    /// Returns the error of the transport, as-is
    #[tracing::instrument(
        name = "email.send",
        skip_all,
        fields(
            email.to = %to,
            email.subject = %subject,
        ),
        err,
    )]
    pub fn send(
        &self,
        to: &str,
        message: &str,
        subject: &str,
        content_type: &str,
    ) -> Result<(), Error> {
        let payload = compose(&self.username, Some(to), subject, content_type, message);
        self.submit(&[to.to_owned()], &payload)?;
        Ok(())
    }

    /// Send the same email to many recipients at once. Recipients only
    /// appear in the envelope, so they don't see each other.
    ///
    /// # Errors
    ///
    /// Returns the error of the transport, as-is. There is no way to tell
    /// which recipients were accepted.
    #[tracing::instrument(
        name = "email.mailing",
        skip_all,
        fields(
            email.recipients = recipients.len(),
            email.subject = %subject,
        ),
        err,
    )]
    pub fn mailing<R: AsRef<str>>(
        &self,
        recipients: &[R],
        message: &str,
        subject: &str,
        content_type: &str,
    ) -> Result<(), Error> {
        let to: Vec<String> = recipients
            .iter()
            .map(|recipient| recipient.as_ref().to_owned())
            .collect();
        let payload = compose(&self.username, None, subject, content_type, message);
        self.submit(&to, &payload)?;
        Ok(())
    }

    /// Send each recipient its own email, rendered from `template` with its
    /// values. Recipients are processed in order, one connection each.
    ///
    /// See [`crate::template`] for the template syntax.
    ///
    /// # Errors
    ///
    /// With [`DeliveryPolicy::FailFast`], returns the first rendering or
    /// transport error and leaves the remaining recipients untouched. Earlier
    /// recipients got their email, but this isn't reported.
    ///
    /// With [`DeliveryPolicy::CollectAll`], tries every recipient and returns
    /// [`Error::Partial`] if any of them failed.
    #[tracing::instrument(
        name = "email.personal_mailing",
        skip_all,
        fields(
            email.subject = %subject,
            email.delivery = ?self.delivery,
        ),
        err,
    )]
    pub fn personal_mailing<I, R, V>(
        &self,
        values: I,
        template: &str,
        subject: &str,
        content_type: &str,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = (R, V)>,
        R: AsRef<str>,
        V: AsRef<[Value]>,
    {
        let mut report = PartialDelivery::default();

        for (recipient, values) in values {
            let recipient = recipient.as_ref();
            let result = template::render(template, values.as_ref())
                .map_err(Error::from)
                .and_then(|message| self.send(recipient, &message, subject, content_type));

            match (result, self.delivery) {
                (Ok(()), _) => report.delivered.push(recipient.to_owned()),
                (Err(error), DeliveryPolicy::FailFast) => return Err(error),
                (Err(error), DeliveryPolicy::CollectAll) => {
                    tracing::warn!(
                        email.to = recipient,
                        %error,
                        "Failed to send personalized email"
                    );
                    report.failed.push(FailedDelivery {
                        recipient: recipient.to_owned(),
                        error,
                    });
                }
            }
        }

        if report.failed.is_empty() {
            Ok(())
        } else {
            Err(report.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        io,
        sync::{Arc, Mutex},
        thread,
    };

    use super::*;

    /// What the transport was asked to do
    #[derive(Debug, Clone)]
    struct Recorded {
        host: String,
        port: u16,
        auth: Option<PlainAuth>,
        from: String,
        to: Vec<String>,
        message: String,
    }

    /// A transport which records every submission and refuses the ones
    /// addressed to the configured recipients
    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<Recorded>>,
        refused: Vec<String>,
    }

    impl RecordingTransport {
        fn refusing(recipients: &[&str]) -> Self {
            Self {
                refused: recipients.iter().map(|r| (*r).to_owned()).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Recorded> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SendMail for RecordingTransport {
        fn send_mail(&self, submission: &Submission<'_>) -> Result<(), transport::Error> {
            self.calls.lock().unwrap().push(Recorded {
                host: submission.host.to_owned(),
                port: submission.port,
                auth: submission.auth.cloned(),
                from: submission.from.to_owned(),
                to: submission.to.to_vec(),
                message: String::from_utf8(submission.message.to_vec()).unwrap(),
            });

            if let Some(to) = submission.to.iter().find(|to| self.refused.contains(to)) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("recipient {to} refused"),
                )
                .into());
            }

            Ok(())
        }
    }

    fn config() -> MailConfig {
        MailConfig {
            host: "smtp.example.com".to_owned(),
            port: 587,
            username: "noreply@example.com".to_owned(),
            password: "hunter2".to_owned(),
            identity: "billing@example.com".to_owned(),
            ..MailConfig::default()
        }
    }

    fn client(config: &MailConfig, transport: &Arc<RecordingTransport>) -> Client {
        Client::with_transport(config, Arc::clone(transport))
    }

    fn balances() -> Vec<(&'static str, Vec<Value>)> {
        vec![
            ("a@x.com", vec![Value::from("Alice"), Value::from(10)]),
            ("b@x.com", vec![Value::from("Bob"), Value::from(20)]),
            ("c@x.com", vec![Value::from("Carol"), Value::from(30)]),
        ]
    }

    fn is_refused(error: &Error) -> bool {
        matches!(
            error,
            Error::Transport(transport::Error::Io(e))
                if e.kind() == io::ErrorKind::ConnectionRefused
        )
    }

    #[test]
    fn new_copies_configuration_verbatim() {
        let config = MailConfig {
            host: " smtp.example.com ".to_owned(),
            port: 0,
            username: "".to_owned(),
            password: " secret ".to_owned(),
            identity: "ops".to_owned(),
            ..MailConfig::default()
        };
        let client = Client::new(&config);

        assert_eq!(client.host, " smtp.example.com ");
        assert_eq!(client.port, 0);
        assert_eq!(client.username, "");
        assert_eq!(client.password, " secret ");
        assert_eq!(client.identity, "ops");
        assert_eq!(client.delivery, DeliveryPolicy::FailFast);
        assert!(!format!("{client:?}").contains("secret"));
    }

    #[test]
    fn send_to_single_recipient() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(&config(), &transport);

        client
            .send("alice@example.com", "Hello Alice", "Welcome", "text/plain")
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.host, "smtp.example.com");
        assert_eq!(call.port, 587);
        assert_eq!(call.from, "noreply@example.com");
        assert_eq!(call.to, ["alice@example.com"]);
        assert_eq!(
            call.auth,
            Some(PlainAuth::new(
                "billing@example.com",
                "noreply@example.com",
                "hunter2",
                "smtp.example.com"
            ))
        );
        assert_eq!(call.message.matches("\r\nTo: ").count(), 1);
        assert!(call.message.contains("\r\nTo: alice@example.com\r\n"));
        assert!(call.message.contains("\r\nSubject: Welcome\r\n"));
        assert!(call.message.contains("\r\nContent-Type: text/plain\r\n"));
        assert!(call.message.ends_with("\r\n\r\nHello Alice\r\n"));
    }

    #[test]
    fn send_returns_transport_error_unmodified() {
        let transport = Arc::new(RecordingTransport::refusing(&["alice@example.com"]));
        let client = client(&config(), &transport);

        let err = client
            .send("alice@example.com", "Hello", "Welcome", "text/plain")
            .unwrap_err();
        assert!(is_refused(&err));
        assert_eq!(err.to_string(), "recipient alice@example.com refused");
    }

    #[test]
    fn mailing_hides_recipients() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(&config(), &transport);

        client
            .mailing(&["a@x.com", "b@x.com"], "News", "Newsletter", "text/html")
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to, ["a@x.com", "b@x.com"]);
        assert!(!calls[0].message.contains("To:"));
        assert!(calls[0].message.contains("\r\nSubject: Newsletter\r\n"));
        assert!(calls[0].message.contains("\r\nContent-Type: text/html\r\n"));
    }

    #[test]
    fn mailing_fails_as_a_whole() {
        let transport = Arc::new(RecordingTransport::refusing(&["b@x.com"]));
        let client = client(&config(), &transport);

        let recipients = vec!["a@x.com".to_owned(), "b@x.com".to_owned()];
        let err = client
            .mailing(&recipients, "News", "Newsletter", "text/plain")
            .unwrap_err();
        assert!(is_refused(&err));
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn personal_mailing_sends_one_email_per_recipient() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(&config(), &transport);

        client
            .personal_mailing(balances(), "Hello %s, balance %d", "Balance", "text/plain")
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].to, ["a@x.com"]);
        assert!(calls[0].message.ends_with("\r\n\r\nHello Alice, balance 10\r\n"));
        assert_eq!(calls[1].to, ["b@x.com"]);
        assert!(calls[1].message.ends_with("\r\n\r\nHello Bob, balance 20\r\n"));
        assert_eq!(calls[2].to, ["c@x.com"]);
        assert!(calls[2].message.ends_with("\r\n\r\nHello Carol, balance 30\r\n"));
    }

    #[test]
    fn personal_mailing_accepts_maps() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(&config(), &transport);

        let values: BTreeMap<String, Vec<Value>> = BTreeMap::from([
            ("b@x.com".to_owned(), vec![Value::from("Bob")]),
            ("a@x.com".to_owned(), vec![Value::from("Alice")]),
        ]);
        client
            .personal_mailing(&values, "Hi %s", "Hi", "text/plain")
            .unwrap();

        let recipients: Vec<_> = transport
            .calls()
            .into_iter()
            .flat_map(|call| call.to)
            .collect();
        assert_eq!(recipients, ["a@x.com", "b@x.com"]);
    }

    #[test]
    fn personal_mailing_fails_fast() {
        let transport = Arc::new(RecordingTransport::refusing(&["b@x.com"]));
        let client = client(&config(), &transport);

        let err = client
            .personal_mailing(balances(), "Hello %s, balance %d", "Balance", "text/plain")
            .unwrap_err();
        assert!(is_refused(&err));

        // c@x.com is never attempted
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].to, ["b@x.com"]);
    }

    #[test]
    fn personal_mailing_fails_fast_on_template_mismatch() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(&config(), &transport);

        let values = vec![
            ("a@x.com", vec![Value::from("Alice"), Value::from(10)]),
            ("b@x.com", vec![Value::from("Bob")]),
            ("c@x.com", vec![Value::from("Carol"), Value::from(30)]),
        ];
        let err = client
            .personal_mailing(values, "Hello %s, balance %d", "Balance", "text/plain")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Template(TemplateError::MissingValue { index: 1 })
        ));
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn personal_mailing_collects_all_failures() {
        let config = MailConfig {
            delivery: DeliveryPolicy::CollectAll,
            ..config()
        };
        let transport = Arc::new(RecordingTransport::refusing(&["b@x.com"]));
        let client = client(&config, &transport);

        let mut values = balances();
        values.push(("d@x.com", vec![Value::from("Dan")]));

        let err = client
            .personal_mailing(values, "Hello %s, balance %d", "Balance", "text/plain")
            .unwrap_err();

        // Every recipient with a well-formed body was attempted
        assert_eq!(transport.calls().len(), 3);

        let report = match err {
            Error::Partial(report) => report,
            err => panic!("expected a partial delivery, got {err:?}"),
        };
        assert_eq!(report.delivered, ["a@x.com", "c@x.com"]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].recipient, "b@x.com");
        assert!(is_refused(&report.failed[0].error));
        assert_eq!(report.failed[1].recipient, "d@x.com");
        assert!(matches!(
            report.failed[1].error,
            Error::Template(TemplateError::MissingValue { index: 1 })
        ));
        assert_eq!(
            report.to_string(),
            "2 out of 4 personalized emails could not be sent"
        );
    }

    #[test]
    fn personal_mailing_collect_all_without_failures() {
        let config = MailConfig {
            delivery: DeliveryPolicy::CollectAll,
            ..config()
        };
        let transport = Arc::new(RecordingTransport::default());
        let client = client(&config, &transport);

        client
            .personal_mailing(balances(), "Hello %s, balance %d", "Balance", "text/plain")
            .unwrap();
        assert_eq!(transport.calls().len(), 3);
    }

    #[test]
    fn blackhole_client_sends_nothing() {
        let config = MailConfig {
            transport: MailTransportKind::Blackhole,
            ..config()
        };
        let client = Client::new(&config);

        client
            .send("alice@example.com", "Hello", "Welcome", "text/plain")
            .unwrap();
        client
            .mailing(&["a@x.com", "b@x.com"], "News", "Newsletter", "text/plain")
            .unwrap();
    }

    #[test]
    fn concurrent_sends_are_independent() {
        let transport = Arc::new(RecordingTransport::default());
        let client = client(&config(), &transport);

        let recipients: Vec<String> = (0..8).map(|i| format!("user{i}@example.com")).collect();
        thread::scope(|scope| {
            for recipient in &recipients {
                let client = client.clone();
                scope.spawn(move || {
                    client
                        .send(recipient, &format!("Hello {recipient}"), "Hi", "text/plain")
                        .unwrap();
                });
            }
        });

        let mut calls = transport.calls();
        assert_eq!(calls.len(), recipients.len());
        calls.sort_by(|a, b| a.to.cmp(&b.to));
        for (call, recipient) in calls.iter().zip(&recipients) {
            assert_eq!(call.to, [recipient.as_str()]);
            assert!(call.message.contains(&format!("\r\nTo: {recipient}\r\n")));
            assert!(call.message.ends_with(&format!("\r\n\r\nHello {recipient}\r\n")));
        }
    }
}
