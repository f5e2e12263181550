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

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ConfigurationSection;

/// What backend should be used when sending emails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MailTransportKind {
    /// Send emails through the configured SMTP server
    #[default]
    Smtp,

    /// Don't send emails anywhere, only log them
    Blackhole,
}

/// What to do when one of the emails of a personalized mailing fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Stop at the first failure and return its error. Recipients processed
    /// before the failure are not reported.
    #[default]
    FailFast,

    /// Try every recipient, then report which ones failed
    CollectAll,
}

/// Configuration related to sending emails.
///
/// Values are used verbatim: nothing is checked until an email is sent.
#[derive(Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MailConfig {
    /// Hostname of the SMTP server
    #[serde(default)]
    #[schemars(with = "crate::schema::Hostname")]
    pub host: String,

    /// Port of the SMTP server
    #[serde(default)]
    pub port: u16,

    /// Username used to authenticate, also used as the sender address
    #[serde(default)]
    pub username: String,

    /// Password used to authenticate
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Identity to act as once authenticated. Leave empty to act as the
    /// username
    #[serde(default)]
    pub identity: String,

    /// What backend should be used when sending emails
    #[serde(default)]
    pub transport: MailTransportKind,

    /// What to do when a personalized mailing partially fails
    #[serde(default)]
    pub delivery: DeliveryPolicy,
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("identity", &self.identity)
            .field("transport", &self.transport)
            .field("delivery", &self.delivery)
            .finish()
    }
}

impl ConfigurationSection for MailConfig {
    const ENV_PREFIX: Option<&'static str> = Some("MAIL_");
    const ENV_STRING_KEYS: &'static [&'static str] = &["host", "username", "password", "identity"];
}
