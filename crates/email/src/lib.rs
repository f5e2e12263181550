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

#![forbid(unsafe_code)]
#![deny(clippy::all, rustdoc::broken_intra_doc_links)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Send emails over SMTP: to a single recipient, to a list of hidden
//! recipients, or personalized from a template for each recipient.
//!
//! ```no_run
//! use mailroom_config::MailConfig;
//! use mailroom_email::{Client, Value};
//!
//! # fn main() -> Result<(), mailroom_email::Error> {
//! let config = MailConfig {
//!     host: "smtp.example.com".to_owned(),
//!     port: 587,
//!     username: "noreply@example.com".to_owned(),
//!     password: "hunter2".to_owned(),
//!     ..MailConfig::default()
//! };
//! let client = Client::new(&config);
//!
//! client.send("alice@example.com", "Hello!", "Welcome", "text/plain")?;
//!
//! client.personal_mailing(
//!     [("alice@example.com", vec![Value::from("Alice"), Value::from(10)])],
//!     "Hello %s, your balance is %d",
//!     "Balance",
//!     "text/plain",
//! )?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
pub mod message;
pub mod template;
pub mod transport;

pub use mailroom_config::DeliveryPolicy;

pub use self::{
    auth::{AuthError, PlainAuth},
    client::{Client, Error, FailedDelivery, PartialDelivery},
    template::{TemplateError, Value},
    transport::{SendMail, Submission, Transport},
};
