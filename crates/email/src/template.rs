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

//! Positional `printf`-style templates used by personalized mailings
//!
//! Placeholders are consumed left to right, one value each:
//!
//! - `%s`: a string
//! - `%v`: any value
//! - `%d`: an integer
//! - `%f`: a number, with six decimals by default (`%.2f` for two)
//! - `%t`: a boolean
//! - `%q`: a string, quoted and escaped
//! - `%%`: a literal `%`, consumes no value
//!
//! This is a strict subset of `printf`: there are no widths, flags, argument
//! indexes or other verbs, so `%5d` or `%x` are rejected with
//! [`TemplateError::UnknownVerb`]. Precision is capped at
//! [`MAX_PRECISION`].

use std::{fmt, iter::Peekable, str::Chars};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_PRECISION: usize = 6;

/// Largest precision accepted after a `.`
pub const MAX_PRECISION: usize = 1024;

/// A value substituted into a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A boolean
    Bool(bool),
    /// A signed integer
    Integer(i64),
    /// A floating point number
    Float(f64),
    /// A string
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => b.fmt(f),
            Self::Integer(n) => n.fmt(f),
            Self::Float(x) => x.fmt(f),
            Self::String(s) => s.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Mismatches between a template and its values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template has more placeholders than there are values
    #[error("no value for placeholder #{index}")]
    MissingValue {
        /// Index of the first placeholder without a value
        index: usize,
    },

    /// There are more values than placeholders in the template
    #[error("template uses {expected} values but {got} were given")]
    ExtraValues {
        /// Number of placeholders in the template
        expected: usize,
        /// Number of values given
        got: usize,
    },

    /// A value can't be formatted with the verb of its placeholder
    #[error("value #{index} can't be formatted with %{verb}")]
    BadValue {
        /// Index of the value
        index: usize,
        /// Verb of the placeholder
        verb: char,
    },

    /// The template uses an unsupported verb
    #[error("unknown verb %{verb}")]
    UnknownVerb {
        /// The unsupported verb
        verb: char,
    },

    /// A placeholder asks for more than [`MAX_PRECISION`] digits or
    /// characters
    #[error("precision {precision} is larger than {max}", max = MAX_PRECISION)]
    PrecisionTooLarge {
        /// The requested precision, saturated
        precision: usize,
    },

    /// The template ends in the middle of a placeholder
    #[error("template ends with an incomplete placeholder")]
    DanglingPercent,
}

/// Parse the optional `.N` precision following a `%`
fn precision(chars: &mut Peekable<Chars<'_>>) -> Option<usize> {
    chars.next_if_eq(&'.')?;

    let mut precision = 0_usize;
    while let Some(digit) = chars.next_if(char::is_ascii_digit) {
        let digit = digit
            .to_digit(10)
            .and_then(|d| usize::try_from(d).ok())
            .unwrap_or_default();
        precision = precision.saturating_mul(10).saturating_add(digit);
    }

    Some(precision)
}

#[allow(clippy::cast_precision_loss)]
fn format_value(
    out: &mut String,
    index: usize,
    verb: char,
    precision: Option<usize>,
    value: &Value,
) -> Result<(), TemplateError> {
    match (verb, value) {
        ('s', Value::String(s)) => match precision {
            Some(precision) => out.extend(s.chars().take(precision)),
            None => out.push_str(s),
        },
        ('q', Value::String(s)) => out.push_str(&format!("{s:?}")),
        ('d', Value::Integer(n)) => out.push_str(&n.to_string()),
        ('f', Value::Float(x)) => {
            out.push_str(&format!("{x:.*}", precision.unwrap_or(DEFAULT_PRECISION)));
        }
        ('f', Value::Integer(n)) => {
            let x = *n as f64;
            out.push_str(&format!("{x:.*}", precision.unwrap_or(DEFAULT_PRECISION)));
        }
        ('t', Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
        ('v', value) => out.push_str(&value.to_string()),
        ('s' | 'q' | 'd' | 'f' | 't', _) => return Err(TemplateError::BadValue { index, verb }),
        (verb, _) => return Err(TemplateError::UnknownVerb { verb }),
    }

    Ok(())
}

/// Substitute `values` into `template`.
///
/// # Errors
///
/// Returns an error if the number of values doesn't match the number of
/// placeholders, if a value doesn't fit its placeholder, or if the template
/// is malformed.
pub fn render(template: &str, values: &[Value]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut values_iter = values.iter().enumerate();
    let mut chars = template.chars().peekable();
    let mut used = 0;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let precision = precision(&mut chars);
        if let Some(precision) = precision.filter(|p| *p > MAX_PRECISION) {
            return Err(TemplateError::PrecisionTooLarge { precision });
        }

        let verb = chars.next().ok_or(TemplateError::DanglingPercent)?;

        if verb == '%' && precision.is_none() {
            out.push('%');
            continue;
        }

        if !matches!(verb, 's' | 'q' | 'd' | 'f' | 't' | 'v') {
            return Err(TemplateError::UnknownVerb { verb });
        }

        let (index, value) = values_iter
            .next()
            .ok_or(TemplateError::MissingValue { index: used })?;
        used += 1;

        format_value(&mut out, index, verb, precision, value)?;
    }

    if used < values.len() {
        return Err(TemplateError::ExtraValues {
            expected: used,
            got: values.len(),
        });
    }

    Ok(out)
}
