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

use std::path::Path;

use figment::{
    error::Error as FigmentError,
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;

/// Pick a file provider based on the extension of the file. Anything which is
/// not JSON or TOML is read as YAML.
fn file_figment(path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Figment::from(Json::file(path)),
        Some("toml") => Figment::from(Toml::file(path)),
        _ => Figment::from(Yaml::file(path)),
    }
}

/// Trait implemented by all configuration section to help loading specific part
/// of the config.
pub trait ConfigurationSection: Sized + DeserializeOwned {
    /// Specify where this section should live relative to the root.
    const PATH: Option<&'static str> = None;

    /// Prefix of the environment variables overriding this section, e.g.
    /// `MAIL_` for `MAIL_HOST`.
    const ENV_PREFIX: Option<&'static str> = None;

    /// Keys read verbatim from the environment. Other environment values are
    /// parsed, which turns `MAIL_PASSWORD=0123` into the number `123`.
    const ENV_STRING_KEYS: &'static [&'static str] = &[];

    /// Validate the configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    fn validate(&self, _figment: &Figment) -> Result<(), FigmentError> {
        Ok(())
    }

    /// Extract configuration from a Figment instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration could not be loaded
    fn extract(figment: &Figment) -> Result<Self, FigmentError> {
        let this: Self = if let Some(path) = Self::PATH {
            figment.extract_inner(path)?
        } else {
            figment.extract()?
        };

        this.validate(figment)?;
        Ok(this)
    }

    /// Build a [`Figment`] out of a list of files, merged in order, and the
    /// environment variables matching [`Self::ENV_PREFIX`].
    fn figment<P: AsRef<Path>>(paths: &[P]) -> Figment {
        let base = paths
            .iter()
            .fold(Figment::new(), |figment, path| {
                figment.merge(file_figment(path.as_ref()))
            });

        let Some(prefix) = Self::ENV_PREFIX else {
            return base;
        };

        let figment = match Self::PATH {
            // Environment variables are flat, nest them under the section path
            Some(path) => base.merge(
                Env::prefixed(prefix).map(move |key| format!("{path}.{key}").into()),
            ),
            None => base.merge(Env::prefixed(prefix)),
        };

        Self::ENV_STRING_KEYS.iter().fold(figment, |figment, key| {
            let name = format!("{prefix}{}", key.to_ascii_uppercase());
            let Ok(value) = std::env::var(name) else {
                return figment;
            };

            let key = match Self::PATH {
                Some(path) => format!("{path}.{key}"),
                None => (*key).to_owned(),
            };
            figment.merge(Serialized::global(&key, value))
        })
    }

    /// Load the configuration section from a list of files, then override it
    /// with the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the files is malformed or if the resulting
    /// configuration could not be loaded
    fn load_from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, FigmentError> {
        Self::extract(&Self::figment(paths))
    }

    /// Load the configuration section from a single file, then override it
    /// with the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or if the resulting
    /// configuration could not be loaded
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, FigmentError> {
        Self::load_from_files(&[path])
    }
}

/// Extension trait for [`ConfigurationSection`] to allow extracting the
/// configuration section from a [`Figment`] or return the default value if the
/// section is not present.
pub trait ConfigurationSectionExt: ConfigurationSection + Default {
    /// Extract the configuration section from the given [`Figment`], or return
    /// the default value if the section is not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration section is invalid.
    fn extract_or_default(figment: &Figment) -> Result<Self, figment::Error> {
        let this: Self = if let Some(path) = Self::PATH {
            // If the configuration section is not present, we return the default value
            if !figment.contains(path) {
                return Ok(Self::default());
            }

            figment.extract_inner(path)?
        } else {
            figment.extract()?
        };

        this.validate(figment)?;
        Ok(this)
    }
}

impl<T: ConfigurationSection + Default> ConfigurationSectionExt for T {}
