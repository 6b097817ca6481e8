// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings document that dip persists, to
//! simplify serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! # General Layout
//!
//! The settings document is one JSON object mapping application names to
//! their definitions. Keys are always sorted, and the document is indented
//! by four spaces:
//!
//! ```json
//! {
//!     "fizz": {
//!         "env": {
//!             "FIZZ": "BUZZ"
//!         },
//!         "git": {
//!             "branch": "main",
//!             "remote": "origin"
//!         },
//!         "home": "/path/to/fizz",
//!         "name": "fizz",
//!         "path": "/usr/local/bin"
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Settings document layout.
///
/// Maps application names to their definitions.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SettingsDocument(pub BTreeMap<String, AppDefinition>);

impl FromStr for SettingsDocument {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut document: SettingsDocument =
            serde_json::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Entry name always matches its key.
        for (name, definition) in document.0.iter_mut() {
            if definition.name.is_empty() {
                definition.name = name.clone();
            }
        }

        Ok(document)
    }
}

impl Display for SettingsDocument {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(to_json_pretty(self)?.as_str())
    }
}

/// Definition of one installed application.
///
/// Fields are declared in alphabetical order so the serialized document
/// always has sorted keys.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct AppDefinition {
    /// Environment variables passed into the container.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Remote tracking settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSettings>,

    /// Directory holding the compose file of the application.
    pub home: PathBuf,

    /// Name of application, and its executable.
    #[serde(default)]
    pub name: String,

    /// Directory the executable is installed into.
    pub path: PathBuf,
}

/// Remote tracking settings of an application.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GitSettings {
    /// Pull remote changes without asking when local configuration is stale.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_upgrade: bool,

    /// Branch of remote to compare against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Name of remote to compare against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Seconds to sleep when local configuration is stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<u64>,
}

impl GitSettings {
    /// Check if settings actually track a remote.
    pub fn is_tracking(&self) -> bool {
        self.remote.as_deref().is_some_and(|remote| !remote.is_empty())
    }
}

fn is_false(value: &bool) -> bool {
    !value
}

/// Serialize value as sorted JSON indented by four spaces.
///
/// # Errors
///
/// - Return [`ConfigError::Serialize`] if value cannot be serialized.
pub fn to_json_pretty(value: &impl Serialize) -> Result<String> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value
        .serialize(&mut serializer)
        .map_err(ConfigError::Serialize)?;

    // INVARIANT: serde_json only ever emits valid UTF-8.
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Environment variable token.
///
/// Parsed from `KEY=VALUE`, or from a bare `KEY` whose value is taken from
/// the current process environment.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EnvVar {
    pub key: String,
    pub value: Option<String>,
}

impl FromStr for EnvVar {
    type Err = ConfigError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => (token, env::var(token).ok()),
        };

        if key.is_empty() {
            return Err(ConfigError::EnvVar(token.into()));
        }

        Ok(Self {
            key: key.into(),
            value: value.filter(|value| !value.is_empty()),
        })
    }
}

/// Collect environment tokens into a mapping, dropping empty entries.
pub fn collect_env(vars: impl IntoIterator<Item = EnvVar>) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter_map(|var| var.value.map(|value| (var.key, value)))
        .collect()
}

/// Remote and optional branch token, e.g., `origin/main`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RemoteBranch {
    pub remote: String,
    pub branch: Option<String>,
}

impl FromStr for RemoteBranch {
    type Err = ConfigError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let (remote, branch) = match token.split_once('/') {
            Some((remote, branch)) => (remote, Some(branch)),
            None => (token, None),
        };

        if remote.is_empty() || branch.is_some_and(str::is_empty) {
            return Err(ConfigError::RemoteBranch(token.into()));
        }

        Ok(Self {
            remote: remote.into(),
            branch: branch.map(Into::into),
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize settings document.
    #[error(transparent)]
    Deserialize(serde_json::Error),

    /// Failed to serialize settings document.
    #[error(transparent)]
    Serialize(serde_json::Error),

    /// Environment token has no key.
    #[error("invalid environment variable {0:?}, expected KEY or KEY=VALUE")]
    EnvVar(String),

    /// Remote token is malformed.
    #[error("invalid remote {0:?}, expected REMOTE or REMOTE/BRANCH")]
    RemoteBranch(String),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
