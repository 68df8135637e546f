//! Configuration types for arena-core.
//!
//! An [`ArenaConfig`] is read from a YAML file and lists the engines the
//! harness knows about ([`EngineConfig`]) together with the protocol
//! [`Timeouts`] shared by every adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::channel::LaunchSpec;
use crate::error::CoreError;
use crate::naming::{IdentityAttributes, NAME_KEY};

// ── Engine Configuration ─────────────────────────────────────

/// Protocol spoken by an engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Uci,
}

/// Value of a configured engine option as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// How to launch and configure one engine.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use arena_core::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .name("Stockfish")
///     .cmd("/usr/bin/stockfish")
///     .build()
///     .with_option("Hash", 64);
///
/// assert_eq!(config.cmd(), &PathBuf::from("/usr/bin/stockfish"));
/// assert_eq!(config.options()["Hash"].to_string(), "64");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Base display name.
    #[builder(setter(into))]
    name: String,

    /// Engine executable.
    #[builder(setter(into))]
    cmd: PathBuf,

    /// Command-line arguments.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,

    /// Working directory for the engine process.
    #[builder(default, setter(into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dir: Option<PathBuf>,

    #[builder(default)]
    #[serde(default)]
    protocol: Protocol,

    /// Options sent after the handshake, in name order.
    #[builder(default)]
    #[serde(default)]
    options: BTreeMap<String, OptionValue>,
}

impl EngineConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cmd(&self) -> &PathBuf {
        &self.cmd
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn options(&self) -> &BTreeMap<String, OptionValue> {
        &self.options
    }

    /// Add or replace a configured option.
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    /// Returns what the process spawner needs to start this engine.
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            command: self.cmd.clone(),
            args: self.args.clone(),
            working_dir: self.dir.clone(),
        }
    }

    /// Attributes that tell engines of one name apart: the name, every
    /// configured option, and the arguments when there are any.
    pub fn identity_attributes(&self) -> IdentityAttributes {
        let mut attributes: IdentityAttributes = self
            .options
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect();
        if !self.args.is_empty() {
            attributes.insert("args".to_owned(), self.args.join(" "));
        }
        attributes.insert(NAME_KEY.to_owned(), self.name.clone());
        attributes
    }
}

// ── Timeouts ─────────────────────────────────────────────────

/// Bounds for every blocking point of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// Deadline for the whole handshake, and for the `isready` round trip.
    #[builder(default = DEFAULT_HANDSHAKE_MS)]
    #[serde(default = "default_handshake_ms")]
    handshake_ms: u64,

    /// Wait of a single `read_event` call.
    #[builder(default = DEFAULT_POLL_MS)]
    #[serde(default = "default_poll_ms")]
    poll_ms: u64,

    /// How long a process may take to exit after `quit` before it is killed.
    #[builder(default = DEFAULT_QUIT_GRACE_MS)]
    #[serde(default = "default_quit_grace_ms")]
    quit_grace_ms: u64,
}

const DEFAULT_HANDSHAKE_MS: u64 = 10_000;
const DEFAULT_POLL_MS: u64 = 100;
const DEFAULT_QUIT_GRACE_MS: u64 = 2_000;

fn default_handshake_ms() -> u64 {
    DEFAULT_HANDSHAKE_MS
}

fn default_poll_ms() -> u64 {
    DEFAULT_POLL_MS
}

fn default_quit_grace_ms() -> u64 {
    DEFAULT_QUIT_GRACE_MS
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Timeouts {
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn quit_grace(&self) -> Duration {
        Duration::from_millis(self.quit_grace_ms)
    }
}

// ── Config File ──────────────────────────────────────────────

/// Contents of an `engines.yaml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaConfig {
    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

impl ArenaConfig {
    /// Find an engine by its configured name.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::EngineNotFound` if no engine has that name.
    pub fn engine(&self, name: &str) -> Result<&EngineConfig, CoreError> {
        self.engines
            .iter()
            .find(|engine| engine.name() == name)
            .ok_or_else(|| CoreError::EngineNotFound(name.to_owned()))
    }
}

/// Load an [`ArenaConfig`] from a YAML file.
///
/// # Errors
///
/// Returns `CoreError::Io` if the file cannot be read.
/// Returns `CoreError::Yaml` if the file contains invalid YAML.
pub fn load_config(path: &Path) -> Result<ArenaConfig, CoreError> {
    let content = std::fs::read_to_string(path)?;
    let config: ArenaConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}
