//! Store configuration.
//!
//! Configuration is loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `DIRSTORE_NODE_SIZE`: Node (page) size in bytes (default: `4096`)
//! - `DIRSTORE_KEY_FORMAT`: `large` or `short` (default: `large`)
//! - `DIRSTORE_VERIFY_SEALS`: `true` or `false`; re-check the key a validated
//!   seal points at (default: `true` in debug builds)
//!
//! # Invariants
//!
//! - `node_size` is within `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`

use crate::storage::key::KeyFormat;
use crate::storage::page::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};

const NODE_SIZE_VAR: &str = "DIRSTORE_NODE_SIZE";
const KEY_FORMAT_VAR: &str = "DIRSTORE_KEY_FORMAT";
const VERIFY_SEALS_VAR: &str = "DIRSTORE_VERIFY_SEALS";

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Size of every node and of its page image.
    pub node_size: usize,
    /// Key layout of every node in the store.
    pub key_format: KeyFormat,
    /// Compare the unit a validated seal names with the expected key.
    pub verify_seals: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            node_size: Self::DEFAULT_NODE_SIZE,
            key_format: KeyFormat::default(),
            verify_seals: cfg!(debug_assertions),
        }
    }
}

impl StoreConfig {
    /// Default node size.
    pub const DEFAULT_NODE_SIZE: usize = 4096;

    /// Load configuration from environment variables. Unset variables take
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse
    /// or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            node_size: parse_node_size(read_var(NODE_SIZE_VAR)?.as_deref())?,
            key_format: parse_key_format(read_var(KEY_FORMAT_VAR)?.as_deref())?,
            verify_seals: parse_flag(VERIFY_SEALS_VAR, read_var(VERIFY_SEALS_VAR)?.as_deref())?
                .unwrap_or(defaults.verify_seals),
        })
    }

    #[must_use]
    pub const fn with_node_size(mut self, node_size: usize) -> Self {
        self.node_size = node_size;
        self
    }

    #[must_use]
    pub const fn with_key_format(mut self, key_format: KeyFormat) -> Self {
        self.key_format = key_format;
        self
    }

    #[must_use]
    pub const fn with_verify_seals(mut self, verify_seals: bool) -> Self {
        self.verify_seals = verify_seals;
        self
    }
}

fn invalid(name: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message,
    }
}

/// Read a variable, treating "not set" as `None`.
fn read_var(name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(invalid(name, "not valid unicode".to_string()))
        }
    }
}

fn parse_node_size(value: Option<&str>) -> Result<usize, ConfigError> {
    let Some(value) = value else {
        return Ok(StoreConfig::DEFAULT_NODE_SIZE);
    };
    let size = value
        .trim()
        .parse::<usize>()
        .map_err(|_| invalid(NODE_SIZE_VAR, format!("'{value}' is not a number")))?;
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size) {
        return Err(invalid(
            NODE_SIZE_VAR,
            format!("{size} is outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}"),
        ));
    }
    Ok(size)
}

fn parse_key_format(value: Option<&str>) -> Result<KeyFormat, ConfigError> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("large") => Ok(KeyFormat::Large),
        Some("short") => Ok(KeyFormat::Short),
        Some(other) => Err(invalid(
            KEY_FORMAT_VAR,
            format!("'{other}' is not one of 'large', 'short'"),
        )),
    }
}

fn parse_flag(name: &str, value: Option<&str>) -> Result<Option<bool>, ConfigError> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None => Ok(None),
        Some("1" | "true" | "yes") => Ok(Some(true)),
        Some("0" | "false" | "no") => Ok(Some(false)),
        Some(other) => Err(invalid(name, format!("'{other}' is not a boolean"))),
    }
}
