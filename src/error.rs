//! # error.rs
//!
//! Error types. Only [`ConfigError`] ever reaches the caller of the
//! inventory; site and cache errors are downgraded where they happen.

use std::time::Duration;

use thiserror::Error;

/// Failure of one bulk call against one site.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SiteError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for SiteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SiteError::Upstream(format!("malformed response: {e}"))
        } else {
            SiteError::Connection(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry could not be encoded: {0}")]
    Encode(String),

    #[error("cache entry is invalid: {0}")]
    Decode(String),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal configuration problems, reported before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("at least one site must be configured in 'sites'")]
    NoSites,

    #[error("site at index {0} is missing required 'name' field")]
    MissingName(usize),

    #[error("site '{0}' is missing required 'host' field")]
    MissingHost(String),

    #[error("site name '{0}' is used more than once")]
    DuplicateSite(String),

    #[error("site names '{first}' and '{second}' both become host prefix '{prefix}'")]
    CollidingSite {
        first: String,
        second: String,
        prefix: String,
    },

    #[error("site '{0}' must have either 'api_key' or 'username' and 'password' for authentication")]
    MissingCredential(String),

    #[error("site '{0}' sets both 'api_key' and 'username'/'password'; use exactly one")]
    ConflictingCredential(String),

    #[error("'{field}' must be a positive integer, got {value}")]
    NotPositive { field: &'static str, value: u64 },

    #[error("invalid 'name_pattern' filter: {0}")]
    BadPattern(#[from] regex::Error),
}
