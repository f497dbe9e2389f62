//! Typed error taxonomy for the store, hashing, codec, and config layers.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by hash-file parsing, directory operations, and the dispatcher.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid user name: {0:?}")]
    InvalidName(String),

    #[error("user already exists: {0:?}")]
    AlreadyExists(String),

    #[error("user not found: {0:?}")]
    NotFound(String),

    #[error("both admin and user hash files present for {0:?}")]
    BothRolesPresent(String),

    #[error("malformed hash file: {0}")]
    Malformed(String),

    #[error("unsupported hash format: {0:?}")]
    UnsupportedFormat(String),

    #[error("unknown parameter set: {0}")]
    UnknownParameterSet(u32),

    #[error("password rejected by policy: {0}")]
    PolicyViolation(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("request queue is full")]
    QueueFull,

    #[error("the reply channel was dropped before a response was sent")]
    Disconnected,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Maps the error onto the process exit codes of the admin CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) | Self::BothRolesPresent(_) | Self::Malformed(_) => 1,
            Self::InvalidName(_) | Self::AlreadyExists(_) | Self::UnsupportedFormat(_) | Self::UnknownParameterSet(_) | Self::PolicyViolation(_) => 2,
            Self::Io { .. } | Self::Wire(_) | Self::QueueFull | Self::Disconnected | Self::Config(_) => 3,
        }
    }
}

/// Decode/encode failures for the saslauthd wire protocol.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("field exceeds the {limit}-byte wire limit")]
    TooLong { limit: usize },

    #[error("connection closed before a complete frame was read")]
    Truncated,

    #[error("login or password field was empty")]
    EmptyCredential,
}

/// Errors from reading and validating the YAML configuration documents.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("parameter-set id 0 is reserved")]
    ReservedId,

    #[error("parameter-set {0} must declare exactly one algorithm")]
    AmbiguousAlgorithm(u32),

    #[error("duplicate parameter-set id {0}")]
    DuplicateId(u32),

    #[error("default parameter-set {0} is not declared")]
    UnknownDefault(u32),

    #[error("default must be 0 when no parameter-sets are declared")]
    DefaultWithoutParams,

    #[error("invalid parameter-set definition: {0}")]
    InvalidParameterSet(String),
}
