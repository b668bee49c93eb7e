//! Error types shared by the realm model, the membrane and the policy engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::realm::Value;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while operating on realm objects or consulting policy.
///
/// Only [`Error::Thrown`] carries a realm value; it is the one variant the
/// membrane translates when an exception crosses between realms. Every other
/// variant is sandbox-internal and propagates untouched.
#[derive(Debug, Error)]
pub enum Error {
    /// An exception value thrown by realm code
    #[error("uncaught exception: {0}")]
    Thrown(Value),
    /// Engine-level type error (invariant violation, bad call target)
    #[error("TypeError: {0}")]
    Type(String),
    /// Engine-level range error (invalid array length)
    #[error("RangeError: {0}")]
    Range(String),
    /// Malformed or failing guard predicate. Always fatal.
    #[error("Policy Error: {0}")]
    Policy(String),
    /// A denied action reported while the violation mode is `throw`
    #[error("{0}")]
    Violation(String),
    /// A policy parameter was requested but never defined
    #[error("Policy parameter {0} is undefined")]
    MissingParameter(String),
    /// Policy persistence error
    #[error(transparent)]
    Store(#[from] StoreError),
    /// IO error (interactive prompts)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::Type`] from anything displayable.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Whether this error is a realm exception rather than a sandbox failure.
    pub fn is_thrown(&self) -> bool {
        matches!(self, Self::Thrown(_))
    }
}

/// Errors from loading or persisting the policy forest.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A policy file could not be read
    #[error("unable to load {}: {source}", path.display())]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// A policy file is not valid policy JSON
    #[error("unable to load {}: {source}", path.display())]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
    /// A policy file could not be written
    #[error("unable to write {}: {source}", path.display())]
    Write {
        /// File that failed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// A policy document could not be serialized
    #[error("unable to serialize policy document {id}: {source}")]
    Serialize {
        /// Document id
        id: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
    /// A manifest entry points outside the policy root
    #[error("manifest entry {id} points outside the policy root: {path}")]
    InvalidManifest {
        /// Document id
        id: String,
        /// Offending relative path
        path: String,
    },
    /// The background write-back worker could not be started
    #[error("failed to start policy write-back worker: {0}")]
    Worker(#[source] std::io::Error),
}
