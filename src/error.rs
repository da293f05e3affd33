//! Crate-wide error taxonomy.
//!
//! Mirrors the six error kinds of the generation-evaluation-learning core:
//! Configuration, Data, Provider, Validation, Persistence, Policy. Callers
//! outside a single attempt only ever see `Configuration`/`Data` as fatal;
//! everything else is caught and converted into a logged, failed attempt by
//! the retry loop.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the generation-evaluation-learning core.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Missing/invalid configuration key, out-of-range value, absolute path
    /// where a relative one is required. Always fatal at the call site.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing data file, missing item, corrupt YAML. Always fatal at the
    /// call site — the core never substitutes an empty stand-in.
    #[error("data error: {0}")]
    Data(String),

    /// Transport/timeout failure talking to the LLM, detection, or rubric
    /// provider. Counts as a failed attempt; the retry loop continues.
    #[error("provider error ({provider}): {message}")]
    Provider {
        /// Which external collaborator failed (e.g. "llm", "detection", "rubric").
        provider: String,
        /// Human-readable detail, safe to log.
        message: String,
    },

    /// Score out of `[0.0, 1.0]`, parameter out of its documented range, or
    /// an evaluator response that failed schema validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Lock acquisition or write failure in the persistence or learning-store
    /// layer. Retried with backoff a small number of times by the caller;
    /// unrecoverable persistence failure is fatal to the current call.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// `MAX_ATTEMPTS` exhausted without a passing result. Not propagated by
    /// the retry loop itself (it returns the best-so-far result with
    /// `passed = false`), but available for callers that want to treat
    /// exhaustion as an error.
    #[error("policy: attempts exhausted after {attempts} tries")]
    Policy {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// I/O failure not otherwise classified (temp-file write, rename, read).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// JSON (de)serialization failure (evaluator / LLM response parsing).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite failure in the learning store.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// HTTP transport failure calling an external provider.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Construct a `Configuration` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Construct a `Data` error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Construct a `Provider` error naming which collaborator failed.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Construct a `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Construct a `Persistence` error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Whether this error represents a transient provider failure that
    /// should count against the quality retry loop rather than abort the
    /// whole call.
    #[must_use]
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Http(_))
    }
}
