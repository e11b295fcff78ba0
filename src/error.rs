//! Error taxonomy for the gazette pipeline.
//!
//! Only [`PortalError`] can escape a pipeline run. Extraction and storage
//! errors are caught at their component boundary, logged, and turned into
//! reduced counts or a fall-through to the next storage tier.

use thiserror::Error;

/// Failures talking to the gazette portal.
#[derive(Error, Debug)]
pub enum PortalError {
    /// Login completed but the response carried no session cookie.
    #[error("portal login failed: no session cookie in response")]
    Auth,

    /// The login request itself could not be sent or completed.
    #[error("portal transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The portal client could not be built from configuration.
    #[error("portal configuration error: {0}")]
    Config(String),
}

/// Failures turning an archive into documents.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Signature check failed or the ZIP container could not be opened.
    #[error("malformed archive for section {section}: {reason}")]
    MalformedArchive { section: String, reason: String },

    /// One markup entry could not be read or parsed.
    #[error("malformed markup entry {entry}: {reason}")]
    MalformedDocument { entry: String, reason: String },
}

/// Failures inside one subscriber storage tier.
#[derive(Error, Debug)]
pub enum TierError {
    /// The tier is not configured or cannot be reached.
    #[error("storage tier unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an error.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded or decoded.
    #[error("storage codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A subscriber address that is not syntactically an email.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid email address: '{0}'")]
pub struct InvalidEmail(pub String);

impl From<redis::RedisError> for TierError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() {
            TierError::Unavailable(e.to_string())
        } else {
            TierError::Backend(e.to_string())
        }
    }
}

impl From<reqwest::Error> for TierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            TierError::Unavailable(e.to_string())
        } else {
            TierError::Backend(e.to_string())
        }
    }
}
