//! Error taxonomy for the icon pipeline.
//!
//! Every variant is recoverable: the fetcher marks the owning identity as
//! failed and the renderer falls back to the derived placeholder colour.
//! Nothing here is allowed to take the process down.

/// Errors produced while allocating, fetching or decoding an avatar icon.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IconError {
    #[error("Pixel buffer pool exhausted")]
    PoolExhausted,

    #[error("Identity cache full")]
    CacheFull,

    #[error("Identity has no icon URL")]
    MissingUrl,

    #[error("Icon fetch already failed this session")]
    PreviouslyFailed,

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("{what} exceeds ceiling ({actual} > {limit})")]
    SizeCeilingExceeded {
        what: &'static str,
        actual: u64,
        limit: u64,
    },

    #[error("Network timeout")]
    NetworkTimeout,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Decoder library fault: {0}")]
    DecodeLibraryFault(String),
}

impl IconError {
    /// Shorthand for a malformed-container error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        IconError::MalformedContainer(msg.into())
    }

    /// Shorthand for an unsupported-encoding error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        IconError::UnsupportedEncoding(msg.into())
    }

    /// Build a ceiling error, saturating oversized counts.
    pub fn ceiling(what: &'static str, actual: impl TryInto<u64>, limit: impl TryInto<u64>) -> Self {
        IconError::SizeCeilingExceeded {
            what,
            actual: actual.try_into().unwrap_or(u64::MAX),
            limit: limit.try_into().unwrap_or(u64::MAX),
        }
    }

    /// Whether the failure is transient pool pressure rather than a bad icon.
    ///
    /// Transient failures leave the identity eligible for a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, IconError::PoolExhausted | IconError::CacheFull)
    }
}

/// Extension trait for attaching context to foreign errors.
///
/// # Example
/// ```rust
/// use ncl_core::error::{IconError, ResultExt};
///
/// fn parse(n: &str) -> Result<u32, IconError> {
///     n.parse::<u32>().context("Invalid dimension")
/// }
/// assert!(parse("x").is_err());
/// ```
pub trait ResultExt<T> {
    /// Convert the error into [`IconError::MalformedContainer`] prefixed with `msg`.
    fn context(self, msg: &str) -> Result<T, IconError>;

    /// Convert the error into [`IconError::NetworkError`] prefixed with `msg`.
    fn network_context(self, msg: &str) -> Result<T, IconError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, IconError> {
        self.map_err(|e| IconError::MalformedContainer(format!("{}: {}", msg, e)))
    }

    fn network_context(self, msg: &str) -> Result<T, IconError> {
        self.map_err(|e| IconError::NetworkError(format!("{}: {}", msg, e)))
    }
}
