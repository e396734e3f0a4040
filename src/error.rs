use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, UmbraError>;

/// Error taxonomy for the client protocol layer.
///
/// `Validation` and `Size` are local to a single operation and never corrupt
/// the shared buffer. `SchemaChanged` is broadcast to every pending handle of
/// a cancelled batch. `StaleQuery` means the byte-code must be recompiled
/// against the current schema; `Integrity` means the payload itself is bad.
#[derive(Clone, Debug, Error)]
pub enum UmbraError {
    /// A value failed a property's type/range/format/custom check.
    #[error("validation failed at `{path}`: {reason}")]
    Validation {
        /// Dotted path of the offending property.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },
    /// A single operation's worst-case size exceeds the buffer ceiling.
    #[error("operation needs {needed} bytes but the buffer ceiling is {ceiling}")]
    Size {
        /// Worst-case encoded size of the rejected operation.
        needed: usize,
        /// Configured ceiling for one batch buffer.
        ceiling: usize,
    },
    /// The schema changed while the batch holding this operation was pending.
    #[error("schema changed while the batch was pending")]
    SchemaChanged,
    /// Query byte-code no longer matches the engine's schema checksum.
    #[error("query byte-code was compiled against a stale schema")]
    StaleQuery,
    /// Checksum mismatch on a decoded payload.
    #[error("integrity check failed: {0}")]
    Integrity(&'static str),
    /// A result or mutation buffer is structurally malformed.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// Malformed declaration, unknown path, or otherwise invalid input.
    #[error("invalid: {0}")]
    Invalid(String),
    /// The engine boundary reported a failure.
    #[error("engine boundary failure: {0}")]
    Engine(String),
}

impl UmbraError {
    /// Builds a path-qualified validation error.
    pub fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        UmbraError::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Builds an `Invalid` error from any displayable message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        UmbraError::Invalid(msg.into())
    }
}
