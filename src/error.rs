//! Error taxonomy surfaced to the engine by every component in this crate.

/// Errors returned across the engine boundary.
///
/// Invariant violations that can only be produced by programmer error
/// (null-equivalent constructor inputs, structurally impossible wire payloads)
/// are not represented here; those panic at the point of detection.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The caller handed over malformed data or violated a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced domain, workflow or run does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Broken internal invariant or a failure in the backing store.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = EngineError::InvalidArgument("bad branch index".to_string());
        assert_eq!(err.to_string(), "invalid argument: bad branch index");

        let err = EngineError::Internal("version mismatch".to_string());
        assert_eq!(err.to_string(), "internal error: version mismatch");
    }
}
