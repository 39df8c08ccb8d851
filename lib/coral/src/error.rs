//! Coral Error Types

use thiserror::Error;

use crate::types::ConnectCode;

#[derive(Error, Debug)]
pub enum CoralError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unimplemented(String),

    #[error("{0}")]
    Internal(String),

    #[error("Key import failed: {0}")]
    KeyImport(String),

    #[error("Signature verification failed: {0}")]
    Verification(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoralError {
    /// The Connect code this error surfaces as on the wire.
    pub fn code(&self) -> ConnectCode {
        match self {
            CoralError::InvalidArgument(_) => ConnectCode::InvalidArgument,
            CoralError::AlreadyExists(_) => ConnectCode::AlreadyExists,
            CoralError::NotFound(_) => ConnectCode::NotFound,
            CoralError::Unimplemented(_) => ConnectCode::Unimplemented,
            CoralError::Internal(_)
            | CoralError::KeyImport(_)
            | CoralError::Verification(_)
            | CoralError::Json(_) => ConnectCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CoralError::InvalidArgument("x".into()).code(),
            ConnectCode::InvalidArgument
        );
        assert_eq!(
            CoralError::AlreadyExists("x".into()).code(),
            ConnectCode::AlreadyExists
        );
        assert_eq!(CoralError::NotFound("x".into()).code(), ConnectCode::NotFound);
        assert_eq!(
            CoralError::Unimplemented("x".into()).code(),
            ConnectCode::Unimplemented
        );
        assert_eq!(CoralError::Internal("x".into()).code(), ConnectCode::Internal);
        assert_eq!(CoralError::KeyImport("x".into()).code(), ConnectCode::Internal);
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: CoralError = json_err.into();
        assert!(matches!(err, CoralError::Json(_)));
        assert_eq!(err.code(), ConnectCode::Internal);
    }

    #[test]
    fn test_display_carries_message() {
        let err = CoralError::NotFound("colony not found: m1".to_string());
        assert_eq!(err.to_string(), "colony not found: m1");
    }
}
