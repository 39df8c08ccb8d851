//! Connect protocol error codes

use serde::{Deserialize, Serialize};

/// The Connect unary error codes, with their fixed HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectCode {
    Ok,
    Canceled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl ConnectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectCode::Ok => "ok",
            ConnectCode::Canceled => "canceled",
            ConnectCode::Unknown => "unknown",
            ConnectCode::InvalidArgument => "invalid_argument",
            ConnectCode::DeadlineExceeded => "deadline_exceeded",
            ConnectCode::NotFound => "not_found",
            ConnectCode::AlreadyExists => "already_exists",
            ConnectCode::PermissionDenied => "permission_denied",
            ConnectCode::ResourceExhausted => "resource_exhausted",
            ConnectCode::FailedPrecondition => "failed_precondition",
            ConnectCode::Aborted => "aborted",
            ConnectCode::OutOfRange => "out_of_range",
            ConnectCode::Unimplemented => "unimplemented",
            ConnectCode::Internal => "internal",
            ConnectCode::Unavailable => "unavailable",
            ConnectCode::DataLoss => "data_loss",
            ConnectCode::Unauthenticated => "unauthenticated",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ConnectCode::Ok => 200,
            ConnectCode::Canceled => 408,
            ConnectCode::Unknown => 500,
            ConnectCode::InvalidArgument => 400,
            ConnectCode::DeadlineExceeded => 408,
            ConnectCode::NotFound => 404,
            ConnectCode::AlreadyExists => 409,
            ConnectCode::PermissionDenied => 403,
            ConnectCode::ResourceExhausted => 429,
            ConnectCode::FailedPrecondition => 400,
            ConnectCode::Aborted => 409,
            ConnectCode::OutOfRange => 400,
            ConnectCode::Unimplemented => 501,
            ConnectCode::Internal => 500,
            ConnectCode::Unavailable => 503,
            ConnectCode::DataLoss => 500,
            ConnectCode::Unauthenticated => 401,
        }
    }
}

/// Error envelope returned for every failed RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ConnectCode; 17] = [
        ConnectCode::Ok,
        ConnectCode::Canceled,
        ConnectCode::Unknown,
        ConnectCode::InvalidArgument,
        ConnectCode::DeadlineExceeded,
        ConnectCode::NotFound,
        ConnectCode::AlreadyExists,
        ConnectCode::PermissionDenied,
        ConnectCode::ResourceExhausted,
        ConnectCode::FailedPrecondition,
        ConnectCode::Aborted,
        ConnectCode::OutOfRange,
        ConnectCode::Unimplemented,
        ConnectCode::Internal,
        ConnectCode::Unavailable,
        ConnectCode::DataLoss,
        ConnectCode::Unauthenticated,
    ];

    #[test]
    fn test_status_mapping_complete() {
        let expected: [(ConnectCode, &str, u16); 17] = [
            (ConnectCode::Ok, "ok", 200),
            (ConnectCode::Canceled, "canceled", 408),
            (ConnectCode::Unknown, "unknown", 500),
            (ConnectCode::InvalidArgument, "invalid_argument", 400),
            (ConnectCode::DeadlineExceeded, "deadline_exceeded", 408),
            (ConnectCode::NotFound, "not_found", 404),
            (ConnectCode::AlreadyExists, "already_exists", 409),
            (ConnectCode::PermissionDenied, "permission_denied", 403),
            (ConnectCode::ResourceExhausted, "resource_exhausted", 429),
            (ConnectCode::FailedPrecondition, "failed_precondition", 400),
            (ConnectCode::Aborted, "aborted", 409),
            (ConnectCode::OutOfRange, "out_of_range", 400),
            (ConnectCode::Unimplemented, "unimplemented", 501),
            (ConnectCode::Internal, "internal", 500),
            (ConnectCode::Unavailable, "unavailable", 503),
            (ConnectCode::DataLoss, "data_loss", 500),
            (ConnectCode::Unauthenticated, "unauthenticated", 401),
        ];
        for (code, s, status) in expected {
            assert_eq!(code.as_str(), s);
            assert_eq!(code.http_status(), status);
        }
    }

    #[test]
    fn test_serde_matches_as_str() {
        for code in ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
