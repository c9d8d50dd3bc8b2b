use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{plan::SelectionError, platform::SourceUrlError, resolver::ResolveError};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: Some(code),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }

    pub fn missing_input(message: impl Into<String>) -> Self {
        Self::bad_request(message, "MISSING_INPUT")
    }

    pub fn resolution_failure(error: ResolveError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
            code: Some("RESOLUTION_FAILURE"),
        }
    }

    pub fn execution_failure(error: ResolveError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
            code: Some("EXECUTION_FAILURE"),
        }
    }

    pub fn file_too_large(max_bytes: u64) -> Self {
        let max_mb = max_bytes / 1_048_576;
        Self::bad_request(
            format!("The file exceeds the {max_mb} MB limit."),
            "FILE_TOO_LARGE",
        )
    }
}

impl From<SourceUrlError> for ApiError {
    fn from(error: SourceUrlError) -> Self {
        match error {
            SourceUrlError::Missing => Self::missing_input(error.to_string()),
            SourceUrlError::Invalid(_) => Self::bad_request(error.to_string(), "INVALID_URL"),
        }
    }
}

impl From<SelectionError> for ApiError {
    fn from(error: SelectionError) -> Self {
        match error {
            SelectionError::FormatNotFound(_) => {
                Self::bad_request(error.to_string(), "FORMAT_NOT_FOUND")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_input_errors_to_bad_request() {
        let error = ApiError::from(SourceUrlError::Missing);
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, Some("MISSING_INPUT"));

        let error = ApiError::from(SelectionError::FormatNotFound("9".to_string()));
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, Some("FORMAT_NOT_FOUND"));
    }

    #[test]
    fn resolver_failures_are_internal_errors() {
        let error = ApiError::resolution_failure(ResolveError::Failed("boom".to_string()));
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "boom");

        let error = ApiError::execution_failure(ResolveError::Timeout(180));
        assert_eq!(error.code, Some("EXECUTION_FAILURE"));
    }
}
