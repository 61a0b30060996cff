use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::ocr::OcrError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unsupported file format: {0}")]
    UnsupportedMediaType(String),
    #[error("Unknown OCR engine: {0}")]
    UnknownEngine(String),
    #[error("OCR engine not available: {0}")]
    EngineUnavailable(String),
    #[error("File too large (max {0} bytes)")]
    PayloadTooLarge(usize),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("OCR failed: {0}")]
    OcrFailed(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    fn error_type(&self) -> &'static str {
        match self {
            ApiError::UnsupportedMediaType(_) => "unsupported_media_type",
            ApiError::UnknownEngine(_) => "unknown_engine",
            ApiError::EngineUnavailable(_) => "engine_unavailable",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::OcrFailed(_) => "ocr_failed",
            ApiError::Database(_) => "database_error",
            ApiError::InternalError(_) => "internal_error",
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            error!(error_type = self.error_type(), "Request failed: {}", self);
        } else {
            warn!(error_type = self.error_type(), "Request rejected: {}", self);
        }
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(serde_json::json!({
                "error": self.to_string(),
                "error_type": self.error_type(),
            }))
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::UnknownEngine(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::OcrFailed(_) | ApiError::Database(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::InternalError(format!("IO error: {}", err))
    }
}

impl From<OcrError> for ApiError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::UnknownEngine(name) => ApiError::UnknownEngine(name),
            OcrError::EngineUnavailable(reason) => ApiError::EngineUnavailable(reason),
            other => ApiError::OcrFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::UnsupportedMediaType("text/plain".to_string());
        assert!(err.to_string().contains("Unsupported file format"));

        let err = ApiError::PayloadTooLarge(1024);
        assert_eq!(err.to_string(), "File too large (max 1024 bytes)");
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::UnsupportedMediaType("x".to_string()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(ApiError::UnknownEngine("x".to_string()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".to_string()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_ocr_errors_map_to_api_errors() {
        let err: ApiError = OcrError::UnknownEngine("easyocr".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = OcrError::EngineUnavailable("no tesseract".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: ApiError = OcrError::Recognition {
            page: 2,
            message: "boom".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("page 2"));
    }
}
