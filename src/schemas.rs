//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::db::OcrResultRow;
use crate::error::ApiError;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_ms: u64,
    pub timestamp: String,
}

/// Query string of `POST /upload`.
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub engine: Option<String>,
}

/// Outcome of an upload that was stored and processed.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_id: i64,
    pub file_name: String,
    pub engine: String,
    pub pages: i64,
    pub rows_inserted: u64,
    pub message: String,
}

/// Query string of `GET /results`.
#[derive(Debug, Default, Deserialize)]
pub struct ResultsQuery {
    pub file_name: Option<String>,
    pub file_id: Option<i64>,
    pub page_number: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// [`ResultsQuery`] after bounds checks, with defaults filled in.
#[derive(Debug, PartialEq, Eq)]
pub struct ResultsPage {
    pub file_name: Option<String>,
    pub file_id: Option<i64>,
    pub page_number: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl ResultsQuery {
    pub fn validate(self) -> Result<ResultsPage, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }

        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ApiError::BadRequest("offset must not be negative".to_string()));
        }

        if matches!(self.page_number, Some(n) if n < 1) {
            return Err(ApiError::BadRequest("page_number starts at 1".to_string()));
        }

        let file_name = self
            .file_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Ok(ResultsPage {
            file_name,
            file_id: self.file_id,
            page_number: self.page_number,
            limit,
            offset,
        })
    }
}

/// One slice of OCR rows plus the total they were cut from.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResults {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub items: Vec<OcrResultRow>,
}
