//! REST API request and response bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{PipelineError, ServerError};
use crate::models::{RiskLevel, StoredTransaction};
use crate::pipeline::{IngestReport, SourceInfo};
use crate::processing::ColumnResolution;
use crate::store::AppendReceipt;

/// Response to a successful upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub batch_id: String,
    /// "ok", or "warning" when rows were dropped
    pub status: String,
    pub source_file: String,
    pub metadata: UploadMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_dropped: usize,
    pub risk_counts: BTreeMap<RiskLevel, usize>,
    pub columns: Vec<ColumnResolution>,
    pub source: SourceInfo,
}

impl UploadResponse {
    pub fn new(report: &IngestReport, receipt: &AppendReceipt) -> Self {
        let dropped = report.rows_dropped();
        Self {
            batch_id: receipt.batch_id.clone(),
            status: if dropped == 0 { "ok" } else { "warning" }.to_string(),
            source_file: receipt.source_file.clone(),
            metadata: UploadMetadata {
                rows_read: report.rows_read(),
                rows_kept: report.transactions.len(),
                rows_dropped: dropped,
                risk_counts: report.risk_counts(),
                columns: report.columns.clone(),
                source: report.source.clone(),
            },
        }
    }
}

/// Query of `/api/recent`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent")]
    pub n: usize,
}

fn default_recent() -> usize {
    5
}

/// A page of rows.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionList {
    pub total: usize,
    pub transactions: Vec<StoredTransaction>,
}

impl From<Vec<StoredTransaction>> for TransactionList {
    fn from(transactions: Vec<StoredTransaction>) -> Self {
        Self {
            total: transactions.len(),
            transactions,
        }
    }
}

/// JSON error body.
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Pipeline(PipelineError::UnsupportedFormat(_))
            | ServerError::Pipeline(PipelineError::Parse(_)) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(PipelineError::Schema(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Pipeline(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParseError, SchemaError, UnsupportedFormatError};

    #[test]
    fn test_status_codes() {
        let unsupported: ServerError = PipelineError::from(UnsupportedFormatError {
            extension: "pdf".into(),
        })
        .into();
        assert_eq!(unsupported.status_code(), StatusCode::BAD_REQUEST);

        let parse: ServerError = PipelineError::from(ParseError::EmptyFile).into();
        assert_eq!(parse.status_code(), StatusCode::BAD_REQUEST);

        let schema: ServerError =
            PipelineError::from(SchemaError::MissingAfterStandardization(vec!["amount".into()])).into();
        assert_eq!(schema.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let too_large = ServerError::PayloadTooLarge("length limit exceeded".into());
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let internal = ServerError::Internal("boom".into());
        assert_eq!(internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_body() {
        let body = error_response("No file provided");
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "No file provided");
    }

    #[test]
    fn test_recent_query_default() {
        let query: RecentQuery = serde_json::from_value(json!({})).unwrap();
        assert_eq!(query.n, 5);
    }
}
