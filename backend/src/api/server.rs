//! HTTP server for the Cardwatch API.
//!
//! # API Endpoints
//!
//! | Method | Path                | Description                              |
//! |--------|---------------------|------------------------------------------|
//! | GET    | `/health`           | Health check                             |
//! | POST   | `/api/upload`       | Upload a file, classify and store it     |
//! | GET    | `/api/transactions` | Latest rows matching the filter          |
//! | GET    | `/api/summary`      | Filter options, metrics and breakdowns   |
//! | GET    | `/api/recent`       | Newest `n` rows (default 5)              |
//! | GET    | `/api/export`       | Filtered rows as a CSV download          |
//! | GET    | `/api/logs`         | SSE stream of pipeline logs              |

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_error, LOG_BROADCASTER};
use super::types::{RecentQuery, TransactionList, UploadResponse};
use crate::config::AppConfig;
use crate::dashboard::{self, DashboardSummary, Filter};
use crate::error::{ServerError, ServerResult};
use crate::pipeline::{ingest_bytes, store_report};
use crate::store::TransactionStore;

/// Shared handler state: read-only config plus the connection pool.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: TransactionStore,
}

/// Build the router over the given state.
///
/// Request bodies are capped at `server.max_upload_mb`.
pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.config.server.max_upload_bytes());
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/upload", post(upload))
        .route("/api/transactions", get(transactions))
        .route("/api/summary", get(summary))
        .route("/api/recent", get(recent))
        .route("/api/export", get(export))
        .route("/api/logs", get(sse_logs))
        .layer(body_limit)
        .layer(cors)
        .with_state(state)
}

/// Connect to the database and serve until the process stops.
pub async fn start_server(config: AppConfig, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let store = TransactionStore::connect(&config.database).await?;
    let state = AppState {
        config: Arc::new(config),
        store,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Cardwatch server listening on http://localhost:{}", port);
    tracing::info!("  POST /api/upload       - upload a transaction file");
    tracing::info!("  GET  /api/transactions - filtered transactions");
    tracing::info!("  GET  /api/summary      - dashboard summary");
    tracing::info!("  GET  /api/export       - CSV export");
    tracing::info!("  GET  /api/logs         - SSE log stream");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "cardwatch",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    // lagged receivers skip what they missed
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let entry = result.ok()?;
        let json = serde_json::to_string(&entry).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ServerResult<Json<UploadResponse>> {
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ServerError::BadRequest("Uploaded file has no name".to_string()))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        file = Some((name, bytes.to_vec()));
    }

    let (file_name, bytes) =
        file.ok_or_else(|| ServerError::BadRequest("No file provided".to_string()))?;
    tracing::info!(file = %file_name, bytes = bytes.len(), "upload received");

    let config = Arc::clone(&state.config);
    let report = tokio::task::spawn_blocking(move || ingest_bytes(&bytes, &file_name, &config))
        .await
        .map_err(|e| ServerError::Internal(format!("Pipeline task failed: {}", e)))?
        .map_err(|e| {
            log_error(e.to_string());
            e
        })?;

    let receipt = store_report(&state.store, &report).await?;
    Ok(Json(UploadResponse::new(&report, &receipt)))
}

fn multipart_error(err: MultipartError) -> ServerError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge(err.body_text())
    } else {
        ServerError::BadRequest(format!("Multipart error: {}", err.body_text()))
    }
}

async fn transactions(
    State(state): State<AppState>,
    Query(filter): Query<Filter>,
) -> ServerResult<Json<TransactionList>> {
    let rows = state.store.latest().await?;
    Ok(Json(filter.apply(&rows).into()))
}

async fn summary(
    State(state): State<AppState>,
    Query(filter): Query<Filter>,
) -> ServerResult<Json<DashboardSummary>> {
    let rows = state.store.latest().await?;
    Ok(Json(DashboardSummary::build(&rows, &filter)))
}

async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ServerResult<Json<TransactionList>> {
    let rows = state.store.latest().await?;
    Ok(Json(dashboard::recent(&rows, query.n).into()))
}

async fn export(
    State(state): State<AppState>,
    Query(filter): Query<Filter>,
) -> ServerResult<impl IntoResponse> {
    let rows = filter.apply(&state.store.latest().await?);
    let body = dashboard::to_csv(&rows)
        .map_err(|e| ServerError::Internal(format!("CSV export failed: {}", e)))?;

    let file_name = format!(
        "card_transactions_{}.csv",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedTransaction, RiskLevel, Transaction};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "cardwatch-test-boundary";

    async fn empty_state() -> AppState {
        AppState {
            config: Arc::new(AppConfig::default()),
            store: TransactionStore::connect_url("sqlite::memory:", 1).await.unwrap(),
        }
    }

    fn upload_request(file_name: Option<&str>, content: &[u8]) -> Request<Body> {
        let disposition = match file_name {
            Some(name) => format!("form-data; name=\"file\"; filename=\"{}\"", name),
            None => "form-data; name=\"file\"".to_string(),
        };
        let mut body = format!(
            "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, disposition
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn large_csv(rows: usize) -> Vec<u8> {
        let mut csv = String::from("txn_id,cust_id,amount,location_city\n");
        for i in 0..rows {
            csv.push_str(&format!(
                "TXN{:07},CUST{:03},{}.25,Mumbai Andheri East\n",
                i,
                i % 50,
                100 + i % 7
            ));
        }
        csv.into_bytes()
    }

    #[tokio::test]
    async fn test_upload_classifies_and_stores() {
        let state = empty_state().await;
        let csv = b"txn_id,cust_id,amount,fraud_flag\nT1,A,100,0\nT2,A,100,0\nT3,A,700,1\nT4,B,50,0\n,B,10,0\n";

        let (status, body) = send(state.clone(), upload_request(Some("march.csv"), csv)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "warning");
        assert_eq!(body["sourceFile"], "march.csv");
        assert_eq!(body["metadata"]["rowsRead"], 5);
        assert_eq!(body["metadata"]["rowsKept"], 4);
        assert_eq!(body["metadata"]["riskCounts"]["High Risk"], 1);
        assert_eq!(body["metadata"]["riskCounts"]["Normal"], 3);

        assert_eq!(state.store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_upload_unsupported_extension() {
        let state = empty_state().await;
        let (status, body) = send(state.clone(), upload_request(Some("report.pdf"), b"%PDF-1.4")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("pdf"));
        assert_eq!(state.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_missing_required_column() {
        let state = empty_state().await;
        let (status, body) = send(state.clone(), upload_request(Some("x.csv"), b"txn_id,amount\nT1,5\n")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("customer_id"));
        assert_eq!(state.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_without_file_name() {
        let state = empty_state().await;
        let (status, body) = send(state, upload_request(None, b"txn_id,cust_id,amount\nT1,A,1\n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("no name"));
    }

    #[tokio::test]
    async fn test_upload_larger_than_two_megabytes() {
        let state = empty_state().await;
        let csv = large_csv(60_000);
        assert!(csv.len() > 2 * 1024 * 1024);

        let (status, body) = send(state.clone(), upload_request(Some("big.csv"), &csv)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["rowsKept"], 60_000);
        assert_eq!(state.store.count().await.unwrap(), 60_000);
    }

    #[tokio::test]
    async fn test_upload_over_configured_limit() {
        let mut config = AppConfig::default();
        config.server.max_upload_mb = 1;
        let state = AppState {
            config: Arc::new(config),
            store: TransactionStore::connect_url("sqlite::memory:", 1).await.unwrap(),
        };

        let (status, body) = send(state.clone(), upload_request(Some("big.csv"), &large_csv(60_000))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["status"], "error");
        assert_eq!(state.store.count().await.unwrap(), 0);
    }

    async fn state_with_rows() -> AppState {
        let store = TransactionStore::connect_url("sqlite::memory:", 1).await.unwrap();
        let rows = vec![
            ClassifiedTransaction {
                transaction: Transaction::new("T1", Some("C1"), 100.0),
                risk_level: RiskLevel::Normal,
            },
            ClassifiedTransaction {
                transaction: Transaction::new("T2", Some("C2"), 900.0).with_fraud(true),
                risk_level: RiskLevel::High,
            },
        ];
        store.append(&rows, "seed.csv").await.unwrap();
        AppState {
            config: Arc::new(AppConfig::default()),
            store,
        }
    }

    #[tokio::test]
    async fn test_transactions_filtered() {
        let state = state_with_rows().await;
        let filter = Filter {
            risk: Some(RiskLevel::High),
            ..Filter::default()
        };

        let Json(list) = transactions(State(state), Query(filter)).await.unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.transactions[0].transaction().transaction_id, "T2");
    }

    #[tokio::test]
    async fn test_summary_metrics() {
        let state = state_with_rows().await;
        let Json(body) = summary(State(state), Query(Filter::default())).await.unwrap();
        assert_eq!(body.metrics.total_transactions, 2);
        assert_eq!(body.metrics.high_risk, 1);
        assert_eq!(body.metrics.total_amount, 1000.0);
    }

    #[tokio::test]
    async fn test_recent_limits_rows() {
        let state = state_with_rows().await;
        let Json(list) = recent(State(state), Query(RecentQuery { n: 1 })).await.unwrap();
        assert_eq!(list.total, 1);
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
