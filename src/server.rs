//! JSON HTTP server.
//!
//! Exposes search, chat, and mirrored product writes over a small JSON
//! API. There is no HTML and no authentication; put the server behind a
//! gateway if it must be reachable from outside the host.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | Retrieve ids and texts for a query |
//! | `POST` | `/chatbot` | One conversation turn grounded on retrieval |
//! | `GET`  | `/products` | List every product |
//! | `POST` | `/products` | Create a product and index it |
//! | `GET`  | `/products/{id}` | Fetch one product |
//! | `PATCH` | `/products/{id}` | Update columns of one product and re-index it |
//! | `POST` | `/products/delete` | Delete products by metadata filter |
//! | `GET`  | `/index/audit` | Compare catalog ids with indexed ids |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `model_unavailable` (503, retry later), `timeout` (504), `internal` (500).
//! Malformed or incomplete JSON bodies are `bad_request` as well.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use catalog_rag_core::filter::MetadataFilter;
use catalog_rag_core::models::ProductRecord;
use catalog_rag_core::RagError;

use crate::audit::AuditReport;
use crate::catalog::{CatalogError, Row};
use crate::config::Config;
use crate::service::{NewProduct, ProductService, ServiceError};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<ProductService>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(ProductService::open(config).await?);
    let app = router(service);

    let bind_addr = config.server.bind.clone();
    log::info!("listening on http://{}", bind_addr);
    println!("catalog-rag server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router over an already opened service.
pub fn router(service: Arc<ProductService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/chatbot", post(handle_chatbot))
        .route(
            "/products",
            get(handle_list_products).post(handle_create_product),
        )
        .route(
            "/products/{id}",
            get(handle_get_product).patch(handle_update_product),
        )
        .route("/products/delete", post(handle_delete_products))
        .route("/index/audit", get(handle_audit))
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// [`Json`] body whose rejections use the error contract above.
struct ApiJson<T>(T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| bad_request(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "not_found", message),
            ServiceError::Invalid(_) => bad_request(message),
            ServiceError::Catalog(CatalogError::Database(e)) => {
                log::error!("catalog database error: {}", e);
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
            ServiceError::Catalog(_) => bad_request(message),
            ServiceError::Rag(rag) => classify_rag_error(rag, message),
        }
    }
}

fn classify_rag_error(err: RagError, message: String) -> AppError {
    match err {
        RagError::Invalid(_) => bad_request(message),
        RagError::DuplicateItem(_) | RagError::IndexInconsistency { .. } => {
            AppError::new(StatusCode::CONFLICT, "conflict", message)
        }
        RagError::Timeout { .. } => AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message),
        RagError::Embedding(_) | RagError::ConversationModel(_) => {
            AppError::new(StatusCode::SERVICE_UNAVAILABLE, "model_unavailable", message)
        }
        other => {
            log::error!("internal error: {}", other);
            AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
}

/// Field names kept from the JSON shape existing clients already parse.
#[derive(Serialize)]
struct SearchResponse {
    ids_lists: Vec<i64>,
    texts_list: Vec<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let retrieval = state.service.search(&req.query).await?;
    Ok(Json(SearchResponse {
        ids_lists: retrieval.ids,
        texts_list: retrieval.texts,
    }))
}

// ============ POST /chatbot ============

#[derive(Deserialize)]
struct ChatRequest {
    text: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    thread_id: String,
}

/// A missing `thread_id` starts a new thread; its id is returned.
async fn handle_chatbot(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let thread_id = req
        .thread_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let response = state.service.chat(&req.text, &thread_id).await?;
    Ok(Json(ChatResponse {
        response,
        thread_id,
    }))
}

// ============ /products ============

async fn handle_create_product(
    State(state): State<AppState>,
    ApiJson(product): ApiJson<NewProduct>,
) -> Result<(StatusCode, Json<ProductRecord>), AppError> {
    let record = state.service.create_product(&product).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn handle_list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductRecord>>, AppError> {
    Ok(Json(state.service.list_products().await?))
}

async fn handle_get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductRecord>, AppError> {
    Ok(Json(state.service.get_product(id).await?))
}

/// The body is a JSON object of column names to new values.
async fn handle_update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(changes): ApiJson<Row>,
) -> Result<Json<ProductRecord>, AppError> {
    Ok(Json(state.service.update_product(id, &changes).await?))
}

#[derive(Deserialize)]
struct DeleteRequest {
    filter: serde_json::Value,
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: Vec<i64>,
}

async fn handle_delete_products(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeleteRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    let filter = MetadataFilter::from_json(&req.filter).map_err(|e| bad_request(e.to_string()))?;
    let deleted = state.service.delete_products(&filter).await?;
    Ok(Json(DeleteResponse { deleted }))
}

// ============ GET /index/audit ============

#[derive(Serialize)]
struct AuditResponse {
    consistent: bool,
    #[serde(flatten)]
    report: AuditReport,
}

async fn handle_audit(State(state): State<AppState>) -> Result<Json<AuditResponse>, AppError> {
    let report = state.service.audit().await?;
    Ok(Json(AuditResponse {
        consistent: report.is_consistent(),
        report,
    }))
}
