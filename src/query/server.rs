use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::Hit;
use crate::error::{IndexError, StoreError};
use crate::index::DimIndex;
use crate::query::Bounds;
use crate::stats::QueryStats;
use crate::storage::MemoryStore;

pub type SharedIndex = Arc<DimIndex<Arc<MemoryStore>>>;

#[derive(Deserialize)]
pub struct PointBody {
    pub point: Vec<u64>,
    pub id: String,
}

#[derive(Deserialize)]
pub struct QueryBody {
    pub ranges: Vec<Bounds>,
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct QueryResponse {
    pub hits: Vec<Hit>,
    pub stats: QueryStats,
}

#[derive(Serialize, Deserialize)]
pub struct RemovedResponse {
    pub removed: bool,
}

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub dims: usize,
    pub precision: u32,
    pub entries: usize,
    pub reverse_map: bool,
}

pub struct ApiError(IndexError);

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IndexError::DimensionMismatch { .. }
            | IndexError::EncodingRange { .. }
            | IndexError::Configuration(_) => StatusCode::BAD_REQUEST,
            IndexError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            IndexError::Store(_) | IndexError::MalformedEntry(_) => {
                tracing::error!("request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// 基于内存索引的 JSON API
pub struct QueryServer {
    pub index: SharedIndex,
}

impl QueryServer {
    pub fn new(index: SharedIndex) -> Self {
        Self { index }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/index", post(index_handler))
            .route("/update", post(update_handler))
            .route("/unindex", post(unindex_handler))
            .route("/ids/:id", delete(unindex_id_handler))
            .route("/query", post(query_handler))
            .route("/status", get(status_handler))
            .with_state(self.index.clone())
    }

    /// 绑定 `0.0.0.0:port`；端口被占用等错误直接返回给调用方
    pub async fn bind(port: u16) -> anyhow::Result<tokio::net::TcpListener> {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        Ok(listener)
    }

    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        tracing::info!("HTTP index server listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn index_handler(
    State(index): State<SharedIndex>,
    Json(body): Json<PointBody>,
) -> Result<StatusCode, ApiError> {
    index.index(&body.point, &body.id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_handler(
    State(index): State<SharedIndex>,
    Json(body): Json<PointBody>,
) -> Result<StatusCode, ApiError> {
    index.update(&body.point, &body.id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unindex_handler(
    State(index): State<SharedIndex>,
    Json(body): Json<PointBody>,
) -> Result<StatusCode, ApiError> {
    index.unindex(&body.point, &body.id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unindex_id_handler(
    State(index): State<SharedIndex>,
    Path(id): Path<String>,
) -> Result<Json<RemovedResponse>, ApiError> {
    let removed = index.unindex_by_id(&id)?;
    Ok(Json(RemovedResponse { removed }))
}

async fn query_handler(
    State(index): State<SharedIndex>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, ApiError> {
    let (mut hits, stats) = index.query_with_stats(&body.ranges)?;
    if let Some(limit) = body.limit {
        hits.truncate(limit);
    }
    Ok(Json(QueryResponse { hits, stats }))
}

async fn status_handler(State(index): State<SharedIndex>) -> Json<StatusResponse> {
    let config = index.config();
    Json(StatusResponse {
        dims: config.dims,
        precision: config.precision,
        entries: index.store().sorted_len(index.index_namespace()),
        reverse_map: config.reverse_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_reports_port_in_use() {
        let held = QueryServer::bind(0).await.unwrap();
        let port = held.local_addr().unwrap().port();
        assert!(QueryServer::bind(port).await.is_err());
    }

    #[test]
    fn conflict_maps_to_409() {
        let resp = ApiError(IndexError::Store(StoreError::Conflict("x".into()))).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = ApiError(IndexError::DimensionMismatch { expected: 2, got: 3 }).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = ApiError(IndexError::Store(StoreError::Backend("down".into()))).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
