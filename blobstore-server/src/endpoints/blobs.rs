use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing;
use axum::{Json, Router};
use blobstore_types::BlobId;

use crate::error::{ApiError, ApiResult};
use crate::state::ServiceState;

pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/blobs/{id}", routing::get(blob_get))
        .route("/blobs/{id}/properties", routing::get(properties_get))
        .route("/blobs/{id}/usermetadata", routing::get(user_metadata_get))
}

fn parse_blob_id(id: &str) -> ApiResult<BlobId> {
    id.parse()
        .map_err(|error| ApiError::BadRequest(format!("invalid blob id {id:?}: {error}")))
}

async fn blob_get(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let blob_id = parse_blob_id(&id)?;
    let stream = state
        .coordinator
        .get_blob(&blob_id, state.operation_timeout())
        .await?;

    let headers = [(header::CONTENT_TYPE, "application/octet-stream")];
    Ok((headers, Body::from_stream(stream)).into_response())
}

async fn properties_get(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let blob_id = parse_blob_id(&id)?;
    let properties = state
        .coordinator
        .get_blob_properties(&blob_id, state.operation_timeout())
        .await?;

    Ok(Json(properties).into_response())
}

async fn user_metadata_get(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let blob_id = parse_blob_id(&id)?;
    let metadata = state
        .coordinator
        .get_user_metadata(&blob_id, state.operation_timeout())
        .await?;

    let headers = [(header::CONTENT_TYPE, "application/octet-stream")];
    Ok((headers, Body::from(metadata)).into_response())
}
