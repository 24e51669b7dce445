use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};

use crate::{
    dto::card_keys::{BatchDeleteRequest, CardKeyList, ImportRequest, ImportResult},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::CardKeyListQuery,
    services::card_key_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_card_keys))
        .route("/import", post(import_card_keys))
        .route("/batch-delete", post(batch_delete_card_keys))
        .route("/{id}", axum::routing::delete(delete_card_key))
}

#[utoipa::path(get, path = "/api/card-keys", tag = "CardKeys")]
pub async fn list_card_keys(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CardKeyListQuery>,
) -> AppResult<Json<ApiResponse<CardKeyList>>> {
    let resp = card_key_service::list_card_keys(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/card-keys/import",
    request_body = ImportRequest,
    tag = "CardKeys"
)]
pub async fn import_card_keys(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ImportRequest>,
) -> AppResult<Json<ApiResponse<ImportResult>>> {
    let resp = card_key_service::bulk_import(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(delete, path = "/api/card-keys/{id}", tag = "CardKeys")]
pub async fn delete_card_key(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = card_key_service::delete_card_key(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/card-keys/batch-delete",
    request_body = BatchDeleteRequest,
    tag = "CardKeys"
)]
pub async fn batch_delete_card_keys(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<BatchDeleteRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = card_key_service::batch_delete(&state, &user, payload).await?;
    Ok(Json(resp))
}
