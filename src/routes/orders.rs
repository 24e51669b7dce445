use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};

use crate::{
    dto::orders::{OrderList, OrderStatus, OrderWithKeys, PurchaseRequest, PurchaseResponse},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Order,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::{order_service, payment_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(purchase))
        .route("/all", get(list_all_orders))
        .route("/{order_no}", get(get_order))
        .route("/{order_no}/pay", post(repay))
        .route("/{order_no}/cancel", post(cancel_order))
        .route("/{order_no}/status", get(order_status))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = PurchaseRequest,
    tag = "Orders"
)]
pub async fn purchase(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<PurchaseRequest>,
) -> AppResult<Json<ApiResponse<PurchaseResponse>>> {
    let resp = payment_service::purchase(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(get, path = "/api/orders", tag = "Orders")]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(get, path = "/api/orders/all", tag = "Orders")]
pub async fn list_all_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_all_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(get, path = "/api/orders/{order_no}", tag = "Orders")]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_no): Path<String>,
) -> AppResult<Json<ApiResponse<OrderWithKeys>>> {
    let resp = order_service::get_order(&state, &user, &order_no).await?;
    Ok(Json(resp))
}

#[utoipa::path(post, path = "/api/orders/{order_no}/pay", tag = "Orders")]
pub async fn repay(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_no): Path<String>,
) -> AppResult<Json<ApiResponse<PurchaseResponse>>> {
    let resp = payment_service::repay(&state, &user, &order_no).await?;
    Ok(Json(resp))
}

#[utoipa::path(post, path = "/api/orders/{order_no}/cancel", tag = "Orders")]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_no): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp = order_service::cancel(&state, &user, &order_no).await?;
    Ok(Json(resp))
}

#[utoipa::path(get, path = "/api/orders/{order_no}/status", tag = "Orders")]
pub async fn order_status(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
) -> AppResult<Json<ApiResponse<OrderStatus>>> {
    let resp = payment_service::poll_order(&state, &order_no).await?;
    Ok(Json(resp))
}
