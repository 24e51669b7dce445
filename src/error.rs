use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::response::{ApiResponse, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Product not found or inactive")]
    ProductNotFound,

    #[error("Insufficient stock")]
    InsufficientStock,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Reported amount does not match order total")]
    AmountMismatch,

    #[error("Callback signature verification failed")]
    InvalidSignature,

    #[error("Card key already sold")]
    CardKeySold,

    #[error("Category still has products")]
    CategoryHasProducts,

    #[error("Product still has unsold card keys")]
    ProductHasCards,

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    // Optimistic-retry signal inside the inventory allocator. Retried
    // internally, never returned to a client.
    #[error("allocation conflict")]
    AllocationConflict,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Forbidden => "forbidden",
            AppError::ProductNotFound => "product_not_found",
            AppError::InsufficientStock => "insufficient_stock",
            AppError::OrderNotFound => "order_not_found",
            AppError::AmountMismatch => "amount_mismatch",
            AppError::InvalidSignature => "invalid_signature",
            AppError::CardKeySold => "card_key_sold",
            AppError::CategoryHasProducts => "category_has_products",
            AppError::ProductHasCards => "product_has_cards",
            AppError::GatewayUnavailable(_) => "gateway_unavailable",
            AppError::AllocationConflict
            | AppError::DbError(_)
            | AppError::OrmError(_)
            | AppError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorData {
    code: &'static str,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound | AppError::OrderNotFound | AppError::ProductNotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::BadRequest(_)
            | AppError::InsufficientStock
            | AppError::AmountMismatch
            | AppError::CardKeySold
            | AppError::CategoryHasProducts
            | AppError::ProductHasCards => StatusCode::BAD_REQUEST,
            AppError::Forbidden | AppError::InvalidSignature => StatusCode::FORBIDDEN,
            AppError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::AllocationConflict
            | AppError::DbError(_)
            | AppError::OrmError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                code: self.code(),
                error: self.to_string(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
