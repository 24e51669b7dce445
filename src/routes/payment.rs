use axum::{
    Router,
    extract::{Query, State},
    response::Redirect,
    routing::get,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    payment::client::CallbackParams, services::payment_service, state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/callback", get(payment_callback))
}

/// Raw query fields of a gateway callback. Amounts arrive as base-10
/// integer text and must round-trip unchanged into the signature check.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackQuery {
    pub transaction_id: String,
    pub external_reference: String,
    pub amount: i64,
    pub platform_fee: i64,
    pub merchant_points: i64,
    pub status: String,
    pub paid_at: String,
    pub signature: String,
}

/// The gateway redirects the buyer here after payment. Processing is
/// idempotent; a replayed callback lands on the same order page.
#[utoipa::path(get, path = "/api/payment/callback", tag = "Payment")]
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let order_no = query.external_reference.clone();
    let params = CallbackParams {
        transaction_id: query.transaction_id,
        external_reference: query.external_reference,
        amount: query.amount,
        platform_fee: query.platform_fee,
        merchant_points: query.merchant_points,
        status: query.status,
        paid_at: query.paid_at,
    };

    match payment_service::process_callback(&state, params, &query.signature).await {
        Ok(order) => Redirect::to(&format!("/order/{}?success=paid", order.order_no)),
        Err(err) => {
            tracing::warn!(order_no = %order_no, error = %err, "payment callback rejected");
            Redirect::to(&format!("/order/{}?error={}", order_no, err.code()))
        }
    }
}
