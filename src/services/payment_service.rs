//! Purchase orchestration and the callback reconciler.
//!
//! Inbound events, whether pushed by the gateway or pulled by a status poll,
//! are verified and normalized here, then handed to
//! `order_service::apply_gateway_confirmation` exactly once per payment.

use chrono::{DateTime, Utc};

use crate::{
    audit::log_audit,
    dto::orders::{OrderStatus, PurchaseRequest, PurchaseResponse},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Order,
    payment::client::{CallbackParams, CreatePaymentRequest},
    response::{ApiResponse, Meta},
    services::order_service::{self, GatewayConfirmation, ORDER_COMPLETED, ORDER_PAID, ORDER_PENDING},
    state::AppState,
};

pub const PAY_METHOD_GATEWAY: &str = "gateway";
pub const PAY_METHOD_FREE: &str = "free";

const GATEWAY_STATUS_COMPLETED: &str = "completed";

/// Create a pending order and start payment.
///
/// With the gateway configured this issues a payment request and hands the
/// payment URL back; a gateway failure leaves the pending order in place so
/// the user can retry. With no gateway configured the order completes
/// immediately through the same guarded confirmation path as a webhook.
pub async fn purchase(
    state: &AppState,
    user: &AuthUser,
    req: PurchaseRequest,
) -> AppResult<ApiResponse<PurchaseResponse>> {
    let (order, product) = order_service::create_pending(state, user, &req).await?;

    if !state.payment.is_configured() {
        let order = complete_free(state, &order).await?;
        return Ok(ApiResponse::success(
            "Order completed",
            PurchaseResponse {
                order_no: order.order_no,
                status: order.status,
                payment_url: None,
            },
            Some(Meta::empty()),
        ));
    }

    let pay = state
        .payment
        .create_payment(&CreatePaymentRequest {
            amount: order.total_amount,
            description: format!("{} x{}", product.name, order.quantity),
            order_id: order.order_no.clone(),
        })
        .await?;

    order_service::attach_payment_intent(
        state,
        order.id,
        &pay.transaction_id,
        Some(&pay.payment_url),
    )
    .await?;

    Ok(ApiResponse::success(
        "Order created",
        PurchaseResponse {
            order_no: order.order_no,
            status: order.status,
            payment_url: Some(pay.payment_url),
        },
        Some(Meta::empty()),
    ))
}

/// Free mode: a synthetic transaction reference routes the order through the
/// same pending-state guard the webhook path uses, so the free flow cannot
/// double-allocate either.
async fn complete_free(state: &AppState, order: &Order) -> AppResult<Order> {
    let transaction_id = format!("free-{}", order.order_no);
    order_service::attach_payment_intent(state, order.id, &transaction_id, None).await?;
    order_service::apply_gateway_confirmation(
        state,
        GatewayConfirmation {
            transaction_id,
            amount: order.total_amount,
            platform_fee: 0,
            merchant_points: 0,
            paid_at: Utc::now(),
            pay_method: PAY_METHOD_FREE.to_string(),
        },
    )
    .await
}

/// Re-issue payment for a still-pending order at its original total.
pub async fn repay(
    state: &AppState,
    user: &AuthUser,
    order_no: &str,
) -> AppResult<ApiResponse<PurchaseResponse>> {
    if !state.payment.is_configured() {
        return Err(AppError::BadRequest("Payment is not configured".into()));
    }

    let order = order_service::find_by_order_no(state, order_no).await?;
    if order.user_id != user.user_id {
        return Err(AppError::OrderNotFound);
    }
    if order.status != ORDER_PENDING {
        return Err(AppError::BadRequest("Order is not pending".into()));
    }
    if let Some(expires_at) = order.expires_at {
        if expires_at < Utc::now() {
            return Err(AppError::BadRequest("Order has expired".into()));
        }
    }

    let pay = state
        .payment
        .create_payment(&CreatePaymentRequest {
            amount: order.total_amount,
            description: format!("Order {}", order.order_no),
            order_id: order.order_no.clone(),
        })
        .await?;

    order_service::attach_payment_intent(
        state,
        order.id,
        &pay.transaction_id,
        Some(&pay.payment_url),
    )
    .await?;

    Ok(ApiResponse::success(
        "Payment re-issued",
        PurchaseResponse {
            order_no: order.order_no,
            status: order.status,
            payment_url: Some(pay.payment_url),
        },
        Some(Meta::empty()),
    ))
}

/// Webhook entry point. The signature is verified before any field is
/// trusted; a bad signature is a hard reject and nothing is applied.
pub async fn process_callback(
    state: &AppState,
    params: CallbackParams,
    received_signature: &str,
) -> AppResult<Order> {
    if !state.payment.is_configured() {
        return Err(AppError::InvalidSignature);
    }

    if !state.payment.verify_callback(&params, received_signature) {
        tracing::warn!(
            transaction_id = %params.transaction_id,
            "rejected payment callback with invalid signature"
        );
        return Err(AppError::InvalidSignature);
    }

    if params.status != GATEWAY_STATUS_COMPLETED {
        return Err(AppError::BadRequest(format!(
            "Payment not completed: {}",
            params.status
        )));
    }

    let order = order_service::apply_gateway_confirmation(
        state,
        GatewayConfirmation {
            transaction_id: params.transaction_id.clone(),
            amount: params.amount,
            platform_fee: params.platform_fee,
            merchant_points: params.merchant_points,
            paid_at: parse_paid_at(&params.paid_at),
            pay_method: PAY_METHOD_GATEWAY.to_string(),
        },
    )
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(order.user_id),
        "payment_callback",
        Some("orders"),
        Some(serde_json::json!({
            "order_no": order.order_no,
            "transaction_id": params.transaction_id,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(order)
}

/// Poll fallback for when no webhook has arrived. A status other than
/// completed is a no-op; a gateway error degrades to reading the stored
/// state rather than failing the poll.
pub async fn poll_order(
    state: &AppState,
    order_no: &str,
) -> AppResult<ApiResponse<OrderStatus>> {
    let mut order = order_service::find_by_order_no(state, order_no).await?;

    if order.status == ORDER_PENDING && state.payment.is_configured() {
        if let Some(transaction_id) = order.transaction_id.clone() {
            match state.payment.query_payment(&transaction_id).await {
                Ok(snapshot) if snapshot.status == GATEWAY_STATUS_COMPLETED => {
                    let confirmation = GatewayConfirmation {
                        transaction_id,
                        amount: snapshot.amount,
                        platform_fee: snapshot.platform_fee,
                        merchant_points: snapshot.merchant_points,
                        paid_at: snapshot
                            .paid_at
                            .as_deref()
                            .map(parse_paid_at)
                            .unwrap_or_else(Utc::now),
                        pay_method: PAY_METHOD_GATEWAY.to_string(),
                    };
                    match order_service::apply_gateway_confirmation(state, confirmation).await {
                        Ok(updated) => order = updated,
                        Err(err) => {
                            tracing::warn!(
                                order_no = %order.order_no,
                                error = %err,
                                "poll confirmation not applied"
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        order_no = %order.order_no,
                        error = %err,
                        "payment status query failed"
                    );
                }
            }
        }
    }

    let paid = order.status == ORDER_COMPLETED || order.status == ORDER_PAID;
    Ok(ApiResponse::success(
        "Order status",
        OrderStatus {
            order_no: order.order_no,
            status: order.status,
            paid,
        },
        Some(Meta::empty()),
    ))
}

fn parse_paid_at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
