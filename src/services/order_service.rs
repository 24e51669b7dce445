//! Order lifecycle: pending -> paid -> completed, pending -> cancelled.
//!
//! `apply_gateway_confirmation` is the only routine that turns a confirmed
//! payment into sold inventory. Webhook, poll and free-mode flows all go
//! through it; the pending-state guard under a row lock makes replays and
//! concurrent deliveries no-ops.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::OrmConn,
    dto::orders::{OrderList, OrderWithKeys, PurchaseRequest},
    entity::{
        card_keys::{Column as KeyCol, Entity as CardKeys},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{ensure_admin, AuthUser},
    models::Order,
    response::{ApiResponse, Meta},
    routes::params::OrderListQuery,
    services::card_key_service,
    state::AppState,
};

pub const ORDER_PENDING: &str = "pending";
pub const ORDER_PAID: &str = "paid";
pub const ORDER_COMPLETED: &str = "completed";
pub const ORDER_CANCELLED: &str = "cancelled";

/// Window a pending order has to complete before the sweeper cancels it.
pub const ORDER_EXPIRY_MINUTES: i64 = 30;

/// A verified, normalized payment event. Built by the callback reconciler
/// (webhook or poll) or by the free-mode flow.
#[derive(Debug, Clone)]
pub struct GatewayConfirmation {
    pub transaction_id: String,
    /// Gateway points, 1:1 with minor currency units.
    pub amount: i64,
    pub platform_fee: i64,
    pub merchant_points: i64,
    pub paid_at: DateTime<Utc>,
    pub pay_method: String,
}

/// Externally visible order number: UTC second timestamp plus a 4-digit
/// disambiguator.
fn generate_order_no() -> String {
    let now = Utc::now();
    format!(
        "{}{:04}",
        now.format("%Y%m%d%H%M%S"),
        now.timestamp_subsec_nanos() % 10_000
    )
}

/// Create a pending order. Stock is checked read-only; no keys are reserved
/// until a payment is confirmed.
pub async fn create_pending(
    state: &AppState,
    user: &AuthUser,
    req: &PurchaseRequest,
) -> AppResult<(Order, ProductModel)> {
    if req.quantity < 1 {
        return Err(AppError::BadRequest("Quantity must be at least 1".into()));
    }

    let product = Products::find_by_id(req.product_id)
        .one(&state.orm)
        .await?
        .filter(|p| p.is_active)
        .ok_or(AppError::ProductNotFound)?;

    let available = card_key_service::count_available(&state.orm, product.id).await?;
    if available < req.quantity as i64 {
        return Err(AppError::InsufficientStock);
    }

    let total_amount = product.price * req.quantity as i64;
    let expires_at = Utc::now() + Duration::minutes(ORDER_EXPIRY_MINUTES);

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        order_no: Set(generate_order_no()),
        user_id: Set(user.user_id),
        product_id: Set(product.id),
        quantity: Set(req.quantity),
        total_amount: Set(total_amount),
        status: Set(ORDER_PENDING.to_string()),
        pay_method: Set(String::new()),
        contact: Set(req.contact.clone()),
        remark: Set(req.remark.clone()),
        transaction_id: Set(None),
        payment_url: Set(None),
        platform_fee: Set(0),
        merchant_points: Set(0),
        expires_at: Set(Some(expires_at.into())),
        paid_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_create",
        Some("orders"),
        Some(serde_json::json!({ "order_no": order.order_no, "total": total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok((order_from_entity(order), product))
}

/// Record the gateway's transaction reference on a pending order. Safe to
/// call again on repay; a settled order no longer accepts one.
pub async fn attach_payment_intent(
    state: &AppState,
    order_id: Uuid,
    transaction_id: &str,
    payment_url: Option<&str>,
) -> AppResult<()> {
    let res = Orders::update_many()
        .col_expr(OrderCol::TransactionId, Expr::value(transaction_id.to_string()))
        .col_expr(
            OrderCol::PaymentUrl,
            Expr::value(payment_url.map(|s| s.to_string())),
        )
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(OrderCol::Id.eq(order_id))
        .filter(OrderCol::Status.eq(ORDER_PENDING))
        .exec(&state.orm)
        .await?;

    if res.rows_affected == 0 {
        return Err(AppError::OrderNotFound);
    }
    Ok(())
}

/// Apply a confirmed payment exactly once.
///
/// Runs in one transaction with the order row locked: replayed webhooks and
/// concurrent polls find the order already advanced and return it untouched.
/// An amount mismatch leaves the order pending for manual reconciliation.
pub async fn apply_gateway_confirmation(
    state: &AppState,
    confirmation: GatewayConfirmation,
) -> AppResult<Order> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(OrderCol::TransactionId.eq(confirmation.transaction_id.as_str()))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if order.status != ORDER_PENDING {
        // Idempotent replay: already settled (or cancelled), no side effects.
        txn.commit().await?;
        return Ok(order_from_entity(order));
    }

    if confirmation.amount != order.total_amount {
        tracing::warn!(
            order_no = %order.order_no,
            expected = order.total_amount,
            reported = confirmation.amount,
            "payment amount mismatch; order left pending"
        );
        return Err(AppError::AmountMismatch);
    }

    let product_id = order.product_id;
    let quantity = order.quantity;
    let order_id = order.id;

    // Capture the payment before allocating so an empty shelf cannot lose it.
    let mut active: OrderActive = order.into();
    active.status = Set(ORDER_PAID.to_string());
    active.pay_method = Set(confirmation.pay_method.clone());
    active.paid_at = Set(Some(confirmation.paid_at.into()));
    active.platform_fee = Set(confirmation.platform_fee);
    active.merchant_points = Set(confirmation.merchant_points);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    match card_key_service::allocate(&txn, product_id, quantity, order_id).await {
        Ok(_) => {}
        Err(AppError::InsufficientStock) => {
            // Paid but out of keys: keep the payment, alert an operator,
            // never report failure back to the gateway.
            txn.commit().await?;
            tracing::error!(
                order_no = %order.order_no,
                "payment captured with insufficient stock; manual fulfilment required"
            );
            return Ok(order_from_entity(order));
        }
        Err(err) => return Err(err),
    }

    let mut active: OrderActive = order.into();
    active.status = Set(ORDER_COMPLETED.to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    Products::update_many()
        .col_expr(
            ProdCol::SalesCount,
            Expr::col(ProdCol::SalesCount).add(quantity),
        )
        .filter(ProdCol::Id.eq(product_id))
        .exec(&txn)
        .await?;

    card_key_service::recompute_stock(&txn, product_id).await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(order.user_id),
        "order_completed",
        Some("orders"),
        Some(serde_json::json!({
            "order_no": order.order_no,
            "transaction_id": confirmation.transaction_id,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(order_from_entity(order))
}

/// User-initiated cancellation, pending orders only. No inventory was ever
/// reserved, so there is nothing to release.
pub async fn cancel(
    state: &AppState,
    user: &AuthUser,
    order_no: &str,
) -> AppResult<ApiResponse<Order>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::OrderNo.eq(order_no))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if order.status != ORDER_PENDING {
        return Err(AppError::BadRequest("Order is not pending".into()));
    }

    // Status-guarded so a racing confirmation or sweep wins cleanly.
    let res = Orders::update_many()
        .col_expr(OrderCol::Status, Expr::value(ORDER_CANCELLED))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(OrderCol::Id.eq(order.id))
        .filter(OrderCol::Status.eq(ORDER_PENDING))
        .exec(&state.orm)
        .await?;
    if res.rows_affected == 0 {
        return Err(AppError::BadRequest("Order is not pending".into()));
    }

    let order = Orders::find_by_id(order.id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        Some("orders"),
        Some(serde_json::json!({ "order_no": order.order_no })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order cancelled",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

/// Cancel all pending orders past their deadline. One conditional UPDATE, so
/// it can run beside user cancels and payment confirmations; whichever lands
/// first wins the status guard.
pub async fn sweep_expired(conn: &OrmConn) -> AppResult<u64> {
    let res = Orders::update_many()
        .col_expr(OrderCol::Status, Expr::value(ORDER_CANCELLED))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(OrderCol::Status.eq(ORDER_PENDING))
        .filter(OrderCol::ExpiresAt.lt(Utc::now()))
        .exec(conn)
        .await?;
    Ok(res.rows_affected)
}

pub async fn find_by_order_no(state: &AppState, order_no: &str) -> AppResult<Order> {
    let order = Orders::find()
        .filter(OrderCol::OrderNo.eq(order_no))
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    Ok(order_from_entity(order))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let finder = Orders::find()
        .filter(condition)
        .order_by_desc(OrderCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Order detail for its owner. Bound card key secrets are only revealed once
/// the order is completed.
pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    order_no: &str,
) -> AppResult<ApiResponse<OrderWithKeys>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::OrderNo.eq(order_no))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    let card_keys = if order.status == ORDER_COMPLETED {
        CardKeys::find()
            .filter(KeyCol::OrderId.eq(order.id))
            .order_by_asc(KeyCol::Id)
            .all(&state.orm)
            .await?
            .into_iter()
            .map(card_key_service::card_key_from_entity)
            .collect()
    } else {
        Vec::new()
    };

    Ok(ApiResponse::success(
        "Order",
        OrderWithKeys {
            order: order_from_entity(order),
            card_keys,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let finder = Orders::find()
        .filter(condition)
        .order_by_desc(OrderCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        order_no: model.order_no,
        user_id: model.user_id,
        product_id: model.product_id,
        quantity: model.quantity,
        total_amount: model.total_amount,
        status: model.status,
        pay_method: model.pay_method,
        contact: model.contact,
        remark: model.remark,
        transaction_id: model.transaction_id,
        payment_url: model.payment_url,
        platform_fee: model.platform_fee,
        merchant_points: model.merchant_points,
        expires_at: model.expires_at.map(|dt| dt.with_timezone(&Utc)),
        paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::generate_order_no;

    #[test]
    fn order_no_is_timestamp_plus_disambiguator() {
        let no = generate_order_no();
        assert_eq!(no.len(), 18);
        assert!(no.chars().all(|c| c.is_ascii_digit()));
    }
}
