//! Inventory allocator for card keys.
//!
//! `reserve_batch` + `commit` is the contended pair: two confirmations racing
//! for the same product must never sell the same key. Selection is optimistic;
//! the commit is a single status-guarded UPDATE whose row count tells the
//! loser to retry.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::card_keys::{BatchDeleteRequest, CardKeyList, ImportRequest, ImportResult},
    entity::{
        card_keys::{ActiveModel as CardKeyActive, Column as KeyCol, Entity as CardKeys, Model as CardKeyModel},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{ensure_admin, AuthUser},
    models::CardKey,
    response::{ApiResponse, Meta},
    routes::params::CardKeyListQuery,
    state::AppState,
};

pub const KEY_AVAILABLE: &str = "available";
pub const KEY_SOLD: &str = "sold";
pub const KEY_LOCKED: &str = "locked";

const MAX_ALLOCATE_ATTEMPTS: usize = 3;

/// Select exactly `quantity` available keys for the product, oldest first.
pub async fn reserve_batch<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<Vec<i64>> {
    let ids: Vec<i64> = CardKeys::find()
        .filter(KeyCol::ProductId.eq(product_id))
        .filter(KeyCol::Status.eq(KEY_AVAILABLE))
        .order_by_asc(KeyCol::Id)
        .limit(quantity as u64)
        .all(conn)
        .await?
        .into_iter()
        .map(|k| k.id)
        .collect();

    if ids.len() < quantity as usize {
        return Err(AppError::InsufficientStock);
    }
    Ok(ids)
}

/// Mark the reserved keys sold and bind them to the order. The status guard
/// makes this a compare-and-swap: if any key was claimed since selection the
/// row count comes up short and nothing may be kept.
pub async fn commit<C: ConnectionTrait>(
    conn: &C,
    ids: &[i64],
    order_id: Uuid,
) -> AppResult<()> {
    let res = CardKeys::update_many()
        .col_expr(KeyCol::Status, Expr::value(KEY_SOLD))
        .col_expr(KeyCol::OrderId, Expr::value(order_id))
        .col_expr(KeyCol::SoldAt, Expr::value(Utc::now()))
        .filter(KeyCol::Id.is_in(ids.to_vec()))
        .filter(KeyCol::Status.eq(KEY_AVAILABLE))
        .exec(conn)
        .await?;

    if res.rows_affected != ids.len() as u64 {
        return Err(AppError::AllocationConflict);
    }
    Ok(())
}

/// Reserve and commit with bounded optimistic retry. Each commit attempt runs
/// in a savepoint so a lost race rolls back cleanly before reselecting.
pub async fn allocate<C: ConnectionTrait + TransactionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
    order_id: Uuid,
) -> AppResult<Vec<i64>> {
    for attempt in 1..=MAX_ALLOCATE_ATTEMPTS {
        let ids = reserve_batch(conn, product_id, quantity).await?;
        let nested = conn.begin().await?;
        match commit(&nested, &ids, order_id).await {
            Ok(()) => {
                nested.commit().await?;
                return Ok(ids);
            }
            Err(AppError::AllocationConflict) => {
                nested.rollback().await?;
                tracing::debug!(%product_id, attempt, "allocation conflict, reselecting");
            }
            Err(err) => {
                nested.rollback().await?;
                return Err(err);
            }
        }
    }
    Err(AppError::InsufficientStock)
}

/// Refresh the cached stock counter from the live count of available keys.
pub async fn recompute_stock<C: ConnectionTrait>(conn: &C, product_id: Uuid) -> AppResult<i64> {
    let count = CardKeys::find()
        .filter(KeyCol::ProductId.eq(product_id))
        .filter(KeyCol::Status.eq(KEY_AVAILABLE))
        .count(conn)
        .await? as i64;

    Products::update_many()
        .col_expr(ProdCol::StockCount, Expr::value(count as i32))
        .filter(ProdCol::Id.eq(product_id))
        .exec(conn)
        .await?;

    Ok(count)
}

pub async fn count_available<C: ConnectionTrait>(conn: &C, product_id: Uuid) -> AppResult<i64> {
    let count = CardKeys::find()
        .filter(KeyCol::ProductId.eq(product_id))
        .filter(KeyCol::Status.eq(KEY_AVAILABLE))
        .count(conn)
        .await?;
    Ok(count as i64)
}

/// One import line: card number, optionally `----`-separated password.
fn parse_import_line(line: &str) -> Option<(String, Option<String>)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once("----") {
        Some((no, pwd)) => {
            let no = no.trim();
            if no.is_empty() {
                return None;
            }
            let pwd = pwd.trim();
            Some((
                no.to_string(),
                (!pwd.is_empty()).then(|| pwd.to_string()),
            ))
        }
        None => Some((line.to_string(), None)),
    }
}

pub async fn bulk_import(
    state: &AppState,
    user: &AuthUser,
    payload: ImportRequest,
) -> AppResult<ApiResponse<ImportResult>> {
    ensure_admin(user)?;

    let product = Products::find_by_id(payload.product_id)
        .one(&state.orm)
        .await?;
    if product.is_none() {
        return Err(AppError::ProductNotFound);
    }

    let mut created = 0usize;
    for line in payload.cards_text.lines() {
        let Some((card_no, card_pwd)) = parse_import_line(line) else {
            continue;
        };
        let active = CardKeyActive {
            id: NotSet,
            product_id: Set(payload.product_id),
            card_no: Set(card_no),
            card_pwd: Set(card_pwd),
            status: Set(KEY_AVAILABLE.to_string()),
            order_id: Set(None),
            sold_at: Set(None),
            created_at: NotSet,
        };
        // Malformed or duplicate lines are skipped, not fatal to the batch.
        match active.insert(&state.orm).await {
            Ok(_) => created += 1,
            Err(err) => {
                tracing::warn!(error = %err, "skipping card key import line");
            }
        }
    }

    recompute_stock(&state.orm, payload.product_id).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "card_keys_import",
        Some("card_keys"),
        Some(serde_json::json!({ "product_id": payload.product_id, "created": created })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Card keys imported",
        ImportResult { created },
        Some(Meta::empty()),
    ))
}

pub async fn list_card_keys(
    state: &AppState,
    user: &AuthUser,
    query: CardKeyListQuery,
) -> AppResult<ApiResponse<CardKeyList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut finder = CardKeys::find();
    if let Some(product_id) = query.product_id {
        finder = finder.filter(KeyCol::ProductId.eq(product_id));
    }
    finder = finder
        .order_by_asc(KeyCol::Status)
        .order_by_desc(KeyCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(card_key_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Card keys",
        CardKeyList { items },
        Some(meta),
    ))
}

/// Sold keys are immutable and may never be deleted.
pub async fn delete_card_key(
    state: &AppState,
    user: &AuthUser,
    id: i64,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let key = CardKeys::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if key.status == KEY_SOLD {
        return Err(AppError::CardKeySold);
    }

    CardKeys::delete_by_id(id).exec(&state.orm).await?;
    recompute_stock(&state.orm, key.product_id).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "card_key_delete",
        Some("card_keys"),
        Some(serde_json::json!({ "card_key_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Card key deleted",
        serde_json::json!({ "id": id }),
        Some(Meta::empty()),
    ))
}

/// Batch delete of unsold keys; sold keys in the list are silently kept.
pub async fn batch_delete(
    state: &AppState,
    user: &AuthUser,
    payload: BatchDeleteRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let products: Vec<Uuid> = CardKeys::find()
        .filter(KeyCol::Id.is_in(payload.ids.clone()))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|k| k.product_id)
        .collect();

    let res = CardKeys::delete_many()
        .filter(KeyCol::Id.is_in(payload.ids.clone()))
        .filter(KeyCol::Status.ne(KEY_SOLD))
        .exec(&state.orm)
        .await?;

    let mut seen = Vec::new();
    for product_id in products {
        if !seen.contains(&product_id) {
            recompute_stock(&state.orm, product_id).await?;
            seen.push(product_id);
        }
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "card_keys_batch_delete",
        Some("card_keys"),
        Some(serde_json::json!({ "deleted": res.rows_affected })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Card keys deleted",
        serde_json::json!({ "deleted": res.rows_affected }),
        Some(Meta::empty()),
    ))
}

pub fn card_key_from_entity(model: CardKeyModel) -> CardKey {
    CardKey {
        id: model.id,
        product_id: model.product_id,
        card_no: model.card_no,
        card_pwd: model.card_pwd,
        status: model.status,
        order_id: model.order_id,
        sold_at: model.sold_at.map(|dt| dt.with_timezone(&chrono::Utc)),
        created_at: model.created_at.with_timezone(&chrono::Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_import_line;

    #[test]
    fn parses_card_number_with_password() {
        assert_eq!(
            parse_import_line("ABC-123----secret"),
            Some(("ABC-123".to_string(), Some("secret".to_string())))
        );
    }

    #[test]
    fn parses_bare_card_number() {
        assert_eq!(
            parse_import_line("ABC-123"),
            Some(("ABC-123".to_string(), None))
        );
    }

    #[test]
    fn trims_whitespace_around_fields() {
        assert_eq!(
            parse_import_line("  ABC-123 ---- secret  "),
            Some(("ABC-123".to_string(), Some("secret".to_string())))
        );
    }

    #[test]
    fn empty_password_segment_means_no_password() {
        assert_eq!(
            parse_import_line("ABC-123----"),
            Some(("ABC-123".to_string(), None))
        );
    }

    #[test]
    fn blank_and_malformed_lines_are_skipped() {
        assert_eq!(parse_import_line(""), None);
        assert_eq!(parse_import_line("   "), None);
        assert_eq!(parse_import_line("----pwd-without-number"), None);
    }
}
