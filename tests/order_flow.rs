use cardkey_shop_api::{
    config::GatewayConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::card_keys::ImportRequest,
    dto::orders::PurchaseRequest,
    entity::{
        card_keys::{Column as KeyCol, Entity as CardKeys},
        orders::{ActiveModel as OrderActive, Entity as Orders},
        products::Entity as Products,
    },
    error::AppError,
    middleware::auth::AuthUser,
    payment::client::PaymentClient,
    services::{card_key_service, order_service, payment_service},
    services::order_service::GatewayConfirmation,
    state::AppState,
};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

// All tests here need a database. They skip when neither TEST_DATABASE_URL
// nor DATABASE_URL is set, matching local workflows without Postgres.
async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    // Unconfigured gateway: purchase() exercises the free path, and the
    // confirmation tests drive apply_gateway_confirmation directly.
    let payment = PaymentClient::new(&GatewayConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        merchant_id: String::new(),
        secret_key: String::new(),
    })?;

    Ok(Some(AppState { pool, orm, payment }))
}

async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, password_hash, role) VALUES ($1, $2, 'x', $3)")
        .bind(id)
        .bind(format!("{id}@example.com"))
        .bind(role)
        .execute(&state.pool)
        .await?;
    Ok(AuthUser {
        user_id: id,
        role: role.to_string(),
    })
}

/// Seed one product with `keys` available card keys, price 100.
async fn seed_product(state: &AppState, admin: &AuthUser, keys: usize) -> anyhow::Result<Uuid> {
    let category_id = Uuid::new_v4();
    sqlx::query("INSERT INTO categories (id, name) VALUES ($1, $2)")
        .bind(category_id)
        .bind(format!("cat-{category_id}"))
        .execute(&state.pool)
        .await?;

    let product_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO products (id, category_id, name, price) VALUES ($1, $2, $3, 100)",
    )
    .bind(product_id)
    .bind(category_id)
    .bind(format!("prod-{product_id}"))
    .execute(&state.pool)
    .await?;

    let cards_text = (0..keys)
        .map(|i| format!("KEY-{product_id}-{i:03}----pwd{i}"))
        .collect::<Vec<_>>()
        .join("\n");
    let resp = card_key_service::bulk_import(
        state,
        admin,
        ImportRequest {
            product_id,
            cards_text,
        },
    )
    .await?;
    assert_eq!(resp.data.unwrap().created, keys);

    Ok(product_id)
}

async fn create_pending_with_intent(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    quantity: i32,
) -> anyhow::Result<(cardkey_shop_api::models::Order, String)> {
    let (order, _) = order_service::create_pending(
        state,
        user,
        &PurchaseRequest {
            product_id,
            quantity,
            contact: None,
            remark: None,
        },
    )
    .await?;
    let transaction_id = format!("tx-{}", Uuid::new_v4());
    order_service::attach_payment_intent(state, order.id, &transaction_id, Some("http://pay"))
        .await?;
    Ok((order, transaction_id))
}

fn confirmation(transaction_id: &str, amount: i64) -> GatewayConfirmation {
    GatewayConfirmation {
        transaction_id: transaction_id.to_string(),
        amount,
        platform_fee: 2,
        merchant_points: amount - 2,
        paid_at: Utc::now(),
        pay_method: "gateway".to_string(),
    }
}

async fn stock_and_sales(state: &AppState, product_id: Uuid) -> anyhow::Result<(i32, i32)> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product");
    Ok((product.stock_count, product.sales_count))
}

#[tokio::test]
async fn confirmation_completes_order_and_binds_keys() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 3).await?;

    let (order, tx) = create_pending_with_intent(&state, &user, product_id, 2).await?;
    assert_eq!(order.status, "pending");
    assert_eq!(order.total_amount, 200);

    let completed =
        order_service::apply_gateway_confirmation(&state, confirmation(&tx, 200)).await?;
    assert_eq!(completed.status, "completed");
    assert!(completed.paid_at.is_some());
    assert_eq!(completed.platform_fee, 2);

    let sold = CardKeys::find()
        .filter(KeyCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;
    assert_eq!(sold.len(), 2);
    for key in &sold {
        assert_eq!(key.status, "sold");
        assert_eq!(key.order_id, Some(order.id));
        assert!(key.sold_at.is_some());
    }

    let (stock, sales) = stock_and_sales(&state, product_id).await?;
    assert_eq!(stock, 1);
    assert_eq!(sales, 2);
    Ok(())
}

#[tokio::test]
async fn amount_mismatch_leaves_order_pending_with_no_allocation() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 3).await?;

    let (order, tx) = create_pending_with_intent(&state, &user, product_id, 2).await?;

    let err = order_service::apply_gateway_confirmation(&state, confirmation(&tx, 150))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AmountMismatch));

    let reloaded = order_service::find_by_order_no(&state, &order.order_no).await?;
    assert_eq!(reloaded.status, "pending");

    let sold = CardKeys::find()
        .filter(KeyCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;
    assert!(sold.is_empty());

    let (stock, sales) = stock_and_sales(&state, product_id).await?;
    assert_eq!(stock, 3);
    assert_eq!(sales, 0);
    Ok(())
}

#[tokio::test]
async fn replayed_confirmation_is_a_noop() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 3).await?;

    let (order, tx) = create_pending_with_intent(&state, &user, product_id, 2).await?;

    let first = order_service::apply_gateway_confirmation(&state, confirmation(&tx, 200)).await?;
    let second = order_service::apply_gateway_confirmation(&state, confirmation(&tx, 200)).await?;
    assert_eq!(first.status, "completed");
    assert_eq!(second.status, "completed");
    assert_eq!(first.paid_at, second.paid_at);

    // Exactly one allocation happened.
    let sold = CardKeys::find()
        .filter(KeyCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;
    assert_eq!(sold.len(), 2);

    let (stock, sales) = stock_and_sales(&state, product_id).await?;
    assert_eq!(stock, 1);
    assert_eq!(sales, 2);
    Ok(())
}

#[tokio::test]
async fn sweep_cancels_expired_order_and_late_confirmation_is_noop() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 2).await?;

    let (order, tx) = create_pending_with_intent(&state, &user, product_id, 1).await?;

    // Push the deadline into the past.
    let model = Orders::find_by_id(order.id)
        .one(&state.orm)
        .await?
        .expect("order");
    let mut active: OrderActive = model.into();
    active.expires_at = Set(Some((Utc::now() - Duration::minutes(5)).into()));
    active.update(&state.orm).await?;

    let swept = order_service::sweep_expired(&state.orm).await?;
    assert!(swept >= 1);

    let cancelled = order_service::find_by_order_no(&state, &order.order_no).await?;
    assert_eq!(cancelled.status, "cancelled");

    // The late payment event must not resurrect the order or touch stock.
    let late = order_service::apply_gateway_confirmation(&state, confirmation(&tx, 100)).await?;
    assert_eq!(late.status, "cancelled");

    let sold = CardKeys::find()
        .filter(KeyCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;
    assert!(sold.is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_confirmations_allocate_disjoint_keys() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let n = 3;
    let product_id = seed_product(&state, &admin, n).await?;

    let mut orders = Vec::new();
    for _ in 0..n {
        orders.push(create_pending_with_intent(&state, &user, product_id, 1).await?);
    }

    let mut handles = Vec::new();
    for (_, tx) in &orders {
        let state = state.clone();
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            order_service::apply_gateway_confirmation(&state, confirmation(&tx, 100)).await
        }));
    }
    for handle in handles {
        let order = handle.await??;
        assert_eq!(order.status, "completed");
    }

    // Every order got exactly one key and no key was sold twice.
    let mut seen = Vec::new();
    for (order, _) in &orders {
        let sold = CardKeys::find()
            .filter(KeyCol::OrderId.eq(order.id))
            .all(&state.orm)
            .await?;
        assert_eq!(sold.len(), 1);
        assert!(!seen.contains(&sold[0].id));
        seen.push(sold[0].id);
    }

    let (stock, sales) = stock_and_sales(&state, product_id).await?;
    assert_eq!(stock, 0);
    assert_eq!(sales, n as i32);
    Ok(())
}

#[tokio::test]
async fn free_mode_purchase_completes_through_guarded_path() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 3).await?;

    let resp = payment_service::purchase(
        &state,
        &user,
        PurchaseRequest {
            product_id,
            quantity: 2,
            contact: Some("buyer@example.com".to_string()),
            remark: None,
        },
    )
    .await?;
    let purchase = resp.data.unwrap();
    assert_eq!(purchase.status, "completed");
    assert!(purchase.payment_url.is_none());

    let detail = order_service::get_order(&state, &user, &purchase.order_no)
        .await?
        .data
        .unwrap();
    assert_eq!(detail.order.pay_method, "free");
    assert_eq!(detail.card_keys.len(), 2);
    assert!(detail.card_keys[0].card_no.starts_with("KEY-"));

    let (stock, sales) = stock_and_sales(&state, product_id).await?;
    assert_eq!(stock, 1);
    assert_eq!(sales, 2);
    Ok(())
}

#[tokio::test]
async fn paid_order_survives_stock_exhaustion_for_manual_fulfilment() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 1).await?;

    let (first, tx_first) = create_pending_with_intent(&state, &user, product_id, 1).await?;
    let (second, tx_second) = create_pending_with_intent(&state, &user, product_id, 1).await?;

    let done = order_service::apply_gateway_confirmation(&state, confirmation(&tx_first, 100))
        .await?;
    assert_eq!(done.status, "completed");

    // The second payment still lands; the order stays paid for an operator.
    let starved = order_service::apply_gateway_confirmation(&state, confirmation(&tx_second, 100))
        .await?;
    assert_eq!(starved.status, "paid");

    let first_keys = CardKeys::find()
        .filter(KeyCol::OrderId.eq(first.id))
        .all(&state.orm)
        .await?;
    let second_keys = CardKeys::find()
        .filter(KeyCol::OrderId.eq(second.id))
        .all(&state.orm)
        .await?;
    assert_eq!(first_keys.len(), 1);
    assert!(second_keys.is_empty());
    Ok(())
}

#[tokio::test]
async fn sold_card_key_cannot_be_deleted() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 1).await?;

    let (order, tx) = create_pending_with_intent(&state, &user, product_id, 1).await?;
    order_service::apply_gateway_confirmation(&state, confirmation(&tx, 100)).await?;

    let sold = CardKeys::find()
        .filter(KeyCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;
    let err = card_key_service::delete_card_key(&state, &admin, sold[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CardKeySold));
    Ok(())
}

#[tokio::test]
async fn cancel_is_pending_only() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 2).await?;

    let (order, tx) = create_pending_with_intent(&state, &user, product_id, 1).await?;
    order_service::apply_gateway_confirmation(&state, confirmation(&tx, 100)).await?;

    let err = order_service::cancel(&state, &user, &order.order_no)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let (pending, _) = create_pending_with_intent(&state, &user, product_id, 1).await?;
    let cancelled = order_service::cancel(&state, &user, &pending.order_no).await?;
    assert_eq!(cancelled.data.unwrap().status, "cancelled");
    Ok(())
}

#[tokio::test]
async fn create_pending_rejects_missing_product_and_short_stock() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let admin = create_user(&state, "admin").await?;
    let user = create_user(&state, "user").await?;
    let product_id = seed_product(&state, &admin, 2).await?;

    let err = order_service::create_pending(
        &state,
        &user,
        &PurchaseRequest {
            product_id: Uuid::new_v4(),
            quantity: 1,
            contact: None,
            remark: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::ProductNotFound));

    let err = order_service::create_pending(
        &state,
        &user,
        &PurchaseRequest {
            product_id,
            quantity: 3,
            contact: None,
            remark: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock));
    Ok(())
}
