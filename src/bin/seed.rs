use argon2::{
    Argon2, PasswordHasher,
    password_hash::{rand_core::OsRng, SaltString},
};
use cardkey_shop_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let admin_id = ensure_user_with_role(&pool, "admin@example.com", "admin123", "admin").await?;
    let user_id = ensure_user_with_role(&pool, "user@example.com", "user123", "user").await?;
    let product_id = seed_catalog(&pool).await?;
    seed_card_keys(&pool, product_id).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user_with_role(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    // If user already exists, fetch id
    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_catalog(pool: &sqlx::PgPool) -> anyhow::Result<Uuid> {
    let category_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO categories (id, name, description, sort)
        VALUES ($1, 'Game Keys', 'Activation keys for games', 0)
        "#,
    )
    .bind(category_id)
    .execute(pool)
    .await?;

    let product_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO products (id, category_id, name, description, price)
        VALUES ($1, $2, 'Demo Game Key', 'A demo product for testing', 100)
        "#,
    )
    .bind(product_id)
    .bind(category_id)
    .execute(pool)
    .await?;

    println!("Seeded catalog");
    Ok(product_id)
}

async fn seed_card_keys(pool: &sqlx::PgPool, product_id: Uuid) -> anyhow::Result<()> {
    for i in 0..10 {
        sqlx::query(
            r#"
            INSERT INTO card_keys (product_id, card_no, card_pwd)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(product_id)
        .bind(format!("DEMO-KEY-{i:03}"))
        .bind(format!("pwd-{i:03}"))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE products
        SET stock_count = (
            SELECT count(*) FROM card_keys
            WHERE product_id = $1 AND status = 'available'
        )
        WHERE id = $1
        "#,
    )
    .bind(product_id)
    .execute(pool)
    .await?;

    println!("Seeded card keys");
    Ok(())
}
