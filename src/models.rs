use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub sort: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Price in minor currency units. Gateway points are 1:1 with minor units.
    pub price: i64,
    pub stock_count: i32,
    pub sales_count: i32,
    pub sort: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A sellable secret. `card_no`/`card_pwd` are only serialized on admin
/// endpoints and on completed orders owned by the requesting user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CardKey {
    pub id: i64,
    pub product_id: Uuid,
    pub card_no: String,
    pub card_pwd: Option<String>,
    pub status: String,
    pub order_id: Option<Uuid>,
    pub sold_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_no: String,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Fixed at creation from the product price; never recomputed.
    pub total_amount: i64,
    pub status: String,
    pub pay_method: String,
    pub contact: Option<String>,
    pub remark: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub platform_fee: i64,
    pub merchant_points: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
