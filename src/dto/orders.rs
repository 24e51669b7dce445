use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{CardKey, Order};

#[derive(Debug, Deserialize, ToSchema)]
pub struct PurchaseRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    pub contact: Option<String>,
    pub remark: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PurchaseResponse {
    pub order_no: String,
    pub status: String,
    /// Present when the gateway is configured and payment was initiated.
    pub payment_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithKeys {
    pub order: Order,
    pub card_keys: Vec<CardKey>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStatus {
    pub order_no: String,
    pub status: String,
    pub paid: bool,
}
