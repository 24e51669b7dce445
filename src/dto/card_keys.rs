use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::CardKey;

/// Line-oriented import payload: `cardNumber----password` or a bare
/// `cardNumber` per line.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ImportRequest {
    pub product_id: Uuid,
    pub cards_text: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportResult {
    pub created: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchDeleteRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CardKeyList {
    pub items: Vec<CardKey>,
}
