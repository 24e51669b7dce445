pub mod auth_service;
pub mod card_key_service;
pub mod category_service;
pub mod order_service;
pub mod payment_service;
pub mod product_service;
