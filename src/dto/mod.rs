pub mod auth;
pub mod card_keys;
pub mod categories;
pub mod orders;
pub mod products;
