use crate::db::{DbPool, OrmConn};
use crate::payment::client::PaymentClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub payment: PaymentClient,
}
