use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        card_keys::{CardKeyList, ImportResult},
        categories::CategoryList,
        orders::{OrderList, OrderStatus, OrderWithKeys, PurchaseResponse},
        products::ProductList,
    },
    models::{CardKey, Category, Order, Product, User},
    response::{ApiResponse, Meta},
    routes::{auth, card_keys, categories, health, orders, params, payment, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        categories::list_categories,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        products::list_products,
        products::list_all_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        orders::purchase,
        orders::list_orders,
        orders::list_all_orders,
        orders::get_order,
        orders::repay,
        orders::cancel_order,
        orders::order_status,
        card_keys::list_card_keys,
        card_keys::import_card_keys,
        card_keys::delete_card_key,
        card_keys::batch_delete_card_keys,
        payment::payment_callback
    ),
    components(
        schemas(
            User,
            Category,
            Product,
            CardKey,
            Order,
            CategoryList,
            ProductList,
            CardKeyList,
            ImportResult,
            OrderList,
            OrderWithKeys,
            OrderStatus,
            PurchaseResponse,
            params::Pagination,
            params::OrderListQuery,
            params::CardKeyListQuery,
            payment::CallbackQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithKeys>,
            ApiResponse<OrderList>,
            ApiResponse<CardKeyList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Categories", description = "Catalog category endpoints"),
        (name = "Products", description = "Product endpoints"),
        (name = "Orders", description = "Order and purchase endpoints"),
        (name = "CardKeys", description = "Card key inventory endpoints"),
        (name = "Payment", description = "Payment gateway callback"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
