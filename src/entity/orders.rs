use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_no: String,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub total_amount: i64,
    pub status: String,
    pub pay_method: String,
    pub contact: Option<String>,
    pub remark: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub platform_fee: i64,
    pub merchant_points: i64,
    pub expires_at: Option<DateTimeWithTimeZone>,
    pub paid_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    Users,
    #[sea_orm(
        belongs_to = "super::products::Entity",
        from = "Column::ProductId",
        to = "super::products::Column::Id"
    )]
    Products,
    #[sea_orm(has_many = "super::card_keys::Entity")]
    CardKeys,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::products::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Products.def()
    }
}

impl Related<super::card_keys::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CardKeys.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
