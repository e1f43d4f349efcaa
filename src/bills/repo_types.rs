use rust_decimal::Decimal;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Bill {
    pub id: Uuid,
    pub user_id: Uuid,
    pub merchant_name: String,
    pub total_amount: Decimal,
    pub date: Date,
    pub s3_key: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct Item {
    pub id: Uuid,
    pub bill_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub price: Decimal, // unit price
}

/// Validated extraction result, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBill {
    pub merchant_name: String,
    pub total_amount: Decimal,
    pub date: Date,
    pub items: Vec<NewItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub description: String,
    pub quantity: i32,
    pub price: Decimal,
}
