use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Bill, Item};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemView {
    pub id: Uuid,
    pub bill_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub price: Decimal,
}

impl From<Item> for ItemView {
    fn from(i: Item) -> Self {
        Self {
            id: i.id,
            bill_id: i.bill_id,
            description: i.description,
            quantity: i.quantity,
            price: i.price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub merchant_name: String,
    pub total_amount: Decimal,
    /// `YYYY-MM-DD`
    pub date: String,
    pub s3_key: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub items: Vec<ItemView>,
}

impl BillView {
    pub fn new(bill: Bill, items: Vec<Item>) -> Self {
        Self {
            id: bill.id,
            user_id: bill.user_id,
            merchant_name: bill.merchant_name,
            total_amount: bill.total_amount,
            date: bill.date.to_string(),
            s3_key: bill.s3_key,
            created_at: bill.created_at,
            updated_at: bill.updated_at,
            items: items.into_iter().map(ItemView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BillsResponse {
    pub bills: Vec<BillView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemsResponse {
    pub items: Vec<ItemView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewUrlResponse {
    pub signed_url: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use time::macros::{date, datetime};

    #[test]
    fn bill_view_serializes_plain_date_and_numeric_amounts() {
        let bill_id = Uuid::new_v4();
        let bill = Bill {
            id: bill_id,
            user_id: Uuid::new_v4(),
            merchant_name: "Corner Cafe".into(),
            total_amount: Decimal::from_str("12.35").unwrap(),
            date: date!(2024 - 03 - 09),
            s3_key: None,
            created_at: datetime!(2024-03-09 10:00 UTC),
            updated_at: datetime!(2024-03-09 10:00 UTC),
        };
        let item = Item {
            id: Uuid::new_v4(),
            bill_id,
            description: "Latte".into(),
            quantity: 2,
            price: Decimal::from_str("4.75").unwrap(),
        };

        let json = serde_json::to_value(BillView::new(bill, vec![item])).unwrap();
        assert_eq!(json["date"], "2024-03-09");
        assert_eq!(json["total_amount"].as_f64(), Some(12.35));
        assert_eq!(json["items"][0]["quantity"], 2);
        assert_eq!(json["created_at"], "2024-03-09T10:00:00Z");
        assert!(json["s3_key"].is_null());
    }
}
