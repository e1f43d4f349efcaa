use std::collections::HashMap;

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::repo_types::{Bill, Item, NewBill};
use crate::db::is_unique_violation;

const BILL_COLUMNS: &str =
    "id, user_id, merchant_name, total_amount, date, s3_key, created_at, updated_at";

/// Name of the constraint that rejects re-ingesting the same receipt.
pub const DUPLICATE_BILL_CONSTRAINT: &str = "uix_bill_user";

#[derive(Debug, thiserror::Error)]
pub enum InsertBillError {
    #[error("bill already exists")]
    Duplicate,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Insert a bill and its items in one transaction. A duplicate
/// (merchant, date, total, user) rolls everything back.
pub async fn insert_with_items(
    db: &PgPool,
    user_id: Uuid,
    bill: &NewBill,
) -> Result<(Bill, Vec<Item>), InsertBillError> {
    let mut tx = db.begin().await?;

    let row = sqlx::query_as::<_, Bill>(&format!(
        r#"
        INSERT INTO bills (user_id, merchant_name, total_amount, date)
        VALUES ($1, $2, $3, $4)
        RETURNING {BILL_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&bill.merchant_name)
    .bind(bill.total_amount)
    .bind(bill.date)
    .fetch_one(&mut *tx)
    .await;

    let created = match row {
        Ok(b) => b,
        Err(e) if is_unique_violation(&e, Some(DUPLICATE_BILL_CONSTRAINT)) => {
            tx.rollback().await?;
            return Err(InsertBillError::Duplicate);
        }
        Err(e) => return Err(e.into()),
    };

    let items = insert_items_tx(&mut tx, created.id, bill).await?;
    tx.commit().await?;
    Ok((created, items))
}

async fn insert_items_tx(
    tx: &mut Transaction<'_, Postgres>,
    bill_id: Uuid,
    bill: &NewBill,
) -> Result<Vec<Item>, sqlx::Error> {
    let mut out = Vec::with_capacity(bill.items.len());
    for item in &bill.items {
        let row = sqlx::query_as::<_, Item>(
            r#"
            INSERT INTO items (bill_id, description, quantity, price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT uix_item_bill
            DO UPDATE SET quantity = items.quantity + EXCLUDED.quantity, price = EXCLUDED.price
            RETURNING id, bill_id, description, quantity, price
            "#,
        )
        .bind(bill_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.price)
        .fetch_one(&mut **tx)
        .await?;
        out.push(row);
    }
    Ok(out)
}

pub async fn set_s3_key(db: &PgPool, bill_id: Uuid, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE bills SET s3_key = $2, updated_at = now() WHERE id = $1")
        .bind(bill_id)
        .bind(key)
        .execute(db)
        .await?;
    Ok(())
}

/// Bill owned by `user_id`; someone else's bill reads as missing.
pub async fn find_owned(
    db: &PgPool,
    user_id: Uuid,
    bill_id: Uuid,
) -> Result<Option<Bill>, sqlx::Error> {
    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {BILL_COLUMNS} FROM bills WHERE id = $1 AND user_id = $2"
    ))
    .bind(bill_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
}

pub async fn list_by_user(db: &PgPool, user_id: Uuid) -> Result<Vec<Bill>, sqlx::Error> {
    sqlx::query_as::<_, Bill>(&format!(
        r#"
        SELECT {BILL_COLUMNS}
        FROM bills
        WHERE user_id = $1
        ORDER BY date DESC, created_at DESC
        "#
    ))
    .bind(user_id)
    .fetch_all(db)
    .await
}

pub async fn items_for_bill(db: &PgPool, bill_id: Uuid) -> Result<Vec<Item>, sqlx::Error> {
    sqlx::query_as::<_, Item>(
        r#"
        SELECT id, bill_id, description, quantity, price
        FROM items
        WHERE bill_id = $1
        ORDER BY description
        "#,
    )
    .bind(bill_id)
    .fetch_all(db)
    .await
}

/// Items of several bills, grouped by bill id.
pub async fn items_for_bills(
    db: &PgPool,
    bill_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Item>>, sqlx::Error> {
    if bill_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query_as::<_, Item>(
        r#"
        SELECT id, bill_id, description, quantity, price
        FROM items
        WHERE bill_id = ANY($1)
        ORDER BY description
        "#,
    )
    .bind(bill_ids)
    .fetch_all(db)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<Item>> = HashMap::new();
    for item in rows {
        grouped.entry(item.bill_id).or_default().push(item);
    }
    Ok(grouped)
}

/// Deletes the bill (items cascade) and returns it, if it was the user's.
pub async fn delete_owned(
    db: &PgPool,
    user_id: Uuid,
    bill_id: Uuid,
) -> Result<Option<Bill>, sqlx::Error> {
    sqlx::query_as::<_, Bill>(&format!(
        "DELETE FROM bills WHERE id = $1 AND user_id = $2 RETURNING {BILL_COLUMNS}"
    ))
    .bind(bill_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use time::macros::date;

    use super::*;
    use crate::auth::repo_types::User;
    use crate::bills::repo_types::NewItem;

    fn receipt(total: Decimal) -> NewBill {
        NewBill {
            merchant_name: "Corner Cafe".into(),
            total_amount: total,
            date: date!(2024 - 03 - 09),
            items: vec![NewItem {
                description: "Latte".into(),
                quantity: 2,
                price: Decimal::new(450, 2),
            }],
        }
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn same_receipt_twice_is_a_duplicate(db: PgPool) {
        let user = User::create(&db, "alice", "alice@example.com", "hash").await.unwrap();

        let (bill, items) = insert_with_items(&db, user.id, &receipt(Decimal::new(900, 2)))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);

        let again = insert_with_items(&db, user.id, &receipt(Decimal::new(900, 2))).await;
        assert!(matches!(again, Err(InsertBillError::Duplicate)));

        // Rolled back: nothing new beyond the first bill.
        let bills = list_by_user(&db, user.id).await.unwrap();
        assert_eq!(bills.len(), 1);
        assert_eq!(bills[0].id, bill.id);

        // A different total is a different receipt.
        assert!(insert_with_items(&db, user.id, &receipt(Decimal::new(901, 2))).await.is_ok());
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn other_users_bills_read_as_missing(db: PgPool) {
        let alice = User::create(&db, "alice", "alice@example.com", "hash").await.unwrap();
        let bob = User::create(&db, "bob", "bob@example.com", "hash").await.unwrap();
        let (bill, _) = insert_with_items(&db, alice.id, &receipt(Decimal::new(900, 2)))
            .await
            .unwrap();

        assert!(find_owned(&db, bob.id, bill.id).await.unwrap().is_none());
        assert!(delete_owned(&db, bob.id, bill.id).await.unwrap().is_none());

        let deleted = delete_owned(&db, alice.id, bill.id).await.unwrap();
        assert!(deleted.is_some());
        assert!(items_for_bill(&db, bill.id).await.unwrap().is_empty());
    }
}
