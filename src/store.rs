//! The Order Store: every mutation of a field that participates in an
//! invariant (status, payment_status, delivery_agent_id) goes through a
//! single conditional `UPDATE ... WHERE <expected> RETURNING *` here, never
//! a read-then-write across two round trips. When the conditional update
//! matches nothing, a follow-up read only *classifies* the failure — the
//! decision already happened atomically in the database.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::lifecycle;
use crate::models::{
    DeliveryReport, Order, OrderItem, OrderStatus, PaymentMethod, PaymentRecord,
};

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub delivery_fee: i64,
    pub payment_method: PaymentMethod,
    pub delivery_address: String,
    pub contact_address: String,
    pub notes: Option<String>,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub catalog_item_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub note: Option<String>,
}

impl NewOrder {
    /// `sum(quantity * unit_price) + delivery_fee`, fixed at creation.
    pub fn total_amount(&self) -> i64 {
        let items: i64 = self
            .items
            .iter()
            .map(|i| i64::from(i.quantity) * i.unit_price)
            .sum();
        items + self.delivery_fee
    }
}

pub async fn insert_order(pool: &DbPool, new: NewOrder) -> AppResult<(Order, Vec<OrderItem>)> {
    let mut txn = pool.begin().await?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders
            (id, customer_id, restaurant_id, total_amount, delivery_fee,
             payment_method, delivery_address, contact_address, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.customer_id)
    .bind(new.restaurant_id)
    .bind(new.total_amount())
    .bind(new.delivery_fee)
    .bind(new.payment_method)
    .bind(&new.delivery_address)
    .bind(&new.contact_address)
    .bind(&new.notes)
    .fetch_one(&mut *txn)
    .await?;

    let mut items = Vec::with_capacity(new.items.len());
    for item in &new.items {
        let row = sqlx::query_as::<_, OrderItem>(
            r#"
            INSERT INTO order_items
                (id, order_id, catalog_item_id, name, quantity, unit_price, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.id)
        .bind(item.catalog_item_id)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(&item.note)
        .fetch_one(&mut *txn)
        .await?;
        items.push(row);
    }

    txn.commit().await?;
    Ok((order, items))
}

pub async fn fetch_order(pool: &DbPool, id: Uuid) -> AppResult<Option<Order>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(order)
}

pub async fn fetch_items(pool: &DbPool, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(items)
}

pub async fn list_for_customer(
    pool: &DbPool,
    customer_id: Uuid,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> AppResult<(Vec<Order>, i64)> {
    list_by_owner(pool, "customer_id", customer_id, status, limit, offset).await
}

pub async fn list_for_restaurant(
    pool: &DbPool,
    restaurant_id: Uuid,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> AppResult<(Vec<Order>, i64)> {
    list_by_owner(pool, "restaurant_id", restaurant_id, status, limit, offset).await
}

async fn list_by_owner(
    pool: &DbPool,
    owner_col: &'static str,
    owner: Uuid,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> AppResult<(Vec<Order>, i64)> {
    let filter = if status.is_some() {
        " AND status = $4"
    } else {
        ""
    };
    let sql = format!(
        "SELECT * FROM orders WHERE {owner_col} = $1 {filter} \
         ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    );
    let mut query = sqlx::query_as::<_, Order>(&sql)
        .bind(owner)
        .bind(limit)
        .bind(offset);
    if let Some(status) = status {
        query = query.bind(status);
    }
    let orders = query.fetch_all(pool).await?;

    let count_sql = format!(
        "SELECT count(*) FROM orders WHERE {owner_col} = $1{}",
        if status.is_some() { " AND status = $2" } else { "" }
    );
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(owner);
    if let Some(status) = status {
        count_query = count_query.bind(status);
    }
    let total = count_query.fetch_one(pool).await?;

    Ok((orders, total))
}

/// Orders an agent can still claim.
pub async fn list_ready_unclaimed(pool: &DbPool) -> AppResult<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders \
         WHERE status = 'ready' AND delivery_agent_id IS NULL \
         ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

/// Move an order to `to`, but only if its current status is one of the
/// legal sources for `to`. The legality check and the write are one
/// statement, so two racing writers cannot both pass validation.
pub async fn transition_status(pool: &DbPool, id: Uuid, to: OrderStatus) -> AppResult<Order> {
    let sources = OrderStatus::legal_sources(to);
    if sources.is_empty() {
        return Err(classify_transition_failure(pool, id, to).await?);
    }

    // Literals come from the state machine's own constants, never the caller.
    let predicate = sources
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE orders SET status = $2, updated_at = now() \
         WHERE id = $1 AND status IN ({predicate}) RETURNING *"
    );

    let updated = sqlx::query_as::<_, Order>(&sql)
        .bind(id)
        .bind(to)
        .fetch_optional(pool)
        .await?;

    match updated {
        Some(order) => Ok(order),
        None => Err(classify_transition_failure(pool, id, to).await?),
    }
}

async fn classify_transition_failure(
    pool: &DbPool,
    id: Uuid,
    to: OrderStatus,
) -> AppResult<AppError> {
    match fetch_order(pool, id).await? {
        None => Ok(AppError::OrderNotFound),
        Some(order) => Ok(AppError::InvalidTransition {
            from: order.status,
            to,
        }),
    }
}

/// The multi-writer hot path: any number of agents may race on the same
/// ready order and exactly one compare-and-set wins.
pub async fn try_claim(pool: &DbPool, id: Uuid, agent_id: Uuid) -> AppResult<Order> {
    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'picked_up', delivery_agent_id = $2, updated_at = now()
        WHERE id = $1 AND status = 'ready' AND delivery_agent_id IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(agent_id)
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(order) => Ok(order),
        None => match fetch_order(pool, id).await? {
            None => Err(AppError::OrderNotFound),
            Some(order) if order.delivery_agent_id.is_some() => Err(AppError::AlreadyClaimed),
            Some(_) => Err(AppError::NotReady),
        },
    }
}

/// picked_up -> delivered plus the write-once DeliveryReport, in one
/// transaction. The update is gated on the caller being the assigned agent;
/// a repeat call from that agent replays the committed result.
pub async fn complete_delivery(
    pool: &DbPool,
    id: Uuid,
    agent_id: Uuid,
    notes: Option<String>,
) -> AppResult<(Order, DeliveryReport)> {
    let mut txn = pool.begin().await?;

    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'delivered', updated_at = now()
        WHERE id = $1 AND status = 'picked_up' AND delivery_agent_id = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(agent_id)
    .fetch_optional(&mut *txn)
    .await?;

    let order = match updated {
        Some(order) => order,
        None => {
            txn.rollback().await?;
            // Retried confirmation after a commit: hand back the existing
            // report so the caller can finish the rest of the operation
            // (cash settlement is idempotent by its synthetic reference).
            if let Some(order) = fetch_order(pool, id).await? {
                if order.status == OrderStatus::Delivered
                    && order.delivery_agent_id == Some(agent_id)
                {
                    if let Some(report) = fetch_delivery_report(pool, id).await? {
                        return Ok((order, report));
                    }
                }
            }
            return Err(classify_delivery_failure(pool, id, agent_id).await?);
        }
    };

    let report = sqlx::query_as::<_, DeliveryReport>(
        r#"
        INSERT INTO delivery_reports (id, order_id, delivery_agent_id, notes)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(order.id)
    .bind(agent_id)
    .bind(&notes)
    .fetch_one(&mut *txn)
    .await?;

    txn.commit().await?;
    Ok((order, report))
}

async fn classify_delivery_failure(
    pool: &DbPool,
    id: Uuid,
    agent_id: Uuid,
) -> AppResult<AppError> {
    match fetch_order(pool, id).await? {
        None => Ok(AppError::OrderNotFound),
        Some(order) if order.delivery_agent_id != Some(agent_id) => Ok(AppError::NotAssigned),
        Some(order) => Ok(AppError::InvalidTransition {
            from: order.status,
            to: OrderStatus::Delivered,
        }),
    }
}

/// What applying a payment outcome actually did. A replay is success, not
/// an error: the processor delivers at-least-once and the dedupe key is the
/// ledger's unique payment_reference.
#[derive(Debug)]
pub enum PaymentApplication {
    /// First sighting; ledger entry written and the order updated.
    Applied(Order),
    /// Reference already in the ledger; nothing re-applied.
    Replayed(Order),
    /// Ledger entry written but the order no longer accepts the outcome
    /// (e.g. success after an earlier paid, or after cancellation).
    /// Flagged by the caller for manual reconciliation.
    RecordedAnomalous(Order),
}

pub async fn apply_payment_succeeded(
    pool: &DbPool,
    order_id: Uuid,
    reference: &str,
    amount: i64,
    currency: &str,
) -> AppResult<PaymentApplication> {
    let mut txn = pool.begin().await?;

    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(&mut *txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if let Some(existing) = find_record(&mut txn, reference).await? {
        if existing.order_id != order_id {
            return Err(AppError::BadRequest(
                "payment reference belongs to a different order".into(),
            ));
        }
        txn.commit().await?;
        return Ok(PaymentApplication::Replayed(order));
    }

    // Zero tolerance: a mismatched capture never marks the order paid.
    if amount != order.total_amount {
        return Err(AppError::AmountMismatch {
            expected: order.total_amount,
            received: amount,
        });
    }

    // A cash order settles at the door; anything earlier is not a
    // settlement this handler will record.
    if order.payment_method == PaymentMethod::Cash
        && !lifecycle::paid_allowed(PaymentMethod::Cash, order.status)
    {
        return Err(AppError::BadRequest(
            "cash orders settle on delivery".into(),
        ));
    }

    let inserted = insert_record(&mut txn, order_id, reference, amount, currency, "succeeded")
        .await?;
    if !inserted {
        // A concurrent delivery of the same event committed first.
        txn.commit().await?;
        return Ok(PaymentApplication::Replayed(order));
    }

    // Mark paid; the first successful card capture implicitly confirms an
    // order that is still pending.
    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET payment_status = 'paid',
            status = (CASE
                WHEN payment_method = 'card' AND status = 'pending'
                THEN 'confirmed'::order_status
                ELSE status
            END),
            payment_reference = COALESCE(payment_reference, $2),
            updated_at = now()
        WHERE id = $1 AND payment_status IN ('pending', 'failed')
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(reference)
    .fetch_optional(&mut *txn)
    .await?;

    txn.commit().await?;
    match updated {
        Some(order) => Ok(PaymentApplication::Applied(order)),
        None => Ok(PaymentApplication::RecordedAnomalous(order)),
    }
}

pub async fn apply_payment_failed(
    pool: &DbPool,
    order_id: Uuid,
    reference: &str,
    amount: i64,
    currency: &str,
) -> AppResult<PaymentApplication> {
    let mut txn = pool.begin().await?;

    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(&mut *txn)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    if let Some(existing) = find_record(&mut txn, reference).await? {
        if existing.order_id != order_id {
            return Err(AppError::BadRequest(
                "payment reference belongs to a different order".into(),
            ));
        }
        txn.commit().await?;
        return Ok(PaymentApplication::Replayed(order));
    }

    let inserted =
        insert_record(&mut txn, order_id, reference, amount, currency, "failed").await?;
    if !inserted {
        txn.commit().await?;
        return Ok(PaymentApplication::Replayed(order));
    }

    // An order that never got paid for never enters preparation.
    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET payment_status = 'failed',
            status = (CASE
                WHEN status = 'pending' THEN 'cancelled'::order_status
                ELSE status
            END),
            updated_at = now()
        WHERE id = $1 AND payment_status IN ('pending', 'failed')
        RETURNING *
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *txn)
    .await?;

    txn.commit().await?;
    match updated {
        Some(order) => Ok(PaymentApplication::Applied(order)),
        None => Ok(PaymentApplication::RecordedAnomalous(order)),
    }
}

async fn find_record(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    reference: &str,
) -> AppResult<Option<PaymentRecord>> {
    let record = sqlx::query_as::<_, PaymentRecord>(
        "SELECT * FROM payment_records WHERE payment_reference = $1",
    )
    .bind(reference)
    .fetch_optional(&mut **txn)
    .await?;
    Ok(record)
}

async fn insert_record(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: Uuid,
    reference: &str,
    amount: i64,
    currency: &str,
    outcome: &str,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO payment_records
            (id, order_id, payment_reference, amount, currency, outcome)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (payment_reference) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(order_id)
    .bind(reference)
    .bind(amount)
    .bind(currency)
    .bind(outcome)
    .execute(&mut **txn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Attach the processor's payment reference to the order. Set-once: a
/// second write only succeeds with the identical value.
pub async fn record_payment_reference(
    pool: &DbPool,
    id: Uuid,
    reference: &str,
) -> AppResult<Order> {
    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET payment_reference = $2, updated_at = now()
        WHERE id = $1 AND (payment_reference IS NULL OR payment_reference = $2)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(reference)
    .fetch_optional(pool)
    .await?;

    match updated {
        Some(order) => Ok(order),
        None => match fetch_order(pool, id).await? {
            None => Err(AppError::OrderNotFound),
            Some(_) => Err(AppError::BadRequest(
                "payment reference already set".into(),
            )),
        },
    }
}

/// Intent creation with the processor failed before any money moved.
pub async fn mark_payment_failed(pool: &DbPool, id: Uuid) -> AppResult<Order> {
    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET payment_status = 'failed', updated_at = now()
        WHERE id = $1 AND payment_status = 'pending'
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    updated.ok_or(AppError::OrderNotFound)
}

// --- change feed support for the notification watcher ---

pub async fn changed_since(
    pool: &DbPool,
    cursor: DateTime<Utc>,
    limit: i64,
) -> AppResult<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE updated_at >= $1 ORDER BY updated_at LIMIT $2",
    )
    .bind(cursor)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

/// Record that a notification for `(order, status)` is being sent. Returns
/// false when that pair was already handled — the watcher's dedupe.
pub async fn log_notification(
    pool: &DbPool,
    order_id: Uuid,
    status: OrderStatus,
    message: &str,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO notification_log (order_id, status, message)
        VALUES ($1, $2, $3)
        ON CONFLICT (order_id, status) DO NOTHING
        "#,
    )
    .bind(order_id)
    .bind(status)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn load_cursor(pool: &DbPool, consumer: &str) -> AppResult<Option<DateTime<Utc>>> {
    let position = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT position FROM watcher_cursor WHERE consumer = $1",
    )
    .bind(consumer)
    .fetch_optional(pool)
    .await?;
    Ok(position)
}

pub async fn save_cursor(
    pool: &DbPool,
    consumer: &str,
    position: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO watcher_cursor (consumer, position)
        VALUES ($1, $2)
        ON CONFLICT (consumer)
        DO UPDATE SET position = EXCLUDED.position, updated_at = now()
        "#,
    )
    .bind(consumer)
    .bind(position)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_payment_records(pool: &DbPool, order_id: Uuid) -> AppResult<Vec<PaymentRecord>> {
    let records = sqlx::query_as::<_, PaymentRecord>(
        "SELECT * FROM payment_records WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

pub async fn fetch_delivery_report(
    pool: &DbPool,
    order_id: Uuid,
) -> AppResult<Option<DeliveryReport>> {
    let report = sqlx::query_as::<_, DeliveryReport>(
        "SELECT * FROM delivery_reports WHERE order_id = $1",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;
    Ok(report)
}
