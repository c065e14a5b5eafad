//! Change Notification Watcher: a long-lived task that tails the order
//! store and dispatches one status-specific message per (order, status)
//! through the messaging collaborator.
//!
//! The change feed is polling-with-cursor: the cursor survives restarts in
//! the watcher_cursor table, and the notification_log primary key dedupes
//! redelivered changes, so a reconnect never re-sends a notification the
//! customer already got. Dispatch is fire-and-forget — a failed send is
//! logged and never blocks or reverses the order mutation behind it.

use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use crate::error::AppResult;
use crate::models::{Order, OrderStatus};
use crate::state::AppState;
use crate::store;

pub const CONSUMER_ID: &str = "order-notification-watcher";
const BATCH_LIMIT: i64 = 200;

// A transaction that was in flight while a poll ran commits with an
// updated_at stamped at its start, behind rows the poll already saw. Each
// pass therefore re-reads this window behind the cursor; the dedupe makes
// the re-reads free.
const SAFETY_LAG_SECS: i64 = 5;

pub async fn run(state: AppState, poll_interval: Duration) {
    tracing::info!(interval_ms = poll_interval.as_millis(), "notification watcher started");
    loop {
        if let Err(err) = tick(&state).await {
            // Transient store trouble: keep the loop alive and resume from
            // the persisted cursor on the next pass.
            tracing::warn!(error = %err, "watcher pass failed, will retry");
        }
        sleep(poll_interval).await;
    }
}

/// One poll pass: read changes behind and after the cursor, send what the
/// dedupe lets through, advance the cursor.
pub async fn tick(state: &AppState) -> AppResult<()> {
    let cursor = match store::load_cursor(&state.pool, CONSUMER_ID).await? {
        Some(position) => position,
        None => {
            // First start: watch forward from now, like a fresh change
            // stream subscription.
            let now = Utc::now();
            store::save_cursor(&state.pool, CONSUMER_ID, now).await?;
            now
        }
    };

    let floor = cursor - chrono::Duration::seconds(SAFETY_LAG_SECS);
    let changed = store::changed_since(&state.pool, floor, BATCH_LIMIT).await?;
    let mut max_seen = cursor;

    for order in changed {
        if order.updated_at > max_seen {
            max_seen = order.updated_at;
        }

        let message = status_message(&order);
        let fresh = store::log_notification(&state.pool, order.id, order.status, &message).await?;
        if !fresh {
            continue;
        }

        match state.messenger.send(&order.contact_address, &message).await {
            Ok(()) => {
                tracing::info!(order_id = %order.id, status = %order.status, "notification sent");
            }
            Err(err) => {
                tracing::warn!(
                    order_id = %order.id,
                    status = %order.status,
                    error = %err,
                    "notification dispatch failed"
                );
            }
        }
    }

    if max_seen > cursor {
        store::save_cursor(&state.pool, CONSUMER_ID, max_seen).await?;
    }

    Ok(())
}

/// The templated notification text keyed by the order's new status.
pub fn status_message(order: &Order) -> String {
    let id = order.id;
    match order.status {
        OrderStatus::Pending => {
            format!("Your order #{id} has been received and is pending confirmation.")
        }
        OrderStatus::Confirmed => {
            format!("Your order #{id} has been confirmed and is being processed.")
        }
        OrderStatus::Preparing => {
            format!("Your order #{id} is now being prepared in the kitchen!")
        }
        OrderStatus::Ready => format!("Your order #{id} is ready for pickup!"),
        OrderStatus::PickedUp => format!("Your order #{id} is on its way to you!"),
        OrderStatus::Delivered => {
            format!("Your order #{id} has been delivered. Enjoy your meal!")
        }
        OrderStatus::Cancelled => format!("Your order #{id} has been cancelled."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentMethod, PaymentStatus};
    use uuid::Uuid;

    fn order_with_status(status: OrderStatus) -> Order {
        Order {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            restaurant_id: Uuid::new_v4(),
            total_amount: 1050,
            delivery_fee: 50,
            status,
            payment_method: PaymentMethod::Card,
            payment_status: PaymentStatus::Pending,
            payment_reference: None,
            delivery_agent_id: None,
            delivery_address: "12 Hill St".into(),
            contact_address: "+94771234567".into(),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn every_status_renders_a_distinct_message() {
        let statuses = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::PickedUp,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ];
        let order = order_with_status(OrderStatus::Pending);
        let mut seen = std::collections::HashSet::new();
        for status in statuses {
            let mut order = order.clone();
            order.status = status;
            let message = status_message(&order);
            assert!(message.contains(&order.id.to_string()));
            assert!(seen.insert(message), "duplicate message for {status}");
        }
    }

    #[test]
    fn ready_message_announces_pickup() {
        let order = order_with_status(OrderStatus::Ready);
        assert!(status_message(&order).contains("ready for pickup"));
    }
}
