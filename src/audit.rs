use serde_json::{Value, json};
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

/// Append one audit row for an order-lifecycle event. `detail` should be a
/// JSON object; the order id is folded into it so every entry is queryable
/// by order.
pub async fn record_order_event(
    pool: &DbPool,
    actor: Option<Uuid>,
    action: &str,
    order_id: Uuid,
    detail: Value,
) -> AppResult<()> {
    let mut metadata = match detail {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("detail".into(), other);
            map
        }
    };
    metadata.insert("order_id".into(), json!(order_id));

    let resource = if action.starts_with("payment") {
        "payments"
    } else {
        "orders"
    };

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(actor)
    .bind(action)
    .bind(resource)
    .bind(Value::Object(metadata))
    .execute(pool)
    .await?;

    Ok(())
}
