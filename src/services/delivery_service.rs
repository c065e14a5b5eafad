use uuid::Uuid;

use crate::{
    audit::record_order_event,
    dto::delivery::{DeliveryCompleted, MarkDeliveredRequest, ReadyOrderList},
    error::AppResult,
    middleware::auth::{AuthUser, ensure_role},
    models::{Order, PaymentMethod},
    response::{ApiResponse, Meta},
    state::AppState,
    store,
};

use super::payment_service;

/// The ready, unclaimed orders agents poll before racing to claim one.
pub async fn list_ready(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<ReadyOrderList>> {
    ensure_role(user, "delivery")?;
    let orders = store::list_ready_unclaimed(&state.pool).await?;
    Ok(ApiResponse::success(
        "Ready orders",
        ReadyOrderList { items: orders },
        Some(Meta::empty()),
    ))
}

/// Atomically take exclusive ownership of a ready order. Losing the race
/// surfaces as AlreadyClaimed — an expected outcome, not a bug; callers
/// should pick another order rather than retry.
pub async fn claim(state: &AppState, user: &AuthUser, order_id: Uuid) -> AppResult<ApiResponse<Order>> {
    ensure_role(user, "delivery")?;

    let order = store::try_claim(&state.pool, order_id, user.user_id).await?;

    tracing::info!(order_id = %order.id, agent_id = %user.user_id, "order claimed");
    if let Err(err) = record_order_event(
        &state.pool,
        Some(user.user_id),
        "order_claimed",
        order.id,
        serde_json::json!({}),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Order claimed", order, Some(Meta::empty())))
}

/// Complete the delivery: picked_up -> delivered plus the write-once
/// DeliveryReport, then cash settlement in the same logical operation.
/// Safe to retry: the store replays a committed delivery for the assigned
/// agent and the settlement reference dedupes in the ledger, so a caller
/// interrupted between the two steps just calls again.
pub async fn mark_delivered(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: MarkDeliveredRequest,
) -> AppResult<ApiResponse<DeliveryCompleted>> {
    ensure_role(user, "delivery")?;

    let (order, report) =
        store::complete_delivery(&state.pool, order_id, user.user_id, payload.notes).await?;

    // Money changes hands at handoff: a delivered cash order is settled
    // immediately, with no customer-side confirmation step.
    let order = if order.payment_method == PaymentMethod::Cash {
        payment_service::settle_cash(state, &order).await?
    } else {
        order
    };

    tracing::info!(order_id = %order.id, agent_id = %user.user_id, "order delivered");
    if let Err(err) = record_order_event(
        &state.pool,
        Some(user.user_id),
        "order_delivered",
        order.id,
        serde_json::json!({ "report_id": report.id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Delivery completed",
        DeliveryCompleted { order, report },
        Some(Meta::empty()),
    ))
}
