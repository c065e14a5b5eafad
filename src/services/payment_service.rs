use uuid::Uuid;

use crate::{
    audit::record_order_event,
    dto::payments::{PaymentApplied, PaymentOutcome, PaymentWebhookRequest},
    error::{AppError, AppResult},
    models::{Order, OrderStatus},
    response::{ApiResponse, Meta},
    state::AppState,
    store::{self, PaymentApplication},
};

use super::order_service::CURRENCY;

/// Apply a payment-processor outcome to the order, exactly once. Safe to
/// call any number of times with the same reference: the first application
/// wins and every replay reports success without touching state.
pub async fn apply_payment_outcome(
    state: &AppState,
    payload: PaymentWebhookRequest,
) -> AppResult<ApiResponse<PaymentApplied>> {
    let currency = payload.currency.as_deref().unwrap_or(CURRENCY);

    let result = match payload.outcome {
        PaymentOutcome::Succeeded => {
            store::apply_payment_succeeded(
                &state.pool,
                payload.order_id,
                &payload.payment_reference,
                payload.amount,
                currency,
            )
            .await
        }
        PaymentOutcome::Failed => {
            store::apply_payment_failed(
                &state.pool,
                payload.order_id,
                &payload.payment_reference,
                payload.amount,
                currency,
            )
            .await
        }
    };

    let application = match result {
        Ok(application) => application,
        Err(err) => {
            if let AppError::AmountMismatch { expected, received } = &err {
                // Reportable anomaly, not a retryable failure: flagged for
                // manual reconciliation and the order is left untouched.
                audit_payment(
                    state,
                    payload.order_id,
                    "payment_amount_mismatch",
                    serde_json::json!({
                        "payment_reference": &payload.payment_reference,
                        "expected": expected,
                        "received": received,
                    }),
                )
                .await;
            }
            return Err(err);
        }
    };

    let (order, applied, message) = match application {
        PaymentApplication::Applied(order) => {
            tracing::info!(
                order_id = %order.id,
                payment_status = %order.payment_status,
                status = %order.status,
                "payment outcome applied"
            );
            audit_payment(
                state,
                order.id,
                "payment_applied",
                serde_json::json!({
                    "payment_reference": &payload.payment_reference,
                    "outcome": payload.outcome,
                    "amount": payload.amount,
                }),
            )
            .await;
            // Money captured for an order that will never be fulfilled;
            // needs an operator-driven refund.
            if payload.outcome == PaymentOutcome::Succeeded
                && order.status == OrderStatus::Cancelled
            {
                audit_payment(
                    state,
                    order.id,
                    "payment_anomaly",
                    serde_json::json!({
                        "payment_reference": &payload.payment_reference,
                        "status": order.status,
                        "payment_status": order.payment_status,
                    }),
                )
                .await;
            }
            (order, true, "Payment outcome applied")
        }
        PaymentApplication::Replayed(order) => {
            tracing::debug!(
                order_id = %order.id,
                reference = %payload.payment_reference,
                "payment outcome replayed, nothing re-applied"
            );
            (order, false, "Payment outcome already recorded")
        }
        PaymentApplication::RecordedAnomalous(order) => {
            tracing::warn!(
                order_id = %order.id,
                reference = %payload.payment_reference,
                status = %order.status,
                payment_status = %order.payment_status,
                "payment recorded but order no longer accepts the outcome"
            );
            audit_payment(
                state,
                order.id,
                "payment_anomaly",
                serde_json::json!({
                    "payment_reference": &payload.payment_reference,
                    "outcome": payload.outcome,
                    "status": order.status,
                    "payment_status": order.payment_status,
                }),
            )
            .await;
            (order, true, "Payment recorded; order flagged for review")
        }
    };

    Ok(ApiResponse::success(
        message,
        PaymentApplied { order, applied },
        Some(Meta::empty()),
    ))
}

/// Cash-on-delivery settlement, invoked by the delivery flow once the order
/// is delivered. The synthetic reference keeps the operation idempotent
/// under retried delivery confirmations.
pub async fn settle_cash(state: &AppState, order: &Order) -> AppResult<Order> {
    let reference = format!("cash-{}", order.id);
    let application = store::apply_payment_succeeded(
        &state.pool,
        order.id,
        &reference,
        order.total_amount,
        CURRENCY,
    )
    .await?;

    let settled = match application {
        PaymentApplication::Applied(order) | PaymentApplication::Replayed(order) => order,
        PaymentApplication::RecordedAnomalous(order) => {
            audit_payment(
                state,
                order.id,
                "payment_anomaly",
                serde_json::json!({
                    "payment_reference": reference,
                    "outcome": "succeeded",
                }),
            )
            .await;
            order
        }
    };
    Ok(settled)
}

async fn audit_payment(state: &AppState, order_id: Uuid, action: &str, detail: serde_json::Value) {
    if let Err(err) = record_order_event(&state.pool, None, action, order_id, detail).await {
        tracing::warn!(order_id = %order_id, error = %err, "audit log failed");
    }
}
