use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::payments::{PaymentApplied, PaymentWebhookRequest},
    error::AppResult,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(webhook))
}

// Unauthenticated like the upstream processor callback; trust comes from
// the ledger's uniqueness check, not the caller.
#[utoipa::path(
    post,
    path = "/payments/webhook",
    request_body = PaymentWebhookRequest,
    responses(
        (status = 200, description = "Outcome applied (or replay acknowledged)", body = ApiResponse<PaymentApplied>),
        (status = 404, description = "Order not found"),
        (status = 422, description = "Amount disagrees with the order total"),
        (status = 503, description = "Store unavailable, safe to retry"),
    ),
    tag = "Payments"
)]
pub async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhookRequest>,
) -> AppResult<Json<ApiResponse<PaymentApplied>>> {
    let resp = payment_service::apply_payment_outcome(&state, payload).await?;
    Ok(Json(resp))
}
