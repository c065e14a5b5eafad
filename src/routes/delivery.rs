use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::delivery::{DeliveryCompleted, MarkDeliveredRequest, ReadyOrderList},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Order,
    response::ApiResponse,
    services::delivery_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ready", get(list_ready))
        .route("/{id}/claim", post(claim))
        .route("/{id}/delivered", post(mark_delivered))
}

#[utoipa::path(
    get,
    path = "/delivery/ready",
    responses(
        (status = 200, description = "Ready, unclaimed orders", body = ApiResponse<ReadyOrderList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Delivery"
)]
pub async fn list_ready(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<ReadyOrderList>>> {
    let resp = delivery_service::list_ready(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/delivery/{id}/claim",
    responses(
        (status = 200, description = "Claim won", body = ApiResponse<Order>),
        (status = 409, description = "Already claimed or not ready"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Delivery"
)]
pub async fn claim(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp = delivery_service::claim(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/delivery/{id}/delivered",
    request_body = MarkDeliveredRequest,
    responses(
        (status = 200, description = "Delivery completed", body = ApiResponse<DeliveryCompleted>),
        (status = 403, description = "Not the assigned agent"),
        (status = 409, description = "Order is not picked up"),
    ),
    security(("bearer_auth" = [])),
    tag = "Delivery"
)]
pub async fn mark_delivered(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<MarkDeliveredRequest>,
) -> AppResult<Json<ApiResponse<DeliveryCompleted>>> {
    let resp = delivery_service::mark_delivered(&state, &user, id, payload).await?;
    Ok(Json(resp))
}
