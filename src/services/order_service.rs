use uuid::Uuid;

use crate::{
    audit::record_order_event,
    dto::orders::{CreateOrderRequest, CreatedOrder, OrderList, OrderWithItems, UpdateStatusRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_role},
    models::{Order, OrderStatus, PaymentMethod},
    response::{ApiResponse, Meta},
    routes::params::OrderListQuery,
    state::AppState,
    store::{self, NewOrder, NewOrderItem},
};

pub const CURRENCY: &str = "lkr";

/// Create an order: price every line item against the catalog, freeze the
/// total, and for card orders open a payment intent with the processor.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<CreatedOrder>> {
    ensure_role(user, "customer")?;

    if payload.items.is_empty() {
        return Err(AppError::BadRequest("At least one item is required".into()));
    }

    let mut items = Vec::with_capacity(payload.items.len());
    for line in &payload.items {
        if line.quantity < 1 {
            return Err(AppError::BadRequest("Item quantity must be at least 1".into()));
        }
        let catalog_item = state
            .catalog
            .get_item(line.catalog_item_id)
            .await
            .map_err(|err| AppError::Collaborator(format!("catalog lookup failed: {err}")))?;
        if !catalog_item.available {
            return Err(AppError::BadRequest(format!(
                "Item {} is not available",
                catalog_item.name
            )));
        }
        items.push(NewOrderItem {
            catalog_item_id: catalog_item.id,
            name: catalog_item.name,
            quantity: line.quantity,
            // Catalog prices only; whatever the client thinks it owes is
            // checked below, never trusted.
            unit_price: catalog_item.price,
            note: line.note.clone(),
        });
    }

    let new_order = NewOrder {
        customer_id: user.user_id,
        restaurant_id: payload.restaurant_id,
        delivery_fee: payload.delivery_fee.unwrap_or(0),
        payment_method: payload.payment_method,
        delivery_address: payload.delivery_address,
        contact_address: payload.contact_address,
        notes: payload.notes,
        items,
    };

    let total = new_order.total_amount();
    if let Some(claimed) = payload.total_amount {
        if claimed != total {
            return Err(AppError::BadRequest(format!(
                "total mismatch: client sent {claimed}, priced {total}"
            )));
        }
    }

    let (order, items) = store::insert_order(&state.pool, new_order).await?;

    let mut payment_reference = None;
    if order.payment_method == PaymentMethod::Card {
        match state.payments.create_intent(order.id, total, CURRENCY).await {
            Ok(reference) => {
                let order = store::record_payment_reference(&state.pool, order.id, &reference)
                    .await?;
                payment_reference = order.payment_reference.clone();
            }
            Err(err) => {
                tracing::warn!(order_id = %order.id, error = %err, "payment intent creation failed");
                store::mark_payment_failed(&state.pool, order.id).await?;
                return Err(AppError::Collaborator(
                    "Payment initialization failed".into(),
                ));
            }
        }
    }

    if let Err(err) = record_order_event(
        &state.pool,
        Some(user.user_id),
        "order_created",
        order.id,
        serde_json::json!({ "total_amount": total }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let order = store::fetch_order(&state.pool, order.id)
        .await?
        .ok_or(AppError::OrderNotFound)?;

    Ok(ApiResponse::success(
        "Order created",
        CreatedOrder {
            order,
            items,
            payment_reference,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let (orders, total) =
        store::list_for_customer(&state.pool, user.user_id, query.status, limit, offset).await?;

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn list_restaurant_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_role(user, "restaurant")?;
    let restaurant_id = user.restaurant_id.ok_or(AppError::Forbidden)?;

    let (page, limit, offset) = query.pagination.normalize();
    let (orders, total) =
        store::list_for_restaurant(&state.pool, restaurant_id, query.status, limit, offset).await?;

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = store::fetch_order(&state.pool, id)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    ensure_can_view(user, &order)?;

    let items = store::fetch_items(&state.pool, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

/// Restaurant-side status pushes: confirmed -> preparing -> ready, plus
/// cancellation while that is still legal. Pickup and delivery belong to
/// the delivery flow, so they are rejected here.
pub async fn update_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_role(user, "restaurant")?;
    let restaurant_id = user.restaurant_id.ok_or(AppError::Forbidden)?;

    if matches!(
        payload.status,
        OrderStatus::PickedUp | OrderStatus::Delivered | OrderStatus::Pending
    ) {
        return Err(AppError::Forbidden);
    }

    // Ownership is immutable, so this read does not race the transition.
    let order = store::fetch_order(&state.pool, id)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    if order.restaurant_id != restaurant_id {
        return Err(AppError::Forbidden);
    }

    let order = store::transition_status(&state.pool, id, payload.status).await?;

    if let Err(err) = record_order_event(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        order.id,
        serde_json::json!({ "status": order.status }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Order updated", order, Some(Meta::empty())))
}

/// Customer cancellation; legal only while the order is pending or
/// confirmed (the state machine enforces that inside the update).
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    let order = store::fetch_order(&state.pool, id)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    if order.customer_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let order = store::transition_status(&state.pool, id, OrderStatus::Cancelled).await?;

    if let Err(err) = record_order_event(
        &state.pool,
        Some(user.user_id),
        "order_cancelled",
        order.id,
        serde_json::json!({}),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Order cancelled", order, Some(Meta::empty())))
}

fn ensure_can_view(user: &AuthUser, order: &Order) -> Result<(), AppError> {
    let allowed = match user.role.as_str() {
        "customer" => order.customer_id == user.user_id,
        "restaurant" => user.restaurant_id == Some(order.restaurant_id),
        "delivery" => order.delivery_agent_id == Some(user.user_id),
        _ => false,
    };
    if allowed { Ok(()) } else { Err(AppError::Forbidden) }
}
