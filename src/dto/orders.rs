use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, OrderItem, OrderStatus, PaymentMethod};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub restaurant_id: Uuid,
    pub items: Vec<CreateOrderItem>,
    pub delivery_address: String,
    /// Where status notifications go (phone number or similar).
    pub contact_address: String,
    pub payment_method: PaymentMethod,
    pub delivery_fee: Option<i64>,
    pub notes: Option<String>,
    /// Optional client-side total; rejected when it disagrees with the
    /// server-priced total.
    pub total_amount: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderItem {
    pub catalog_item_id: Uuid,
    pub quantity: i32,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

/// Creation response; carries the processor reference for card orders so
/// the client can drive the confirmation flow.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payment_reference: Option<String>,
}
