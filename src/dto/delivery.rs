use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{DeliveryReport, Order};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct MarkDeliveredRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyOrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeliveryCompleted {
    pub order: Order,
    pub report: DeliveryReport,
}
