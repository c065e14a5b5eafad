use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

/// Processor callback payload. Delivered at-least-once, possibly duplicated
/// and out of order; the handler dedupes by `payment_reference`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentWebhookRequest {
    pub order_id: Uuid,
    pub payment_reference: String,
    pub outcome: PaymentOutcome,
    /// Minor currency units.
    pub amount: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentApplied {
    pub order: Order,
    /// False when this event had been seen before and nothing was re-applied.
    pub applied: bool,
}
