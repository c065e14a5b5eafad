use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The external payment processor, reduced to the one call the coordinator
/// makes: opening an intent for a card order. Outcomes come back through
/// the webhook route, not through this client.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Returns the processor's opaque payment reference.
    async fn create_intent(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> anyhow::Result<String>;
}

pub struct HttpPaymentProcessor {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPaymentProcessor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct IntentRequest<'a> {
    order_id: Uuid,
    amount: i64,
    currency: &'a str,
}

#[derive(Deserialize)]
struct IntentResponse {
    payment_intent_id: String,
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn create_intent(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> anyhow::Result<String> {
        let url = format!("{}/api/payments/create-payment-intent", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&IntentRequest {
                order_id,
                amount,
                currency,
            })
            .send()
            .await
            .context("payment intent request failed")?
            .error_for_status()
            .context("payment processor rejected the intent")?
            .json::<IntentResponse>()
            .await
            .context("invalid payment intent payload")?;
        Ok(resp.payment_intent_id)
    }
}
