use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

/// Fire-and-forget outbound messaging. The watcher logs a failed send and
/// moves on; nothing in the order lifecycle waits on this.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, contact_address: &str, text: &str) -> anyhow::Result<()>;
}

pub struct HttpMessenger {
    base_url: String,
    http: reqwest::Client,
}

impl HttpMessenger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    text: &'a str,
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn send(&self, contact_address: &str, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/api/notifications/send", self.base_url);
        self.http
            .post(&url)
            .json(&SendRequest {
                to: contact_address,
                text,
            })
            .send()
            .await
            .context("messaging request failed")?
            .error_for_status()
            .context("messaging service rejected the send")?;
        Ok(())
    }
}
