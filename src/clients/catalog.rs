use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

/// One priced menu entry as the catalog collaborator reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub available: bool,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_item(&self, item_id: Uuid) -> anyhow::Result<CatalogItem>;
}

pub struct HttpCatalogClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn get_item(&self, item_id: Uuid) -> anyhow::Result<CatalogItem> {
        let url = format!("{}/api/menu/{}", self.base_url, item_id);
        let item = self
            .http
            .get(&url)
            .send()
            .await
            .context("catalog request failed")?
            .error_for_status()
            .context("catalog returned an error status")?
            .json::<CatalogItem>()
            .await
            .context("invalid catalog item payload")?;
        Ok(item)
    }
}
