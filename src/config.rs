use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Catalog/menu collaborator, used to validate and price line items.
    pub catalog_base_url: String,
    /// External payment processor (intent creation).
    pub payment_base_url: String,
    /// Messaging collaborator the watcher dispatches through.
    pub messaging_base_url: String,
    pub watcher_poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let catalog_base_url = env::var("CATALOG_SERVICE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5001".to_string());
        let payment_base_url = env::var("PAYMENT_SERVICE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5002".to_string());
        let messaging_base_url = env::var("MESSAGING_SERVICE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5003".to_string());
        let watcher_poll_interval = env::var("WATCHER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(2));
        Ok(Self {
            database_url,
            host,
            port,
            catalog_base_url,
            payment_base_url,
            messaging_base_url,
            watcher_poll_interval,
        })
    }
}
