use std::sync::Arc;

use crate::clients::{CatalogClient, Messenger, PaymentProcessor};
use crate::db::DbPool;

/// Shared handles for request handlers and the watcher task. The pool is the
/// only shared mutable resource; every collaborator sits behind a trait so
/// tests can swap in doubles.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub catalog: Arc<dyn CatalogClient>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub messenger: Arc<dyn Messenger>,
}
