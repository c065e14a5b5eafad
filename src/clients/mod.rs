//! Interfaces to the collaborators this core consumes but does not own:
//! the menu catalog, the external payment processor and the messaging
//! service. Each is a trait so the services and the watcher stay testable
//! without the network.

pub mod catalog;
pub mod messaging;
pub mod payment;

pub use catalog::{CatalogClient, CatalogItem, HttpCatalogClient};
pub use messaging::{HttpMessenger, Messenger};
pub use payment::{HttpPaymentProcessor, PaymentProcessor};
