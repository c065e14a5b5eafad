pub mod delivery_service;
pub mod order_service;
pub mod payment_service;
