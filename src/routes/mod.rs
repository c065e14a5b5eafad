use axum::Router;

use crate::state::AppState;

pub mod delivery;
pub mod doc;
pub mod health;
pub mod orders;
pub mod params;
pub mod payments;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/orders", orders::router())
        .nest("/payments", payments::router())
        .nest("/delivery", delivery::router())
}
