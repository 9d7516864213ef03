// Washboard - session-scoped tabular data import and cleaning service

pub mod config;
pub mod models;
pub mod types;
pub mod table;
pub mod sandbox;    // Restricted script interpreter for transformation code
pub mod cleaning;
pub mod data_registry;
pub mod session;
pub mod fetch;      // CSV, Excel, Notion and REST importers
pub mod routes;
pub mod middleware;
pub mod utils;

pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
