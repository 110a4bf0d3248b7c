pub mod assets;
pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use assets::{index_handler, static_routes};
pub use health::{health_handler, health_live_handler, metrics_handler};
pub use websocket::websocket_handler;
