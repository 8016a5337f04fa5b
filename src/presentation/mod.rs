// Presentation layer - HTTP surface over the dashboard view models
pub mod app_state;
pub mod handlers;
