// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod http_client;
pub mod import_source;
pub mod rest_gateway;
