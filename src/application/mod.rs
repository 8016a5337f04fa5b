// Application layer - Coordinators, playback and tooling use cases
pub mod backend_gateway;
pub mod connection_check;
pub mod coordinator;
pub mod dashboard_service;
pub mod data_sources;
pub mod import_service;
pub mod playback;
pub mod view_state;

#[cfg(test)]
pub mod memory_gateway;
