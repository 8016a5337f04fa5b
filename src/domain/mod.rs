// Domain layer - Rows, summaries and the pure aggregation over them
pub mod aggregation;
pub mod analytics;
pub mod parking;
pub mod traffic;
