// Traffic overview rows (`traffic_data` table)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficData {
    pub timestamp: DateTime<Utc>,
    pub traffic_volume: f64,
    pub congestion_rate: f64,
    pub parking_utilization: f64,
    pub illegal_parking_count: f64,
}

impl TrafficData {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            traffic_volume: 0.0,
            congestion_rate: 0.0,
            parking_utilization: 0.0,
            illegal_parking_count: 0.0,
        }
    }
}
