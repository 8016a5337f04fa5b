// Analytics domain models - raw sensor rows and the summaries derived from them
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category tag on a detected object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Car,
    Pedestrian,
    Cyclist,
    Misc,
}

impl Label {
    /// Map the numeric code stored by the sensors.
    /// Unknown codes return `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Label::Car),
            2 => Some(Label::Pedestrian),
            3 => Some(Label::Cyclist),
            4 => Some(Label::Misc),
            _ => None,
        }
    }

}

/// One row of the `analytics_counts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsCount {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub analytic_id: Option<String>,
    pub label: i64,
    #[serde(default)]
    pub count: Option<u64>,
}

impl AnalyticsCount {
    pub fn new(timestamp: DateTime<Utc>, label: i64, count: u64) -> Self {
        Self {
            timestamp,
            analytic_id: None,
            label,
            count: Some(count),
        }
    }

    pub fn label(&self) -> Option<Label> {
        Label::from_code(self.label)
    }

    /// Null counts read as zero.
    pub fn count(&self) -> u64 {
        self.count.unwrap_or(0)
    }
}

/// One row of the `parking_spaces` table: the state of a zone at a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSpaceState {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub zone_id: Option<String>,
    pub occupied: bool,
    #[serde(default)]
    pub parked_label: Option<i64>,
    #[serde(default)]
    pub is_real_occupied_transition: Option<bool>,
    #[serde(default)]
    pub last_occupied_state_transition_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub occupied_state_duration: Option<i64>,
    #[serde(default)]
    pub last_24h_cumulative_occupied_duration: Option<i64>,
    #[serde(default)]
    pub last_24h_max_occupied_duration: Option<i64>,
}

impl ParkingSpaceState {
    pub fn new(timestamp: DateTime<Utc>, zone_id: impl Into<String>, occupied: bool) -> Self {
        Self {
            timestamp,
            zone_id: Some(zone_id.into()),
            occupied,
            parked_label: None,
            is_real_occupied_transition: None,
            last_occupied_state_transition_time: None,
            occupied_state_duration: None,
            last_24h_cumulative_occupied_duration: None,
            last_24h_max_occupied_duration: None,
        }
    }
}

/// Per-timestamp label counts.
///
/// `total_count` also includes rows whose label is not recognized, so the four
/// named buckets may sum to less than the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSummary {
    pub timestamp: DateTime<Utc>,
    pub car_count: u64,
    pub pedestrian_count: u64,
    pub cyclist_count: u64,
    pub misc_count: u64,
    pub total_count: u64,
}

impl TrafficSummary {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            car_count: 0,
            pedestrian_count: 0,
            cyclist_count: 0,
            misc_count: 0,
            total_count: 0,
        }
    }

    /// Fold one row into the summary.
    pub fn add(&mut self, row: &AnalyticsCount) {
        let count = row.count();
        match row.label() {
            Some(Label::Car) => self.car_count += count,
            Some(Label::Pedestrian) => self.pedestrian_count += count,
            Some(Label::Cyclist) => self.cyclist_count += count,
            Some(Label::Misc) => self.misc_count += count,
            None => {}
        }
        self.total_count += count;
    }

    pub fn labelled_count(&self) -> u64 {
        self.car_count + self.pedestrian_count + self.cyclist_count + self.misc_count
    }
}

/// Occupancy of all zones observed at one timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingSummary {
    pub timestamp: DateTime<Utc>,
    pub occupied_spaces: u64,
    pub available_spaces: u64,
    /// Whole percent in `[0, 100]`.
    pub occupancy_rate: u8,
}

impl ParkingSummary {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            occupied_spaces: 0,
            available_spaces: 0,
            occupancy_rate: 0,
        }
    }
}
