// Parking playback domain models
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Number of one-minute frames in a chunk.
pub const CHUNK_MINUTES: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Small,
    Medium,
    Large,
}

/// A parked vehicle observed at one minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingData {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub vehicle_type: VehicleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

impl ParkingData {
    /// Frame this observation belongs to within its chunk.
    pub fn frame_minute(&self) -> u8 {
        (self.timestamp.minute() % CHUNK_MINUTES as u32) as u8
    }
}

/// A 15-minute batch of parking observations, the unit of playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingChunk {
    pub chunk_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub parking_data: Vec<ParkingData>,
}

impl ParkingChunk {
    pub fn empty(chunk_timestamp: DateTime<Utc>) -> Self {
        Self {
            chunk_timestamp,
            parking_data: Vec::new(),
        }
    }
}
