// Aggregation engine - pure folds from raw rows into summaries
use super::analytics::{AnalyticsCount, ParkingSpaceState, ParkingSummary, TrafficSummary};
use super::parking::{ParkingChunk, ParkingData};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Fold every row stamped exactly `at` into one summary.
///
/// With no matching rows the summary is all zeros and carries `at`, so the
/// caller decides the fallback timestamp.
pub fn aggregate_traffic_summary(rows: &[AnalyticsCount], at: DateTime<Utc>) -> TrafficSummary {
    rows.iter()
        .filter(|row| row.timestamp == at)
        .fold(TrafficSummary::empty(at), |mut summary, row| {
            summary.add(row);
            summary
        })
}

/// Occupancy of the zones observed exactly at `at`.
pub fn aggregate_parking_summary(rows: &[ParkingSpaceState], at: DateTime<Utc>) -> ParkingSummary {
    let (occupied, observed) = rows
        .iter()
        .filter(|row| row.timestamp == at)
        .fold((0u64, 0u64), |(occupied, observed), row| {
            (occupied + row.occupied as u64, observed + 1)
        });

    // Empty set counts as one space so the rate is 0 rather than undefined
    let total = observed.max(1);

    ParkingSummary {
        timestamp: at,
        occupied_spaces: occupied,
        available_spaces: observed - occupied,
        occupancy_rate: occupancy_rate(occupied, total),
    }
}

/// Nearest whole percent, halves rounded up.
fn occupancy_rate(occupied: u64, total: u64) -> u8 {
    ((occupied * 200 + total) / (2 * total)).min(100) as u8
}

/// One summary per distinct timestamp, in first-seen order.
///
/// Timestamps are grouped by exact equality. Rows must already be sorted
/// ascending for the series to be chronological.
pub fn build_trend_series(rows: &[AnalyticsCount]) -> Vec<TrafficSummary> {
    let mut series: Vec<TrafficSummary> = Vec::new();
    let mut index: HashMap<DateTime<Utc>, usize> = HashMap::new();

    for row in rows {
        let slot = *index.entry(row.timestamp).or_insert_with(|| {
            series.push(TrafficSummary::empty(row.timestamp));
            series.len() - 1
        });
        series[slot].add(row);
    }

    series
}

/// Vehicles shown at playback frame `minute`.
pub fn visible_vehicles(chunk: &ParkingChunk, minute: u8) -> Vec<&ParkingData> {
    chunk
        .parking_data
        .iter()
        .filter(|vehicle| vehicle.frame_minute() == minute)
        .collect()
}
