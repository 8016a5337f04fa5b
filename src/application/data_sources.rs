// Data sources - what each coordinator fetches and how it falls back
use crate::application::backend_gateway::{
    select_as, BackendError, BackendGateway, ChangeEvent, ChangeKind, SelectQuery, Table,
    format_timestamp,
};
use crate::application::view_state::Latest;
use crate::domain::aggregation::{aggregate_parking_summary, aggregate_traffic_summary, build_trend_series};
use crate::domain::analytics::{AnalyticsCount, ParkingSpaceState, ParkingSummary, TrafficSummary};
use crate::domain::parking::ParkingChunk;
use crate::domain::traffic::TrafficData;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// One kind of data kept fresh by a coordinator.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Table changes that should trigger a re-fetch
    fn subscription(&self) -> Option<(Table, ChangeKind)>;

    /// Period of the scheduled re-fetch
    fn refresh_interval(&self) -> Option<Duration>;

    async fn fetch(&self, gateway: &dyn BackendGateway) -> Result<Latest<Self::Output>, BackendError>;

    /// Value shown when the backend has no rows
    fn fallback(&self) -> Self::Output;

    /// Value carried by a change notification, if it can be used as is.
    fn from_change(&self, _event: &ChangeEvent) -> Option<Self::Output> {
        None
    }
}

#[derive(Deserialize)]
struct TimestampRow {
    timestamp: DateTime<Utc>,
}

/// Newest `timestamp` in a table, `None` when the table is empty.
async fn latest_timestamp(
    gateway: &dyn BackendGateway,
    table: Table,
) -> Result<Option<DateTime<Utc>>, BackendError> {
    let query = SelectQuery::from(table)
        .columns("timestamp")
        .order("timestamp", false)
        .limit(1);

    match select_as::<TimestampRow>(gateway, &query).await {
        Ok(rows) => Ok(rows.into_iter().next().map(|r| r.timestamp)),
        Err(BackendError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Newest row of a table ordered by `column`.
async fn latest_row<T: serde::de::DeserializeOwned>(
    gateway: &dyn BackendGateway,
    table: Table,
    column: &str,
) -> Result<Latest<T>, BackendError> {
    let query = SelectQuery::from(table).order(column, false).limit(1);

    match select_as::<T>(gateway, &query).await {
        Ok(rows) => Ok(rows.into_iter().next().map_or(Latest::Empty, Latest::Found)),
        Err(BackendError::NotFound) => Ok(Latest::Empty),
        Err(e) => Err(e),
    }
}

fn decode_record<T: serde::de::DeserializeOwned>(event: &ChangeEvent) -> Option<T> {
    let record = event.record.clone()?;
    match serde_json::from_value(record) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring undecodable {} change record: {}", event.table, e);
            None
        }
    }
}

/// Label counts at the newest timestamp of `analytics_counts`.
pub struct TrafficSummarySource {
    pub interval: Duration,
}

#[async_trait]
impl DataSource for TrafficSummarySource {
    type Output = TrafficSummary;

    fn name(&self) -> &'static str {
        "traffic_summary"
    }

    fn subscription(&self) -> Option<(Table, ChangeKind)> {
        Some((Table::AnalyticsCounts, ChangeKind::Insert))
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn fetch(&self, gateway: &dyn BackendGateway) -> Result<Latest<TrafficSummary>, BackendError> {
        let Some(at) = latest_timestamp(gateway, Table::AnalyticsCounts).await? else {
            return Ok(Latest::Empty);
        };

        let query = SelectQuery::from(Table::AnalyticsCounts)
            .columns("timestamp,label,count")
            .eq("timestamp", format_timestamp(at));
        let rows: Vec<AnalyticsCount> = select_as(gateway, &query).await?;

        let summary = aggregate_traffic_summary(&rows, at);
        if summary.labelled_count() < summary.total_count {
            tracing::debug!(
                "{} counts at {} carry unknown labels",
                summary.total_count - summary.labelled_count(),
                at
            );
        }
        Ok(Latest::Found(summary))
    }

    fn fallback(&self) -> TrafficSummary {
        TrafficSummary::empty(Utc::now())
    }
}

/// Occupancy at the newest timestamp of `parking_spaces`.
pub struct ParkingSummarySource {
    pub interval: Duration,
}

#[async_trait]
impl DataSource for ParkingSummarySource {
    type Output = ParkingSummary;

    fn name(&self) -> &'static str {
        "parking_summary"
    }

    fn subscription(&self) -> Option<(Table, ChangeKind)> {
        Some((Table::ParkingSpaces, ChangeKind::Any))
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn fetch(&self, gateway: &dyn BackendGateway) -> Result<Latest<ParkingSummary>, BackendError> {
        let Some(at) = latest_timestamp(gateway, Table::ParkingSpaces).await? else {
            return Ok(Latest::Empty);
        };

        let query = SelectQuery::from(Table::ParkingSpaces)
            .columns("timestamp,occupied")
            .eq("timestamp", format_timestamp(at));
        let rows: Vec<ParkingSpaceState> = select_as(gateway, &query).await?;

        Ok(Latest::Found(aggregate_parking_summary(&rows, at)))
    }

    fn fallback(&self) -> ParkingSummary {
        ParkingSummary::empty(Utc::now())
    }
}

/// Per-timestamp summaries over a trailing window (or all rows).
pub struct TrafficTrendsSource {
    pub interval: Duration,
    pub window: Option<chrono::Duration>,
}

#[async_trait]
impl DataSource for TrafficTrendsSource {
    type Output = Vec<TrafficSummary>;

    fn name(&self) -> &'static str {
        "traffic_trends"
    }

    fn subscription(&self) -> Option<(Table, ChangeKind)> {
        None
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn fetch(&self, gateway: &dyn BackendGateway) -> Result<Latest<Vec<TrafficSummary>>, BackendError> {
        let mut query = SelectQuery::from(Table::AnalyticsCounts)
            .columns("timestamp,label,count")
            .order("timestamp", true);
        if let Some(window) = self.window {
            query = query.gte("timestamp", format_timestamp(Utc::now() - window));
        }

        let rows: Vec<AnalyticsCount> = select_as(gateway, &query).await?;
        tracing::debug!("Fetched {} count rows for trends", rows.len());

        // An empty series is a valid chart, not a missing one
        Ok(Latest::Found(build_trend_series(&rows)))
    }

    fn fallback(&self) -> Vec<TrafficSummary> {
        Vec::new()
    }
}

/// Every zone at the newest timestamp, ordered by zone id.
pub struct ParkingSpacesSource {
    pub interval: Duration,
}

#[async_trait]
impl DataSource for ParkingSpacesSource {
    type Output = Vec<ParkingSpaceState>;

    fn name(&self) -> &'static str {
        "parking_spaces"
    }

    fn subscription(&self) -> Option<(Table, ChangeKind)> {
        Some((Table::ParkingSpaces, ChangeKind::Any))
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn fetch(&self, gateway: &dyn BackendGateway) -> Result<Latest<Vec<ParkingSpaceState>>, BackendError> {
        let Some(at) = latest_timestamp(gateway, Table::ParkingSpaces).await? else {
            return Ok(Latest::Empty);
        };

        let query = SelectQuery::from(Table::ParkingSpaces)
            .eq("timestamp", format_timestamp(at))
            .order("zone_id", true);

        Ok(Latest::Found(select_as(gateway, &query).await?))
    }

    fn fallback(&self) -> Vec<ParkingSpaceState> {
        Vec::new()
    }
}

/// Newest parking chunk, the playback source.
///
/// Not polled: a new chunk only arrives through the change feed.
pub struct ParkingChunkSource;

#[async_trait]
impl DataSource for ParkingChunkSource {
    type Output = ParkingChunk;

    fn name(&self) -> &'static str {
        "parking_chunk"
    }

    fn subscription(&self) -> Option<(Table, ChangeKind)> {
        Some((Table::ParkingChunks, ChangeKind::Insert))
    }

    fn refresh_interval(&self) -> Option<Duration> {
        None
    }

    async fn fetch(&self, gateway: &dyn BackendGateway) -> Result<Latest<ParkingChunk>, BackendError> {
        latest_row(gateway, Table::ParkingChunks, "chunk_timestamp").await
    }

    fn fallback(&self) -> ParkingChunk {
        ParkingChunk::empty(Utc::now())
    }

    fn from_change(&self, event: &ChangeEvent) -> Option<ParkingChunk> {
        decode_record(event)
    }
}

/// Newest row of the `traffic_data` overview table.
pub struct TrafficDataSource {
    pub interval: Duration,
}

#[async_trait]
impl DataSource for TrafficDataSource {
    type Output = TrafficData;

    fn name(&self) -> &'static str {
        "traffic_data"
    }

    fn subscription(&self) -> Option<(Table, ChangeKind)> {
        Some((Table::TrafficData, ChangeKind::Insert))
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn fetch(&self, gateway: &dyn BackendGateway) -> Result<Latest<TrafficData>, BackendError> {
        latest_row(gateway, Table::TrafficData, "timestamp").await
    }

    fn fallback(&self) -> TrafficData {
        TrafficData::empty(Utc::now())
    }

    fn from_change(&self, event: &ChangeEvent) -> Option<TrafficData> {
        decode_record(event)
    }
}

/// `traffic_data` rows over the trailing window, ascending.
pub struct TrafficHistorySource {
    pub interval: Duration,
    pub window: chrono::Duration,
}

#[async_trait]
impl DataSource for TrafficHistorySource {
    type Output = Vec<TrafficData>;

    fn name(&self) -> &'static str {
        "traffic_history"
    }

    fn subscription(&self) -> Option<(Table, ChangeKind)> {
        Some((Table::TrafficData, ChangeKind::Insert))
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn fetch(&self, gateway: &dyn BackendGateway) -> Result<Latest<Vec<TrafficData>>, BackendError> {
        let query = SelectQuery::from(Table::TrafficData)
            .gte("timestamp", format_timestamp(Utc::now() - self.window))
            .order("timestamp", true);

        match select_as(gateway, &query).await {
            Ok(rows) => Ok(Latest::Found(rows)),
            Err(BackendError::NotFound) => Ok(Latest::Empty),
            Err(e) => Err(e),
        }
    }

    fn fallback(&self) -> Vec<TrafficData> {
        Vec::new()
    }
}
