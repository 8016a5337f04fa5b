// Gateway trait for the hosted analytics backend
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Tables the dashboard reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    AnalyticsCounts,
    AnalyticsSpeeds,
    AnalyticsMobility,
    ParkingSpaces,
    ParkingGroups,
    ParkingChunks,
    TrafficData,
    Zones,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::AnalyticsCounts,
        Table::AnalyticsSpeeds,
        Table::AnalyticsMobility,
        Table::ParkingSpaces,
        Table::ParkingGroups,
        Table::ParkingChunks,
        Table::TrafficData,
        Table::Zones,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::AnalyticsCounts => "analytics_counts",
            Table::AnalyticsSpeeds => "analytics_speeds",
            Table::AnalyticsMobility => "analytics_mobility",
            Table::ParkingSpaces => "parking_spaces",
            Table::ParkingGroups => "parking_groups",
            Table::ParkingChunks => "parking_chunks",
            Table::TrafficData => "traffic_data",
            Table::Zones => "zones",
        }
    }

    /// Column that grows with every new row, used to detect inserts.
    pub fn cursor_column(self) -> &'static str {
        match self {
            Table::ParkingChunks => "chunk_timestamp",
            Table::Zones => "zone_id",
            _ => "timestamp",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire form of a timestamp in filters. Matches what chrono serializes.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A filtered, ordered, limited read of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: Table,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op: FilterOp::Gte,
            value: value.into(),
        });
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Kind of row change a subscriber cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Any,
}

impl ChangeKind {
    pub fn matches(self, event: ChangeKind) -> bool {
        self == ChangeKind::Any || self == event
    }
}

/// A change notification, optionally carrying the new row.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: Option<Value>,
}

/// Live subscription to one table's changes.
///
/// Dropping the handle releases the subscription.
pub struct Subscription {
    table: Table,
    kind: ChangeKind,
    events: mpsc::Receiver<ChangeEvent>,
    feed: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        table: Table,
        kind: ChangeKind,
        events: mpsc::Receiver<ChangeEvent>,
        feed: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            table,
            kind,
            events,
            feed,
        }
    }

    /// Next event of the subscribed kind, or `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        while let Some(event) = self.events.recv().await {
            if self.kind.matches(event.kind) {
                return Some(event);
            }
        }
        None
    }

    /// Stop receiving events and tear down the feed.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
        tracing::debug!("Released subscription on {}", self.table);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no rows found")]
    NotFound,
    #[error("request to backend failed: {0}")]
    Request(String),
    #[error("backend returned {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("failed to decode {table} rows: {message}")]
    Decode { table: Table, message: String },
}

#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Read rows matching the query
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, BackendError>;

    /// Insert a batch of rows in one request
    async fn insert(&self, table: Table, rows: &[Value]) -> Result<(), BackendError>;

    /// Exact row count of a table
    async fn count(&self, table: Table) -> Result<u64, BackendError>;

    /// Subscribe to changes of `kind` on `table`
    fn subscribe(&self, table: Table, kind: ChangeKind) -> Subscription;
}

/// Run a select and decode every row into `T`.
pub async fn select_as<T: DeserializeOwned>(
    gateway: &dyn BackendGateway,
    query: &SelectQuery,
) -> Result<Vec<T>, BackendError> {
    let rows = gateway.select(query).await?;
    decode_rows(query.table, rows)
}

pub fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|e| BackendError::Decode {
                table,
                message: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let query = SelectQuery::from(Table::AnalyticsCounts)
            .columns("timestamp")
            .order("timestamp", false)
            .limit(1);

        assert_eq!(query.table.name(), "analytics_counts");
        assert_eq!(query.columns, "timestamp");
        assert_eq!(query.order, vec![Order { column: "timestamp".into(), ascending: false }]);
        assert_eq!(query.limit, Some(1));
    }

    #[test]
    fn test_format_timestamp_matches_serde() {
        let ts: DateTime<Utc> = "2025-07-28T12:00:00.250Z".parse().unwrap();
        let serialized = serde_json::to_value(ts).unwrap();
        assert_eq!(serialized.as_str(), Some(format_timestamp(ts).as_str()));
    }

    #[test]
    fn test_change_kind_matching() {
        assert!(ChangeKind::Any.matches(ChangeKind::Insert));
        assert!(ChangeKind::Insert.matches(ChangeKind::Insert));
        assert!(!ChangeKind::Insert.matches(ChangeKind::Update));
    }

    #[tokio::test]
    async fn test_subscription_skips_other_kinds() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription::new(Table::ParkingChunks, ChangeKind::Insert, rx, None);

        tx.send(ChangeEvent { table: Table::ParkingChunks, kind: ChangeKind::Update, record: None })
            .await
            .unwrap();
        tx.send(ChangeEvent { table: Table::ParkingChunks, kind: ChangeKind::Insert, record: None })
            .await
            .unwrap();
        drop(tx);

        assert_eq!(sub.next().await.map(|e| e.kind), Some(ChangeKind::Insert));
        assert!(sub.next().await.is_none());
    }
}
