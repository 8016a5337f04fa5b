// PostgREST gateway implementation
use crate::application::backend_gateway::{
    BackendError, BackendGateway, ChangeEvent, ChangeKind, SelectQuery, Subscription, Table,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// PostgREST error code for "zero rows where one was required".
const NO_ROWS_CODE: &str = "PGRST116";

#[derive(Debug, Clone)]
pub struct RestGateway {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
    change_poll: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct RestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl RestGateway {
    pub fn new(base_url: String, anon_key: String, client: reqwest::Client, change_poll: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            client,
            change_poll,
        }
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn build_select_url(&self, query: &SelectQuery) -> String {
        let mut params = vec![format!("select={}", urlencoding::encode(&query.columns))];

        for filter in &query.filters {
            params.push(format!(
                "{}={}.{}",
                urlencoding::encode(&filter.column),
                filter.op.as_str(),
                urlencoding::encode(&filter.value)
            ));
        }

        if !query.order.is_empty() {
            let order: Vec<String> = query
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect();
            params.push(format!("order={}", order.join(",")));
        }

        if let Some(limit) = query.limit {
            params.push(format!("limit={}", limit));
        }

        format!("{}?{}", self.table_url(query.table), params.join("&"))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status.as_u16(), &body))
    }
}

fn error_from_body(status: u16, body: &str) -> BackendError {
    let parsed: RestErrorBody = serde_json::from_str(body).unwrap_or_default();

    if parsed.code.as_deref() == Some(NO_ROWS_CODE) {
        return BackendError::NotFound;
    }

    let message = match (parsed.message, parsed.details) {
        (Some(message), Some(details)) => format!("{} ({})", message, details),
        (Some(message), None) => message,
        (None, _) if !body.is_empty() => body.to_string(),
        (None, _) => "empty response body".to_string(),
    };

    BackendError::Status {
        status,
        code: parsed.code,
        message,
    }
}

/// Total from a `Content-Range` header such as `0-24/573` or `*/0`.
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

fn request_error(e: reqwest::Error) -> BackendError {
    BackendError::Request(e.to_string())
}

#[async_trait]
impl BackendGateway for RestGateway {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, BackendError> {
        let url = self.build_select_url(query);
        tracing::debug!("Executing select: {}", url);

        let response = self
            .authorized(self.client.get(&url))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(request_error)?;

        Self::check(response)
            .await?
            .json::<Vec<Value>>()
            .await
            .map_err(|e| BackendError::Decode {
                table: query.table,
                message: e.to_string(),
            })
    }

    async fn insert(&self, table: Table, rows: &[Value]) -> Result<(), BackendError> {
        let response = self
            .authorized(self.client.post(self.table_url(table)))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await
            .map_err(request_error)?;

        Self::check(response).await?;
        Ok(())
    }

    async fn count(&self, table: Table) -> Result<u64, BackendError> {
        let response = self
            .authorized(self.client.head(format!("{}?select=*", self.table_url(table))))
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(request_error)?;

        let response = Self::check(response).await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| BackendError::Decode {
                table,
                message: "missing Content-Range total".to_string(),
            })
    }

    fn subscribe(&self, table: Table, kind: ChangeKind) -> Subscription {
        let (tx, rx) = mpsc::channel(16);
        let gateway = self.clone();
        let feed = tokio::spawn(async move { run_change_feed(&gateway, table, gateway.change_poll, tx).await });
        tracing::debug!("Subscribed to {} changes ({:?})", table, kind);
        Subscription::new(table, kind, rx, Some(feed))
    }
}

/// Tracks the newest cursor value seen on a table.
#[derive(Debug, Default)]
struct CursorTracker {
    primed: bool,
    last: Option<Value>,
}

impl CursorTracker {
    /// Feed the newest row of one poll. Returns the row when the cursor moved
    /// since the previous poll; the first poll only records the starting point.
    fn advance(&mut self, newest: Option<Value>, cursor_column: &str) -> Option<Value> {
        let cursor = newest.as_ref().and_then(|row| row.get(cursor_column).cloned());

        if !self.primed {
            self.primed = true;
            self.last = cursor;
            return None;
        }

        if cursor.is_none() || cursor == self.last {
            return None;
        }
        self.last = cursor;
        newest
    }
}

/// Poll the newest cursor value of `table` and emit an insert whenever it advances.
///
/// Failed polls are logged and retried on the next tick. Ends once the
/// receiving side is gone.
async fn run_change_feed<G>(gateway: &G, table: Table, period: Duration, tx: mpsc::Sender<ChangeEvent>)
where
    G: BackendGateway + ?Sized,
{
    let cursor_column = table.cursor_column();
    let query = SelectQuery::from(table).order(cursor_column, false).limit(1);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cursor = CursorTracker::default();

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }

        let newest = match gateway.select(&query).await {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => {
                tracing::warn!("Change feed for {} failed: {}", table, e);
                continue;
            }
        };

        if let Some(record) = cursor.advance(newest, cursor_column) {
            let event = ChangeEvent {
                table,
                kind: ChangeKind::Insert,
                record: Some(record),
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }
    tracing::debug!("Change feed for {} stopped", table);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::backend_gateway::format_timestamp;
    use crate::application::memory_gateway::MemoryGateway;
    use serde_json::json;
    use std::sync::Arc;

    fn gateway() -> RestGateway {
        RestGateway::new(
            "https://project.supabase.co/".to_string(),
            "anon".to_string(),
            reqwest::Client::new(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_select_url() {
        let ts = "2025-07-28T12:00:00+09:00".parse::<chrono::DateTime<chrono::Utc>>().unwrap();
        let query = SelectQuery::from(Table::AnalyticsCounts)
            .columns("timestamp,label,count")
            .eq("timestamp", format_timestamp(ts))
            .order("timestamp", false)
            .limit(1);

        assert_eq!(
            gateway().build_select_url(&query),
            "https://project.supabase.co/rest/v1/analytics_counts?select=timestamp%2Clabel%2Ccount&timestamp=eq.2025-07-28T03%3A00%3A00Z&order=timestamp.desc&limit=1"
        );
    }

    #[test]
    fn test_select_url_multiple_orders() {
        let query = SelectQuery::from(Table::ParkingSpaces)
            .gte("timestamp", "2025-07-28T00:00:00Z")
            .order("timestamp", true)
            .order("zone_id", true);

        let url = gateway().build_select_url(&query);
        assert!(url.starts_with("https://project.supabase.co/rest/v1/parking_spaces?select=%2A&"));
        assert!(url.contains("timestamp=gte.2025-07-28T00%3A00%3A00Z"));
        assert!(url.ends_with("order=timestamp.asc,zone_id.asc"));
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let body = r#"{"code":"PGRST116","details":"The result contains 0 rows","hint":null,"message":"JSON object requested, multiple (or no) rows returned"}"#;
        assert!(matches!(error_from_body(406, body), BackendError::NotFound));
    }

    #[test]
    fn test_error_body_message() {
        let body = r#"{"code":"42P01","details":null,"hint":null,"message":"relation \"public.zones\" does not exist"}"#;
        match error_from_body(404, body) {
            BackendError::Status { status, code, message } => {
                assert_eq!(status, 404);
                assert_eq!(code.as_deref(), Some("42P01"));
                assert!(message.contains("zones"));
            }
            other => panic!("unexpected {:?}", other),
        }

        match error_from_body(502, "Bad Gateway") {
            BackendError::Status { message, code, .. } => {
                assert_eq!(message, "Bad Gateway");
                assert!(code.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/573"), Some(573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
    }

    #[test]
    fn test_cursor_tracker() {
        let row = |ts: &str| Some(json!({"timestamp": ts, "label": 1}));
        let mut cursor = CursorTracker::default();

        assert_eq!(cursor.advance(row("2025-07-28T12:00:00Z"), "timestamp"), None);
        assert_eq!(cursor.advance(row("2025-07-28T12:00:00Z"), "timestamp"), None);
        assert_eq!(
            cursor.advance(row("2025-07-28T12:01:00Z"), "timestamp"),
            row("2025-07-28T12:01:00Z")
        );
        // An emptied table does not count as a change
        assert_eq!(cursor.advance(None, "timestamp"), None);
        assert_eq!(cursor.advance(row("2025-07-28T12:01:00Z"), "timestamp"), None);
    }

    #[test]
    fn test_cursor_tracker_primed_on_empty_table() {
        let mut cursor = CursorTracker::default();
        assert_eq!(cursor.advance(None, "chunk_timestamp"), None);

        let chunk = json!({"chunk_timestamp": "2025-07-28T12:00:00Z", "parking_data": []});
        assert_eq!(cursor.advance(Some(chunk.clone()), "chunk_timestamp"), Some(chunk));
    }

    const POLL: Duration = Duration::from_secs(5);

    fn counts_row(ts: &str) -> Value {
        json!({"timestamp": ts, "analytic_id": "A1", "label": 1, "count": 3})
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_feed_emits_on_new_rows() {
        let backend = Arc::new(MemoryGateway::new());
        backend.seed(Table::AnalyticsCounts, vec![counts_row("2025-07-28T12:00:00Z")]);
        let (tx, mut rx) = mpsc::channel(16);
        let feed = {
            let backend = backend.clone();
            tokio::spawn(async move { run_change_feed(backend.as_ref(), Table::AnalyticsCounts, POLL, tx).await })
        };

        // The first poll only primes the cursor; later polls see no change
        tokio::time::sleep(POLL * 2 + Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        backend.seed(Table::AnalyticsCounts, vec![counts_row("2025-07-28T12:01:00Z")]);
        let event = tokio::time::timeout(POLL * 2, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.table, Table::AnalyticsCounts);
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record, Some(counts_row("2025-07-28T12:01:00Z")));

        tokio::time::sleep(POLL * 3).await;
        assert!(rx.try_recv().is_err());

        feed.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_feed_survives_failed_polls() {
        let backend = Arc::new(MemoryGateway::new());
        backend.seed(Table::ParkingChunks, vec![json!({"chunk_timestamp": "2025-07-28T12:00:00Z"})]);
        let (tx, mut rx) = mpsc::channel(16);
        let feed = {
            let backend = backend.clone();
            tokio::spawn(async move { run_change_feed(backend.as_ref(), Table::ParkingChunks, POLL, tx).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        backend.fail_selects(Some("JWT expired"));
        backend.seed(Table::ParkingChunks, vec![json!({"chunk_timestamp": "2025-07-28T12:15:00Z"})]);
        tokio::time::sleep(POLL * 3).await;
        assert!(rx.try_recv().is_err());
        assert!(!feed.is_finished());

        backend.fail_selects(None);
        let event = tokio::time::timeout(POLL * 2, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.record.unwrap()["chunk_timestamp"], json!("2025-07-28T12:15:00Z"));

        feed.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_feed_stops_without_receiver() {
        let backend = Arc::new(MemoryGateway::new());
        let (tx, rx) = mpsc::channel(16);
        let feed = {
            let backend = backend.clone();
            tokio::spawn(async move { run_change_feed(backend.as_ref(), Table::TrafficData, POLL, tx).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        drop(rx);
        let polls = backend.select_calls();
        tokio::time::timeout(POLL * 2, feed).await.unwrap().unwrap();
        assert!(backend.select_calls() <= polls + 1);
    }
}
