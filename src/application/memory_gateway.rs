// In-memory backend used by the application tests
use crate::application::backend_gateway::{
    BackendError, BackendGateway, ChangeEvent, ChangeKind, FilterOp, SelectQuery, Subscription, Table,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct MemoryGateway {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    subscribers: Mutex<Vec<(Table, mpsc::Sender<ChangeEvent>)>>,
    select_error: Mutex<Option<String>>,
    select_delay: Mutex<Option<Duration>>,
    rejected_batches: Mutex<HashSet<usize>>,
    selects: AtomicUsize,
    inserts: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: Table, rows: Vec<Value>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .extend(rows);
    }

    /// Store a row and notify subscribers as an insert.
    pub fn push(&self, table: Table, row: Value) {
        self.seed(table, vec![row.clone()]);
        self.notify(table, ChangeKind::Insert, Some(row));
    }

    pub fn notify(&self, table: Table, kind: ChangeKind, record: Option<Value>) {
        let subscribers = self.subscribers.lock().unwrap();
        for (subscribed, tx) in subscribers.iter() {
            if *subscribed == table {
                let _ = tx.try_send(ChangeEvent {
                    table,
                    kind,
                    record: record.clone(),
                });
            }
        }
    }

    pub fn fail_selects(&self, message: Option<&str>) {
        *self.select_error.lock().unwrap() = message.map(str::to_string);
    }

    pub fn delay_selects(&self, delay: Option<Duration>) {
        *self.select_delay.lock().unwrap() = delay;
    }

    /// Make the n-th insert call (0-based) fail.
    pub fn reject_batch(&self, call: usize) {
        self.rejected_batches.lock().unwrap().insert(call);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn select_calls(&self) -> usize {
        self.selects.load(AtomicOrdering::SeqCst)
    }

    pub fn live_subscriptions(&self, table: Table) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, tx)| *t == table && !tx.is_closed())
            .count()
    }

    fn run_select(&self, query: &SelectQuery) -> Vec<Value> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        query.filters.iter().all(|f| {
                            let ord = row.get(&f.column).and_then(|v| compare_to_literal(v, &f.value));
                            match f.op {
                                FilterOp::Eq => ord == Some(Ordering::Equal),
                                FilterOp::Gte => matches!(ord, Some(Ordering::Equal | Ordering::Greater)),
                            }
                        })
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            for order in &query.order {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                let ord = if order.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        if query.columns.trim() != "*" {
            let wanted: Vec<&str> = query.columns.split(',').map(str::trim).collect();
            rows = rows
                .into_iter()
                .map(|row| {
                    let projected: Map<String, Value> = wanted
                        .iter()
                        .filter_map(|c| row.get(*c).map(|v| (c.to_string(), v.clone())))
                        .collect();
                    Value::Object(projected)
                })
                .collect();
        }

        rows
    }
}

fn as_timestamp(value: &str) -> Option<DateTime<Utc>> {
    value.parse::<DateTime<Utc>>().ok()
}

fn compare_to_literal(value: &Value, literal: &str) -> Option<Ordering> {
    match value {
        Value::String(s) => match (as_timestamp(s), as_timestamp(literal)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => Some(s.as_str().cmp(literal)),
        },
        Value::Number(n) => n.as_f64()?.partial_cmp(&literal.parse::<f64>().ok()?),
        Value::Bool(b) => Some(b.to_string().as_str().cmp(literal)),
        _ => None,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => match (as_timestamp(a), as_timestamp(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a.cmp(b),
        },
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl BackendGateway for MemoryGateway {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, BackendError> {
        self.selects.fetch_add(1, AtomicOrdering::SeqCst);

        let delay = *self.select_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let error = self.select_error.lock().unwrap().clone();
        if let Some(message) = error {
            return Err(BackendError::Status {
                status: 401,
                code: None,
                message,
            });
        }

        Ok(self.run_select(query))
    }

    async fn insert(&self, table: Table, rows: &[Value]) -> Result<(), BackendError> {
        let call = self.inserts.fetch_add(1, AtomicOrdering::SeqCst);
        if self.rejected_batches.lock().unwrap().contains(&call) {
            return Err(BackendError::Status {
                status: 400,
                code: Some("22P02".to_string()),
                message: format!("batch {} rejected", call),
            });
        }
        self.seed(table, rows.to_vec());
        Ok(())
    }

    async fn count(&self, table: Table) -> Result<u64, BackendError> {
        Ok(self.rows(table).len() as u64)
    }

    fn subscribe(&self, table: Table, kind: ChangeKind) -> Subscription {
        let (tx, rx) = mpsc::channel(16);
        self.subscribers.lock().unwrap().push((table, tx));
        Subscription::new(table, kind, rx, None)
    }
}
