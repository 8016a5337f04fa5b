// Import service - bulk loads analytics rows into the backend in batches
use crate::application::backend_gateway::{BackendGateway, Table};
use crate::infrastructure::config::ImportSettings;
use crate::infrastructure::import_source::{discover_files, read_rows};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },
    /// `row` is 1-based; 0 means the file itself could not be opened as parquet
    #[error("{} (row {row}): {message}", path.display())]
    Parse {
        path: PathBuf,
        row: usize,
        message: String,
    },
}

/// A family of row files and the table it lands in.
#[derive(Debug, Clone, Copy)]
pub struct Dataset {
    pub name: &'static str,
    pub dir: &'static str,
    pub table: Table,
    /// Split inserts into `counts_batch_size` rows; otherwise one request per file
    pub batched: bool,
    /// Source column renames
    pub renames: &'static [(&'static str, &'static str)],
    /// Columns stored as integers in the backend
    pub integer_columns: &'static [&'static str],
    /// Array columns that default to `[]` when absent or null
    pub array_columns: &'static [&'static str],
}

pub const DATASETS: [Dataset; 4] = [
    Dataset {
        name: "counts",
        dir: "processing/analytics/counts",
        table: Table::AnalyticsCounts,
        batched: true,
        renames: &[],
        integer_columns: &["label", "count"],
        array_columns: &[],
    },
    Dataset {
        name: "speeds",
        dir: "processing/analytics/speeds",
        table: Table::AnalyticsSpeeds,
        batched: false,
        renames: &[("max", "max_speed"), ("mean", "mean_speed"), ("v85", "v85_speed")],
        integer_columns: &["label"],
        array_columns: &[],
    },
    Dataset {
        name: "parking_spaces",
        dir: "processing/parking/parking_spaces",
        table: Table::ParkingSpaces,
        batched: false,
        renames: &[],
        integer_columns: &[
            "parked_label",
            "occupied_state_duration",
            "last_24h_cumulative_occupied_duration",
            "last_24h_max_occupied_duration",
        ],
        array_columns: &[],
    },
    Dataset {
        name: "parking_groups",
        dir: "processing/parking/parkings",
        table: Table::ParkingGroups,
        batched: false,
        renames: &[],
        integer_columns: &[
            "occupied_zones",
            "available_zones",
            "last_24h_cumulative_occupied_duration",
            "last_24h_max_occupied_duration",
        ],
        array_columns: &["occupied_zone_ids", "available_zone_ids"],
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub files: usize,
    pub rows_total: usize,
    pub rows_imported: usize,
    pub failed_batches: usize,
}

impl ImportReport {
    fn merge(&mut self, other: &ImportReport) {
        self.files += other.files;
        self.rows_total += other.rows_total;
        self.rows_imported += other.rows_imported;
        self.failed_batches += other.failed_batches;
    }
}

/// Integer-valued strings and whole floats become JSON integers.
fn to_integer(value: Value) -> Value {
    let converted = match &value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64),
        _ => None,
    };
    converted.map(Value::from).unwrap_or(value)
}

/// Apply the dataset's renames and type conversions to one row.
pub fn normalize_row(dataset: &Dataset, row: Value) -> Value {
    let Value::Object(source) = row else {
        return row;
    };

    let mut out = Map::with_capacity(source.len());
    for (key, value) in source {
        let key = dataset
            .renames
            .iter()
            .find(|(from, _)| *from == key)
            .map(|(_, to)| to.to_string())
            .unwrap_or(key);
        let value = if dataset.integer_columns.contains(&key.as_str()) {
            to_integer(value)
        } else {
            value
        };
        out.insert(key, value);
    }

    for column in dataset.array_columns {
        let entry = out.entry(column.to_string()).or_insert(Value::Null);
        if entry.is_null() {
            *entry = Value::Array(Vec::new());
        }
    }

    Value::Object(out)
}

pub struct ImportService {
    gateway: Arc<dyn BackendGateway>,
    settings: ImportSettings,
}

impl ImportService {
    pub fn new(gateway: Arc<dyn BackendGateway>, settings: ImportSettings) -> Self {
        Self { gateway, settings }
    }

    /// Import every dataset found under the configured root.
    pub async fn import_all(&self) -> Result<ImportReport, ImportError> {
        let mut total = ImportReport::default();
        for dataset in &DATASETS {
            let report = self.import_dataset(dataset).await?;
            tracing::info!(
                "{}: imported {}/{} rows from {} files ({} failed batches)",
                dataset.name,
                report.rows_imported,
                report.rows_total,
                report.files,
                report.failed_batches
            );
            total.merge(&report);
        }
        Ok(total)
    }

    pub async fn import_dataset(&self, dataset: &Dataset) -> Result<ImportReport, ImportError> {
        let files = discover_files(&self.settings.root, dataset.dir, self.settings.target_date.as_deref())?;
        let mut report = ImportReport::default();

        for path in files {
            tracing::debug!("Reading {}", path.display());
            let rows: Vec<Value> = read_rows(&path)?
                .into_iter()
                .map(|row| normalize_row(dataset, row))
                .collect();

            let file_report = self.insert_rows(dataset, &rows).await;
            report.files += 1;
            report.merge(&file_report);
        }

        Ok(report)
    }

    /// Insert `rows` batch by batch. A failed batch is logged and skipped.
    pub async fn insert_rows(&self, dataset: &Dataset, rows: &[Value]) -> ImportReport {
        let mut report = ImportReport {
            rows_total: rows.len(),
            ..ImportReport::default()
        };
        if rows.is_empty() {
            return report;
        }

        let batch_size = if dataset.batched {
            self.settings.counts_batch_size.max(1)
        } else {
            rows.len()
        };

        for (idx, batch) in rows.chunks(batch_size).enumerate() {
            match self.gateway.insert(dataset.table, batch).await {
                Ok(()) => report.rows_imported += batch.len(),
                Err(e) => {
                    report.failed_batches += 1;
                    tracing::error!("{} batch {} ({} rows) failed: {}", dataset.table, idx, batch.len(), e);
                }
            }
        }

        report
    }
}
