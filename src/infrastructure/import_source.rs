// Import source - hour-partitioned directories of parquet row files
use crate::application::backend_gateway::format_timestamp;
use crate::application::import_service::ImportError;
use chrono::{DateTime, Utc};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const ROW_FILE_EXTENSION: &str = "parquet";

/// Row files under `<root>/<dataset_dir>/<hour dir>/`, sorted by path.
///
/// Hour directories are named `YYYY-MM-DD-HH`; with `target_date` only those
/// starting with that date are read. A missing dataset directory yields no files.
pub fn discover_files(root: &Path, dataset_dir: &str, target_date: Option<&str>) -> Result<Vec<PathBuf>, ImportError> {
    let dataset_root = root.join(dataset_dir);
    if !dataset_root.is_dir() {
        tracing::warn!("No import directory at {}", dataset_root.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for hour_dir in sorted_entries(&dataset_root)? {
        if !hour_dir.is_dir() {
            continue;
        }
        let matches_date = match (target_date, hour_dir.file_name().and_then(|n| n.to_str())) {
            (Some(date), Some(name)) => name.starts_with(date),
            (None, Some(_)) => true,
            (_, None) => false,
        };
        if !matches_date {
            continue;
        }

        files.extend(
            sorted_entries(&hour_dir)?
                .into_iter()
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ROW_FILE_EXTENSION)),
        );
    }

    Ok(files)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, ImportError> {
    let entries = fs::read_dir(dir).map_err(|e| ImportError::Read {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    Ok(paths)
}

/// Read every record of a parquet file as a JSON object keyed by column name.
pub fn read_rows(path: &Path) -> Result<Vec<Value>, ImportError> {
    let file = File::open(path).map_err(|e| ImportError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let parse_error = |row: usize, e: parquet::errors::ParquetError| ImportError::Parse {
        path: path.to_path_buf(),
        row,
        message: e.to_string(),
    };

    let reader = SerializedFileReader::new(file).map_err(|e| parse_error(0, e))?;
    let rows = reader.get_row_iter(None).map_err(|e| parse_error(0, e))?;

    rows.enumerate()
        .map(|(idx, row)| {
            let row = row.map_err(|e| parse_error(idx + 1, e))?;
            let object: Map<String, Value> = row
                .get_column_iter()
                .map(|(name, field)| (name.clone(), field_to_json(field)))
                .collect();
            Ok(Value::Object(object))
        })
        .collect()
}

/// Timestamps go out in the same form the gateway writes in filters.
fn field_to_json(field: &Field) -> Value {
    let timestamp = match field {
        Field::TimestampMillis(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
        Field::TimestampMicros(us) => DateTime::<Utc>::from_timestamp_micros(*us),
        other => return other.to_json_value(),
    };
    timestamp.map_or(Value::Null, |ts| Value::String(format_timestamp(ts)))
}

#[cfg(test)]
pub mod fixtures {
    use parquet::data_type::{ByteArray, ByteArrayType, Int64Type};
    use parquet::file::properties::WriterProperties;
    use parquet::file::writer::SerializedFileWriter;
    use parquet::schema::parser::parse_message_type;
    use std::fs::File;
    use std::path::Path;
    use std::sync::Arc;

    const COUNTS_SCHEMA: &str = "
        message counts {
            REQUIRED INT64 timestamp (TIMESTAMP_MILLIS);
            REQUIRED BINARY analytic_id (UTF8);
            REQUIRED INT64 label;
            OPTIONAL INT64 count;
        }
    ";

    /// One counts row: (epoch millis, analytic id, label, count).
    pub type CountsRow<'a> = (i64, &'a str, i64, Option<i64>);

    /// Write an `analytics_counts` partition file with a single row group.
    pub fn write_counts_file(path: &Path, rows: &[CountsRow<'_>]) {
        let schema = Arc::new(parse_message_type(COUNTS_SCHEMA).unwrap());
        let props = Arc::new(WriterProperties::builder().build());
        let mut writer = SerializedFileWriter::new(File::create(path).unwrap(), schema, props).unwrap();
        let mut group = writer.next_row_group().unwrap();

        let timestamps: Vec<i64> = rows.iter().map(|r| r.0).collect();
        let mut column = group.next_column().unwrap().unwrap();
        column.typed::<Int64Type>().write_batch(&timestamps, None, None).unwrap();
        column.close().unwrap();

        let ids: Vec<ByteArray> = rows.iter().map(|r| ByteArray::from(r.1)).collect();
        let mut column = group.next_column().unwrap().unwrap();
        column.typed::<ByteArrayType>().write_batch(&ids, None, None).unwrap();
        column.close().unwrap();

        let labels: Vec<i64> = rows.iter().map(|r| r.2).collect();
        let mut column = group.next_column().unwrap().unwrap();
        column.typed::<Int64Type>().write_batch(&labels, None, None).unwrap();
        column.close().unwrap();

        let counts: Vec<i64> = rows.iter().filter_map(|r| r.3).collect();
        let levels: Vec<i16> = rows.iter().map(|r| r.3.map_or(0, |_| 1)).collect();
        let mut column = group.next_column().unwrap().unwrap();
        column.typed::<Int64Type>().write_batch(&counts, Some(&levels), None).unwrap();
        column.close().unwrap();

        group.close().unwrap();
        writer.close().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_counts_file;
    use super::*;
    use serde_json::json;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("traffic-dashboard-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_discover_filters_by_date_and_extension() {
        let root = scratch_dir("discover");
        let counts = root.join("processing/analytics/counts");
        for hour in ["2025-07-28-12", "2025-07-28-13", "2025-07-29-00"] {
            fs::create_dir_all(counts.join(hour)).unwrap();
            fs::write(counts.join(hour).join("00.parquet"), "").unwrap();
        }
        fs::write(counts.join("2025-07-28-12").join("notes.txt"), "").unwrap();

        let files = discover_files(&root, "processing/analytics/counts", Some("2025-07-28")).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("2025-07-28-12/00.parquet"));
        assert!(files[1].ends_with("2025-07-28-13/00.parquet"));

        let all = discover_files(&root, "processing/analytics/counts", None).unwrap();
        assert_eq!(all.len(), 3);

        assert!(discover_files(&root, "processing/missing", None).unwrap().is_empty());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_read_rows_from_parquet() {
        let root = scratch_dir("read");
        let file = root.join("part-0.parquet");
        // 2025-07-28T12:00:00Z
        let ts = 1_753_704_000_000;
        write_counts_file(&file, &[(ts, "A1", 1, Some(5)), (ts + 60_000, "A2", 3, None)]);

        let rows = read_rows(&file).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["timestamp"], json!("2025-07-28T12:00:00Z"));
        assert_eq!(rows[0]["analytic_id"], json!("A1"));
        assert_eq!(rows[0]["label"], json!(1));
        assert_eq!(rows[0]["count"], json!(5));
        assert_eq!(rows[1]["timestamp"], json!("2025-07-28T12:01:00Z"));
        assert_eq!(rows[1]["count"], Value::Null);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_read_rows_rejects_non_parquet() {
        let root = scratch_dir("broken");
        let file = root.join("part-0.parquet");
        fs::write(&file, "not a parquet file").unwrap();

        match read_rows(&file) {
            Err(ImportError::Parse { row, .. }) => assert_eq!(row, 0),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(read_rows(&root.join("missing.parquet")), Err(ImportError::Read { .. })));
        fs::remove_dir_all(&root).unwrap();
    }
}
