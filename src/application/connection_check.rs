// Connection check - verifies the backend answers for every known table
use crate::application::backend_gateway::{BackendGateway, SelectQuery, Table};

#[derive(Debug)]
pub struct TableProbe {
    pub table: Table,
    pub outcome: Result<(), String>,
}

#[derive(Debug)]
pub struct ConnectionReport {
    /// Exact row count of `analytics_counts`
    pub counts_total: Result<u64, String>,
    pub probes: Vec<TableProbe>,
}

impl ConnectionReport {
    pub fn is_healthy(&self) -> bool {
        self.counts_total.is_ok() && self.probes.iter().all(|p| p.outcome.is_ok())
    }

    pub fn failed_tables(&self) -> Vec<Table> {
        self.probes
            .iter()
            .filter(|p| p.outcome.is_err())
            .map(|p| p.table)
            .collect()
    }
}

pub async fn check_connection(gateway: &dyn BackendGateway) -> ConnectionReport {
    let counts_total = gateway
        .count(Table::AnalyticsCounts)
        .await
        .map_err(|e| e.to_string());

    let mut probes = Vec::with_capacity(Table::ALL.len());
    for table in Table::ALL {
        let outcome = gateway
            .select(&SelectQuery::from(table).limit(1))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());
        if let Err(e) = &outcome {
            tracing::warn!("Probe of {} failed: {}", table, e);
        }
        probes.push(TableProbe { table, outcome });
    }

    ConnectionReport {
        counts_total,
        probes,
    }
}
