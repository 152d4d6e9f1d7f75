//! Export scheduling: a bounded worker pool fed by a single-slot handoff
//! channel.
//!
//! The producer blocks whenever all workers are busy (backpressure is the
//! channel capacity), closes the channel after the last eligible table, and
//! joins every worker before the run is considered complete. A worker that
//! hits a fatal table error halts; the shared queue lets the surviving
//! workers drain what it would have received.

use crate::error::{Error, Result};
use crate::schema::TableDescriptor;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Port for exporting one table's rows to its output file. Each descriptor
/// is consumed by exactly one worker.
pub trait TableExporter: Send + Sync + 'static {
    /// Export the table, returning the number of rows written.
    fn export(&self, table: TableDescriptor) -> BoxFuture<'_, Result<u64>>;
}

/// Outcome of one table's export attempt.
#[derive(Debug)]
pub struct TableOutcome {
    /// Table name
    pub table: String,
    /// Rows written, or the fatal error
    pub result: Result<u64>,
}

/// Aggregate export report: one outcome per dispatched table.
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Per-table outcomes, in completion order
    pub outcomes: Vec<TableOutcome>,
}

impl ExportReport {
    /// Whether every dispatched table exported successfully.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Total rows written across all tables.
    pub fn total_rows(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum()
    }

    /// Names of tables whose export failed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.table.as_str())
            .collect()
    }
}

/// Bounded worker pool dispatching tables to a [`TableExporter`].
pub struct ExportScheduler<E> {
    exporter: Arc<E>,
    workers: usize,
    dispatch_pause: Duration,
}

impl<E: TableExporter> ExportScheduler<E> {
    /// Create a scheduler with a fixed pool size and per-dispatch pause.
    pub fn new(exporter: Arc<E>, workers: usize, dispatch_pause: Duration) -> Self {
        Self {
            exporter,
            workers: workers.max(1),
            dispatch_pause,
        }
    }

    /// Dispatch every eligible table and wait for all workers to terminate.
    pub async fn run(&self, tables: Vec<TableDescriptor>) -> ExportReport {
        let (tx, rx) = mpsc::channel::<TableDescriptor>(1);
        let rx = Arc::new(Mutex::new(rx));

        let mut pool: JoinSet<Vec<TableOutcome>> = JoinSet::new();
        for id in 1..=self.workers {
            pool.spawn(worker(
                id,
                Arc::clone(&self.exporter),
                Arc::clone(&rx),
                self.dispatch_pause,
            ));
        }

        // The workers hold the only receiver clones from here on; once they
        // all terminate the channel closes and sends start failing.
        drop(rx);

        let mut report = ExportReport::default();
        let mut dispatched: Vec<String> = Vec::new();

        for table in tables {
            if !table.eligible_for_export() {
                debug!(table = %table.name, "Skipping table with no rows");
                continue;
            }
            let name = table.name.clone();
            if let Err(mpsc::error::SendError(table)) = tx.send(table).await {
                // Every worker has died; account for the table instead of
                // dropping it silently.
                error!(table = %table.name, "No live workers, table not exported");
                report.outcomes.push(TableOutcome {
                    result: Err(Error::export(&table.name, "no live export workers", 0)),
                    table: table.name,
                });
            } else {
                dispatched.push(name);
            }
        }
        drop(tx);

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(outcomes) => report.outcomes.extend(outcomes),
                Err(e) => error!("Export worker panicked: {}", e),
            }
        }

        // A table handed to the channel can still go unprocessed if its
        // worker died before taking it; reconcile so nothing is silent.
        for name in dispatched {
            if !report.outcomes.iter().any(|o| o.table == name) {
                warn!(table = %name, "Table was queued but never processed");
                report.outcomes.push(TableOutcome {
                    result: Err(Error::export(
                        &name,
                        "worker pool terminated before processing",
                        0,
                    )),
                    table: name,
                });
            }
        }

        if report.all_succeeded() {
            info!(
                tables = report.outcomes.len(),
                rows = report.total_rows(),
                "Export stage complete"
            );
        } else {
            warn!(
                failed = report.failed_tables().len(),
                "Export stage completed with failures"
            );
        }

        report
    }
}

/// One worker: take a table from the shared queue, export it, repeat. A
/// fatal error halts this worker after recording the failure.
async fn worker<E: TableExporter>(
    id: usize,
    exporter: Arc<E>,
    rx: Arc<Mutex<mpsc::Receiver<TableDescriptor>>>,
    pause: Duration,
) -> Vec<TableOutcome> {
    let mut outcomes = Vec::new();

    loop {
        let next = { rx.lock().await.recv().await };
        let Some(table) = next else { break };

        // Throttle connection establishment against the source.
        tokio::time::sleep(pause).await;

        let name = table.name.clone();
        info!(worker = id, table = %name, "Processing table");

        match exporter.export(table).await {
            Ok(rows) => {
                debug!(worker = id, table = %name, rows, "Table exported");
                outcomes.push(TableOutcome {
                    table: name,
                    result: Ok(rows),
                });
            }
            Err(e) => {
                error!(worker = id, table = %name, code = e.code(), "Export failed: {}", e);
                outcomes.push(TableOutcome {
                    table: name,
                    result: Err(e),
                });
                break;
            }
        }
    }

    debug!(worker = id, "Worker ending");
    outcomes
}
