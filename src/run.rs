//! Run orchestration: directory layout, catalog collection, schema dumps,
//! delta bookkeeping and the export stage.

use crate::catalog::CatalogClient;
use crate::classify::classify;
use crate::config::{ExportConfig, SelectionMode};
use crate::delta::{self, DeltaRecord, ManifestWriter, RUN_DATE_FORMAT};
use crate::error::{Error, Result};
use crate::export::ExportScheduler;
use crate::metrics::{Metrics, Timer};
use crate::schema::{METADATA_HEADER, TableDescriptor};
use crate::stream::RowStreamer;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Filesystem layout of one run: a calendar-date folder with one subfolder
/// per artifact kind. A same-day rerun reuses the folder and overwrites its
/// artifacts.
#[derive(Debug, Clone)]
pub struct RunLayout {
    /// The dated run folder
    pub run_dir: PathBuf,
    /// Per-table schema dumps (`metadata/<table>.csv`)
    pub metadata_dir: PathBuf,
    /// Per-table `CREATE TABLE` dumps (`describe/<table>.sql`)
    pub describe_dir: PathBuf,
    /// Per-table compressed row data (`tables/<table>.csv.gz`)
    pub tables_dir: PathBuf,
    /// Delta manifest (`delta/delta.csv`)
    pub delta_dir: PathBuf,
}

impl RunLayout {
    /// Layout for `date` under `root`.
    pub fn new(root: &Path, date: NaiveDate) -> Self {
        let run_dir = root.join(date.format(RUN_DATE_FORMAT).to_string());
        Self {
            metadata_dir: run_dir.join("metadata"),
            describe_dir: run_dir.join("describe"),
            tables_dir: run_dir.join("tables"),
            delta_dir: run_dir.join("delta"),
            run_dir,
        }
    }

    /// Create every folder, reusing what already exists.
    pub fn create(&self) -> Result<()> {
        for dir in [
            &self.metadata_dir,
            &self.describe_dir,
            &self.tables_dir,
            &self.delta_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Result of one extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether every exported table succeeded
    pub success: bool,
    /// The dated run folder
    pub run_dir: PathBuf,
    /// Per-table results
    pub tables: HashMap<String, TableRunResult>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Timestamp when the run completed
    pub completed_at: String,
}

impl RunResult {
    /// Total rows written across all tables.
    pub fn total_rows(&self) -> u64 {
        self.tables.values().map(|t| t.rows_written).sum()
    }

    /// Check if all tables exported successfully.
    pub fn all_tables_success(&self) -> bool {
        self.tables.values().all(|t| t.success)
    }
}

/// Per-table run result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRunResult {
    /// Table name
    pub table: String,
    /// Whether the export succeeded
    pub success: bool,
    /// Rows written
    pub rows_written: u64,
    /// Error message if failed
    pub error: Option<String>,
}

/// Classification and row count of one table, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    /// Table name
    pub table: String,
    /// Snapshot row count
    pub row_count: i64,
    /// Type-2 flag
    pub full_reload: bool,
    /// Resolved delta column, if any
    pub delta_column: Option<String>,
}

/// Main run driver.
pub struct Runner {
    config: ExportConfig,
    catalog: CatalogClient,
    metrics: Arc<Metrics>,
}

impl Runner {
    /// Connect the catalog client and build a runner.
    #[instrument(skip(config))]
    pub async fn new(config: ExportConfig) -> Result<Self> {
        info!("Initializing runner...");
        let catalog = CatalogClient::connect(
            &config.postgres,
            &config.retry,
            config.extract.database.clone(),
        )
        .await?;

        Ok(Self {
            config,
            catalog,
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Metrics for this runner.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Test connectivity to the source.
    pub async fn test_connectivity(&self) -> Result<()> {
        info!("Testing connectivity...");
        self.catalog.ping().await?;
        info!("PostgreSQL: OK");
        Ok(())
    }

    /// Enumerate, describe, count and classify every configured table.
    /// Catalog failures abort the run.
    async fn collect_tables(&self, tables_dir: &Path) -> Result<Vec<TableDescriptor>> {
        let names = match self.config.extract.mode {
            SelectionMode::Whitelist => {
                info!("Using the table whitelist");
                self.config.extract.whitelist.clone()
            }
            SelectionMode::Blacklist => {
                info!("Enumerating the source catalog");
                self.metrics.record_catalog_query();
                self.catalog
                    .list_tables(&self.config.extract.blacklist)
                    .await?
            }
        };

        info!("Collecting metadata and row counts for {} tables", names.len());
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let mut descriptor = self.catalog.describe_table(&name).await?;
            self.metrics.record_catalog_query();
            descriptor.row_count = self.catalog.count_rows(&name).await?;
            self.metrics.record_catalog_query();
            descriptor.output_dir = tables_dir.to_path_buf();
            tables.push(descriptor);
        }

        classify(
            &mut tables,
            &self.config.extract.type2_tables,
            &self.config.extract.delta_columns,
        );

        Ok(tables)
    }

    /// Report classification and row counts without exporting anything.
    pub async fn status(&self) -> Result<Vec<TableStatus>> {
        let tables = self.collect_tables(Path::new("")).await?;
        Ok(tables
            .into_iter()
            .map(|t| TableStatus {
                table: t.name,
                row_count: t.row_count,
                full_reload: t.full_reload,
                delta_column: t.delta_column,
            })
            .collect())
    }

    /// Execute a full extraction run for `today`.
    #[instrument(skip(self))]
    pub async fn execute(&self, today: NaiveDate) -> Result<RunResult> {
        let timer = Timer::start("extraction run");

        let layout = RunLayout::new(&self.config.output.root, today);
        layout.create()?;
        info!(run_dir = %layout.run_dir.display(), "Run folder ready");

        // Prior high-water marks are read before anything is scheduled.
        let prior = match delta::find_previous_run(&self.config.output.root, today) {
            Some(prev) => delta::load_manifest(&prev)?,
            None => {
                info!("No prior run found, all tables export in full");
                HashMap::new()
            }
        };

        let mut tables = self.collect_tables(&layout.tables_dir).await?;

        info!("Writing schema dumps");
        for table in &tables {
            write_metadata_csv(table, &layout.metadata_dir)?;
            write_describe_sql(table, &layout.describe_dir)?;
        }

        delta::apply_prior(&mut tables, &prior);

        // The new marks are captured via summary queries and persisted
        // before row-level extraction begins.
        self.write_manifest(&tables, &layout.delta_dir).await?;

        for table in tables.iter().filter(|t| !t.eligible_for_export()) {
            self.metrics.record_skip();
            info!(table = %table.name, "Skipping empty table");
        }

        info!("Starting the data download");
        let streamer = RowStreamer::new(
            self.config.postgres.clone(),
            self.config.retry.clone(),
            self.config.extract.exclusive_bound,
        );
        let scheduler = ExportScheduler::new(
            Arc::new(streamer),
            self.config.scheduler.workers,
            self.config.scheduler.dispatch_pause(),
        );
        let report = scheduler.run(tables).await;

        let mut table_results = HashMap::new();
        for outcome in &report.outcomes {
            let (success, rows, error) = match &outcome.result {
                Ok(rows) => (true, *rows, None),
                Err(e) => (false, 0, Some(e.to_string())),
            };
            self.metrics.record_table(success, rows);
            table_results.insert(
                outcome.table.clone(),
                TableRunResult {
                    table: outcome.table.clone(),
                    success,
                    rows_written: rows,
                    error,
                },
            );
        }

        let duration_ms = timer.stop();
        let result = RunResult {
            success: report.all_succeeded(),
            run_dir: layout.run_dir,
            tables: table_results,
            duration_ms,
            completed_at: chrono::Utc::now().to_rfc3339(),
        };

        if result.success {
            info!(
                duration_ms,
                rows = result.total_rows(),
                tables = result.tables.len(),
                "Run completed successfully"
            );
        } else {
            warn!(
                duration_ms,
                failed = result.tables.values().filter(|t| !t.success).count(),
                "Run completed with errors"
            );
        }

        Ok(result)
    }

    /// Write this run's delta manifest: one record per incrementally tracked
    /// table with rows and a non-NULL maximum.
    async fn write_manifest(&self, tables: &[TableDescriptor], delta_dir: &Path) -> Result<()> {
        info!("Writing out the deltas");
        let mut writer = ManifestWriter::create(delta_dir)?;

        for table in tables {
            let Some(ref column) = table.delta_column else {
                continue;
            };
            if table.row_count == 0 {
                continue;
            }

            self.metrics.record_summary_query();
            match self.catalog.max_timestamp(&table.name, column).await? {
                Some(max) => writer.append(&DeltaRecord {
                    table: table.name.clone(),
                    column: column.clone(),
                    max_timestamp: max,
                    row_count: table.row_count,
                })?,
                None => {
                    // Nothing to delta against; the table is omitted.
                    warn!(table = %table.name, "NULL maximum, omitted from manifest");
                }
            }
        }

        Ok(())
    }
}

/// Write `metadata/<table>.csv`: one row per column, header included, with
/// the table row count supplied in the final field.
pub fn write_metadata_csv(table: &TableDescriptor, metadata_dir: &Path) -> Result<()> {
    let path = metadata_dir.join(format!("{}.csv", table.name));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(METADATA_HEADER)?;
    for row in table.metadata_rows() {
        writer.write_record(&row)?;
        writer.flush()?;
    }
    writer.flush().map_err(Error::from)
}

/// Write `describe/<table>.sql`: a human-readable `CREATE TABLE` statement.
pub fn write_describe_sql(table: &TableDescriptor, describe_dir: &Path) -> Result<()> {
    let path = describe_dir.join(format!("{}.sql", table.name));
    std::fs::write(path, table.describe_ddl()).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDescriptor;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_table() -> TableDescriptor {
        let mut table = TableDescriptor::new("orders");
        table.row_count = 5;
        table.columns = vec![
            ColumnDescriptor::new("id", "bigint"),
            ColumnDescriptor::new("updated_at", "timestamp with time zone"),
        ];
        table
    }

    #[test]
    fn test_layout_paths() {
        let layout = RunLayout::new(Path::new("results"), date(2024, 1, 5));
        assert_eq!(layout.run_dir, Path::new("results/2024_01_05"));
        assert_eq!(layout.tables_dir, Path::new("results/2024_01_05/tables"));
        assert_eq!(layout.delta_dir, Path::new("results/2024_01_05/delta"));
    }

    #[test]
    fn test_layout_create_is_idempotent() {
        let root = TempDir::new().unwrap();
        let layout = RunLayout::new(root.path(), date(2024, 1, 5));
        layout.create().unwrap();
        // A same-day rerun reuses the folder.
        layout.create().unwrap();
        assert!(layout.metadata_dir.is_dir());
        assert!(layout.describe_dir.is_dir());
        assert!(layout.tables_dir.is_dir());
        assert!(layout.delta_dir.is_dir());
    }

    #[test]
    fn test_write_metadata_csv() {
        let root = TempDir::new().unwrap();
        write_metadata_csv(&sample_table(), root.path()).unwrap();

        let content = std::fs::read_to_string(root.path().join("orders.csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Column Name,Data Type,Max Length,Precision,Scale,Nullable,Ordinal Position,Collation Name,Primary Key,Row Count"
        );
        assert_eq!(content.lines().count(), 3);
        assert!(content.lines().skip(1).all(|l| l.ends_with(",5")));
    }

    #[test]
    fn test_write_describe_sql() {
        let root = TempDir::new().unwrap();
        write_describe_sql(&sample_table(), root.path()).unwrap();

        let content = std::fs::read_to_string(root.path().join("orders.sql")).unwrap();
        assert!(content.starts_with("CREATE TABLE \"orders\""));
    }

    #[test]
    fn test_run_result_totals() {
        let mut tables = HashMap::new();
        tables.insert(
            "a".to_string(),
            TableRunResult {
                table: "a".into(),
                success: true,
                rows_written: 100,
                error: None,
            },
        );
        tables.insert(
            "b".to_string(),
            TableRunResult {
                table: "b".into(),
                success: false,
                rows_written: 0,
                error: Some("boom".into()),
            },
        );

        let result = RunResult {
            success: false,
            run_dir: PathBuf::from("results/2024_01_05"),
            tables,
            duration_ms: 10,
            completed_at: "2024-01-05T00:00:00Z".into(),
        };

        assert_eq!(result.total_rows(), 100);
        assert!(!result.all_tables_success());
    }
}
