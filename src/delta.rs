//! Delta store: prior-run resolution, manifest I/O and high-water-mark
//! application.
//!
//! The manifest (`delta/delta.csv`) is the only state carried between runs.
//! It is written once per run, before row-level export begins, and read only
//! by a later run.

use crate::error::{Error, Result};
use crate::schema::TableDescriptor;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Manifest header row, bit-exact persisted format.
pub const MANIFEST_HEADER: [&str; 4] =
    ["TABLE_NAME", "COLUMN_NAME", "MAX_TIMESTAMP", "TOTAL_RECORDS"];

/// Run folder date format (one folder per calendar day).
pub const RUN_DATE_FORMAT: &str = "%Y_%m_%d";

/// One manifest row: the high-water mark captured for an incrementally
/// tracked table at the end of a run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRecord {
    /// Table name
    pub table: String,
    /// Delta column the maximum was taken over
    pub column: String,
    /// Maximum observed value of the delta column
    pub max_timestamp: DateTime<Utc>,
    /// Table row count at capture time
    pub row_count: i64,
}

/// Locate the most recent prior run folder under `root`.
///
/// Computed directly from the set of existing folder names parsed as dates:
/// the greatest date strictly before `today` wins. An empty or missing root
/// yields `None` immediately.
pub fn find_previous_run(root: &Path, today: NaiveDate) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;

    let best = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name();
            NaiveDate::parse_from_str(&name.to_string_lossy(), RUN_DATE_FORMAT).ok()
        })
        .filter(|d| *d < today)
        .max()?;

    debug!(run = %best.format(RUN_DATE_FORMAT), "Resolved previous run");
    Some(root.join(best.format(RUN_DATE_FORMAT).to_string()))
}

/// Load the manifest of a prior run, keyed by table name.
///
/// A missing manifest file is treated as "no prior delta". A malformed row is
/// logged and skipped; parsing continues for the remaining rows.
pub fn load_manifest(run_dir: &Path) -> Result<HashMap<String, DeltaRecord>> {
    let path = run_dir.join("delta").join("delta.csv");
    if !path.exists() {
        warn!(path = %path.display(), "Prior run has no delta manifest");
        return Ok(HashMap::new());
    }

    let mut reader = csv::Reader::from_path(&path)?;
    let mut records = HashMap::new();

    for (line, row) in reader.records().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                warn!(line, "Skipping unreadable manifest row: {}", e);
                continue;
            }
        };

        match parse_manifest_row(&row) {
            Ok(record) => {
                records.insert(record.table.clone(), record);
            }
            Err(e) => warn!(line, "Skipping malformed manifest row: {}", e),
        }
    }

    debug!(count = records.len(), "Loaded prior delta manifest");
    Ok(records)
}

fn parse_manifest_row(row: &csv::StringRecord) -> Result<DeltaRecord> {
    if row.len() != MANIFEST_HEADER.len() {
        return Err(Error::manifest(format!(
            "expected {} fields, got {}",
            MANIFEST_HEADER.len(),
            row.len()
        )));
    }

    let max_timestamp = DateTime::parse_from_rfc3339(&row[2])
        .map_err(|e| Error::manifest(format!("bad timestamp '{}': {}", &row[2], e)))?
        .with_timezone(&Utc);

    let row_count: i64 = row[3]
        .parse()
        .map_err(|e| Error::manifest(format!("bad row count '{}': {}", &row[3], e)))?;

    Ok(DeltaRecord {
        table: row[0].to_string(),
        column: row[1].to_string(),
        max_timestamp,
        row_count,
    })
}

/// Append-only manifest writer. Each record is flushed as soon as it is
/// written, so a crash leaves a valid prefix.
pub struct ManifestWriter {
    writer: csv::Writer<File>,
}

impl ManifestWriter {
    /// Create `delta.csv` under `delta_dir` and write the header row.
    pub fn create(delta_dir: &Path) -> Result<Self> {
        let path = delta_dir.join("delta.csv");
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(MANIFEST_HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Append one record and flush.
    pub fn append(&mut self, record: &DeltaRecord) -> Result<()> {
        self.writer.write_record([
            record.table.as_str(),
            record.column.as_str(),
            &record.max_timestamp.to_rfc3339(),
            &record.row_count.to_string(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Populate each descriptor's filter from the prior run's manifest.
///
/// A non-full-reload table with a delta column and a prior record gets the
/// recorded maximum as its lower bound; every other table exports in full.
pub fn apply_prior(tables: &mut [TableDescriptor], prior: &HashMap<String, DeltaRecord>) {
    for table in tables.iter_mut() {
        if table.full_reload || table.delta_column.is_none() {
            table.filter_value = None;
            continue;
        }
        table.filter_value = prior.get(&table.name).map(|r| r.max_timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_root_resolves_to_none() {
        let root = TempDir::new().unwrap();
        assert_eq!(find_previous_run(root.path(), date(2024, 1, 5)), None);
    }

    #[test]
    fn test_missing_root_resolves_to_none() {
        assert_eq!(
            find_previous_run(Path::new("/nonexistent/deltadump"), date(2024, 1, 5)),
            None
        );
    }

    #[test]
    fn test_nearest_prior_date_wins() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("2024_01_01")).unwrap();
        std::fs::create_dir(root.path().join("2024_01_03")).unwrap();

        let resolved = find_previous_run(root.path(), date(2024, 1, 5)).unwrap();
        assert_eq!(resolved, root.path().join("2024_01_03"));
    }

    #[test]
    fn test_todays_run_is_excluded() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("2024_01_01")).unwrap();
        std::fs::create_dir(root.path().join("2024_01_03")).unwrap();

        let resolved = find_previous_run(root.path(), date(2024, 1, 3)).unwrap();
        assert_eq!(resolved, root.path().join("2024_01_01"));
    }

    #[test]
    fn test_non_date_folders_are_ignored() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("scratch")).unwrap();
        assert_eq!(find_previous_run(root.path(), date(2024, 1, 5)), None);
    }

    #[test]
    fn test_manifest_round_trip() {
        let root = TempDir::new().unwrap();
        let delta_dir = root.path().join("delta");
        std::fs::create_dir(&delta_dir).unwrap();

        let record = DeltaRecord {
            table: "orders".into(),
            column: "updated_at".into(),
            max_timestamp: ts(2024, 1, 2),
            row_count: 1234,
        };

        let mut writer = ManifestWriter::create(&delta_dir).unwrap();
        writer.append(&record).unwrap();
        drop(writer);

        let loaded = load_manifest(root.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["orders"], record);
    }

    #[test]
    fn test_malformed_manifest_row_is_skipped() {
        let root = TempDir::new().unwrap();
        let delta_dir = root.path().join("delta");
        std::fs::create_dir(&delta_dir).unwrap();
        std::fs::write(
            delta_dir.join("delta.csv"),
            "TABLE_NAME,COLUMN_NAME,MAX_TIMESTAMP,TOTAL_RECORDS\n\
             bad,updated_at,not-a-timestamp,3\n\
             orders,updated_at,2024-01-02T12:00:00+00:00,5\n",
        )
        .unwrap();

        let loaded = load_manifest(root.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("orders"));
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        let root = TempDir::new().unwrap();
        assert!(load_manifest(root.path()).unwrap().is_empty());
    }

    #[test]
    fn test_apply_prior() {
        let mut full_reload = TableDescriptor::new("dim_date");
        full_reload.full_reload = true;

        let mut tracked = TableDescriptor::new("orders");
        tracked.delta_column = Some("updated_at".into());

        let mut untracked = TableDescriptor::new("log");

        let mut unseen = TableDescriptor::new("customers");
        unseen.delta_column = Some("updated_at".into());

        let mark = ts(2024, 1, 2);
        let mut prior = HashMap::new();
        for name in ["dim_date", "orders", "log"] {
            prior.insert(
                name.to_string(),
                DeltaRecord {
                    table: name.into(),
                    column: "updated_at".into(),
                    max_timestamp: mark,
                    row_count: 10,
                },
            );
        }

        let mut tables = vec![full_reload, tracked, untracked, unseen];
        apply_prior(&mut tables, &prior);

        // Full-reload tables never get a filter, prior record or not.
        assert_eq!(tables[0].filter_value, None);
        assert_eq!(tables[1].filter_value, Some(mark));
        // No delta column means no filter even with a prior record.
        assert_eq!(tables[2].filter_value, None);
        // No prior record means full export.
        assert_eq!(tables[3].filter_value, None);
    }
}
