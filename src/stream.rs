//! Row streaming: per-table query construction, value coercion and
//! gzip-compressed CSV output.

use crate::catalog;
use crate::config::{PostgresConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::export::TableExporter;
use crate::schema::TableDescriptor;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::future::BoxFuture;
use futures::pin_mut;
use futures::stream::StreamExt;
use std::fs::File;
use tokio_postgres::Row;
use tokio_postgres::types::{ToSql, Type};
use tracing::{debug, instrument};

/// Placeholder literal emitted in place of large binary column content.
pub const BINARY_PLACEHOLDER: &str = "{img}";

/// Marker emitted for values outside the closed coercion set.
pub const UNKNOWN_MARKER: &str = "<unknown type>";

/// A decoded cell, a closed set matching the output coercion table.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Timestamp, rendered RFC-3339
    Timestamp(DateTime<Utc>),
    /// SQL NULL, rendered as an empty field
    Null,
    /// Floating point, rendered with two decimal places
    Float(f64),
    /// Integer of any width, rendered decimal
    Integer(i64),
    /// Byte sequence, reinterpreted as text
    Bytes(Vec<u8>),
    /// String, passed through
    Text(String),
    /// Anything else
    Other,
}

impl CellValue {
    /// Textual form for the delimited output.
    pub fn render(&self) -> String {
        match self {
            CellValue::Timestamp(t) => t.to_rfc3339(),
            CellValue::Null => String::new(),
            CellValue::Float(f) => format!("{:.2}", f),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            CellValue::Text(s) => s.clone(),
            CellValue::Other => UNKNOWN_MARKER.to_string(),
        }
    }
}

/// Streams one table's filtered rows into `tables/<name>.csv.gz`, opening a
/// dedicated connection per table and releasing it afterwards.
pub struct RowStreamer {
    postgres: PostgresConfig,
    retry: RetryConfig,
    exclusive_bound: bool,
}

impl RowStreamer {
    /// Create a streamer.
    pub fn new(postgres: PostgresConfig, retry: RetryConfig, exclusive_bound: bool) -> Self {
        Self {
            postgres,
            retry,
            exclusive_bound,
        }
    }

    /// Build the projection and filter for one table.
    ///
    /// Binary columns are never read; the projection substitutes a literal
    /// placeholder. Columns outside the natively decoded type set are cast
    /// to text so their values arrive readable instead of failing to decode.
    /// The filter bound is inclusive by default, which re-emits the prior
    /// run's boundary row (fine for idempotent consumers); the
    /// `exclusive_bound` switch tightens it.
    pub fn build_query(&self, table: &TableDescriptor) -> String {
        let projection: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                if c.is_binary() {
                    format!("'{}' AS \"{}\"", BINARY_PLACEHOLDER, c.name)
                } else if c.needs_text_cast() {
                    format!("\"{}\"::text AS \"{}\"", c.name, c.name)
                } else {
                    format!("\"{}\"", c.name)
                }
            })
            .collect();

        let mut query = format!("SELECT {} FROM \"{}\"", projection.join(","), table.name);

        if let (Some(column), Some(bound)) = (&table.delta_column, &table.filter_value) {
            let op = if self.exclusive_bound { ">" } else { ">=" };
            query.push_str(&format!(
                " WHERE \"{}\" {} '{}'",
                column,
                op,
                bound.to_rfc3339()
            ));
        }

        query
    }

    #[instrument(skip(self, table), fields(table = %table.name))]
    async fn export_table(&self, table: TableDescriptor) -> Result<u64> {
        let client = catalog::connect(&self.postgres, &self.retry).await?;
        let query = self.build_query(&table);
        debug!("Executing: {}", query);

        let path = table.output_dir.join(format!("{}.csv.gz", table.name));
        let file = File::create(&path)
            .map_err(|e| Error::export(&table.name, format!("Create {} failed: {}", path.display(), e), 0))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(encoder);

        let params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let stream = client
            .query_raw(query.as_str(), params)
            .await
            .map_err(|e| Error::export(&table.name, format!("Row query failed: {}", e), 0))?;
        pin_mut!(stream);

        let mut rows_written: u64 = 0;
        while let Some(row) = stream.next().await {
            let row = row.map_err(|e| {
                Error::export(&table.name, format!("Cursor failed: {}", e), rows_written)
            })?;

            let record: Vec<String> = (0..row.columns().len())
                .map(|i| decode_cell(&row, i).render())
                .collect();

            writer.write_record(&record).map_err(|e| {
                Error::export(&table.name, format!("Row write failed: {}", e), rows_written)
            })?;
            // Flush per row: a crash leaves a truncated but valid prefix.
            writer.flush().map_err(|e| {
                Error::export(&table.name, format!("Flush failed: {}", e), rows_written)
            })?;

            rows_written += 1;
        }

        let encoder = writer.into_inner().map_err(|e| {
            Error::export(&table.name, format!("Output finish failed: {}", e), rows_written)
        })?;
        encoder.finish().map_err(|e| {
            Error::export(&table.name, format!("Gzip finish failed: {}", e), rows_written)
        })?;

        debug!(rows = rows_written, "Wrote {}", path.display());
        Ok(rows_written)
        // Connection drops here, before the worker takes its next table.
    }
}

impl TableExporter for RowStreamer {
    fn export(&self, table: TableDescriptor) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.export_table(table))
    }
}

/// Decode one cell into the closed [`CellValue`] set by the column's wire
/// type. A value the set does not cover is tried as text and otherwise
/// marked unknown.
fn decode_cell(row: &Row, idx: usize) -> CellValue {
    let ty = row.columns()[idx].type_();

    match *ty {
        Type::TIMESTAMPTZ => match row.try_get::<_, Option<DateTime<Utc>>>(idx) {
            Ok(Some(t)) => CellValue::Timestamp(t),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        Type::TIMESTAMP => match row.try_get::<_, Option<NaiveDateTime>>(idx) {
            Ok(Some(t)) => CellValue::Timestamp(t.and_utc()),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        Type::DATE => match row.try_get::<_, Option<NaiveDate>>(idx) {
            Ok(Some(d)) => CellValue::Timestamp(d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        Type::FLOAT4 => match row.try_get::<_, Option<f32>>(idx) {
            Ok(Some(f)) => CellValue::Float(f as f64),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        Type::FLOAT8 => match row.try_get::<_, Option<f64>>(idx) {
            Ok(Some(f)) => CellValue::Float(f),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        Type::INT2 => match row.try_get::<_, Option<i16>>(idx) {
            Ok(Some(i)) => CellValue::Integer(i as i64),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        Type::INT4 => match row.try_get::<_, Option<i32>>(idx) {
            Ok(Some(i)) => CellValue::Integer(i as i64),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        Type::INT8 => match row.try_get::<_, Option<i64>>(idx) {
            Ok(Some(i)) => CellValue::Integer(i),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        Type::BYTEA => match row.try_get::<_, Option<Vec<u8>>>(idx) {
            Ok(Some(b)) => CellValue::Bytes(b),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(s)) => CellValue::Text(s),
            Ok(None) => CellValue::Null,
            Err(_) => CellValue::Other,
        },
    }
}
