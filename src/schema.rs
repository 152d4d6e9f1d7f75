//! Table and column descriptors plus schema-dump rendering for deltadump.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Header row for the per-table metadata dump (`metadata/<table>.csv`).
pub const METADATA_HEADER: [&str; 10] = [
    "Column Name",
    "Data Type",
    "Max Length",
    "Precision",
    "Scale",
    "Nullable",
    "Ordinal Position",
    "Collation Name",
    "Primary Key",
    "Row Count",
];

/// One extractable table, built from the catalog scan and annotated in place
/// by the classifier and the delta-resolution step before being handed to a
/// single export worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name, unique within a run
    pub name: String,
    /// Columns in ordinal position order
    pub columns: Vec<ColumnDescriptor>,
    /// Row count at metadata-collection time; 0 means skip export
    pub row_count: i64,
    /// Type-2 flag: always exported in full, never delta-filtered
    pub full_reload: bool,
    /// Timestamp column used for incremental filtering, if any
    pub delta_column: Option<String>,
    /// Exclusive-or-inclusive lower bound for this run; `None` means full export
    pub filter_value: Option<DateTime<Utc>>,
    /// Destination directory for this table's compressed export
    pub output_dir: PathBuf,
}

impl TableDescriptor {
    /// Create a descriptor with no columns and no annotations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            row_count: 0,
            full_reload: false,
            delta_column: None,
            filter_value: None,
            output_dir: PathBuf::new(),
        }
    }

    /// Whether the table qualifies for dispatch to the worker pool.
    pub fn eligible_for_export(&self) -> bool {
        self.row_count > 0
    }

    /// Whether the table carries an incremental filter for this run.
    pub fn has_filter(&self) -> bool {
        self.delta_column.is_some() && self.filter_value.is_some()
    }

    /// Metadata-dump rows, one per column, with the table row count in the
    /// last field of every row.
    pub fn metadata_rows(&self) -> Vec<Vec<String>> {
        self.columns
            .iter()
            .map(|c| c.metadata_record(self.row_count))
            .collect()
    }

    /// Render a human-readable `CREATE TABLE` statement for the describe dump.
    pub fn describe_ddl(&self) -> String {
        let mut ddl = format!("CREATE TABLE \"{}\" (\n", self.name);

        let col_defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("    \"{}\" {}{}", c.name, c.rendered_type(), c.constraints_ddl()))
            .collect();

        ddl.push_str(&col_defs.join(",\n"));
        ddl.push_str("\n);");
        ddl
    }
}

/// One column of a table, as reported by the catalog. Every attribute except
/// the name may be absent; absence propagates as an empty output field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Declared data type
    pub data_type: Option<String>,
    /// Maximum character length
    pub max_length: Option<i32>,
    /// Numeric precision
    pub precision: Option<i32>,
    /// Numeric scale
    pub scale: Option<i32>,
    /// Nullability
    pub nullable: Option<bool>,
    /// Ordinal position in the source table
    pub ordinal: Option<i32>,
    /// Collation name
    pub collation: Option<String>,
    /// Primary-key membership
    pub primary_key: Option<bool>,
}

impl ColumnDescriptor {
    /// Create a column with only a name and type set.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type.into()),
            max_length: None,
            precision: None,
            scale: None,
            nullable: None,
            ordinal: None,
            collation: None,
            primary_key: None,
        }
    }

    /// Whether the declared type denotes large binary content that the
    /// projection must never read directly.
    pub fn is_binary(&self) -> bool {
        self.data_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("bytea"))
    }

    /// Whether the declared type decodes natively off the wire protocol.
    /// Anything else (numeric, uuid, json, boolean, enums, arrays) is cast
    /// to text in the projection so its value arrives readable.
    pub fn needs_text_cast(&self) -> bool {
        let Some(ref ty) = self.data_type else {
            return true;
        };
        !matches!(
            ty.to_lowercase().as_str(),
            "timestamp with time zone"
                | "timestamp without time zone"
                | "timestamp"
                | "timestamptz"
                | "date"
                | "real"
                | "double precision"
                | "float4"
                | "float8"
                | "smallint"
                | "integer"
                | "bigint"
                | "int2"
                | "int4"
                | "int8"
                | "text"
                | "character varying"
                | "varchar"
                | "character"
                | "char"
                | "bpchar"
                | "bytea"
        )
    }

    /// One metadata-dump record for this column.
    pub fn metadata_record(&self, row_count: i64) -> Vec<String> {
        vec![
            self.name.clone(),
            self.data_type.clone().unwrap_or_default(),
            self.max_length.map(|v| v.to_string()).unwrap_or_default(),
            self.precision.map(|v| v.to_string()).unwrap_or_default(),
            self.scale.map(|v| v.to_string()).unwrap_or_default(),
            self.nullable.map(|v| v.to_string()).unwrap_or_default(),
            self.ordinal.map(|v| v.to_string()).unwrap_or_default(),
            self.collation.clone().unwrap_or_default(),
            self.primary_key.map(|v| v.to_string()).unwrap_or_default(),
            row_count.to_string(),
        ]
    }

    /// Declared type with length or precision/scale arguments where the type
    /// family carries them.
    fn rendered_type(&self) -> String {
        let Some(ref ty) = self.data_type else {
            return String::new();
        };
        let normalized = ty.to_lowercase();

        match normalized.as_str() {
            "character varying" | "varchar" | "character" | "char" | "bpchar" | "bit"
            | "bit varying" => match self.max_length {
                Some(len) => format!("{}({})", ty, len),
                None => ty.clone(),
            },
            "numeric" | "decimal" => match (self.precision, self.scale) {
                (Some(p), Some(s)) => format!("{}({}, {})", ty, p, s),
                (Some(p), None) => format!("{}({})", ty, p),
                _ => ty.clone(),
            },
            _ => ty.clone(),
        }
    }

    /// Generate constraint DDL.
    fn constraints_ddl(&self) -> String {
        let mut out = String::new();

        match self.nullable {
            Some(false) => out.push_str(" NOT NULL"),
            _ => out.push_str(" NULL"),
        }

        if self.primary_key == Some(true) {
            out.push_str(" PRIMARY KEY");
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableDescriptor {
        let mut table = TableDescriptor::new("orders");
        table.row_count = 7;
        table.columns = vec![
            ColumnDescriptor {
                max_length: None,
                precision: None,
                scale: None,
                nullable: Some(false),
                ordinal: Some(1),
                collation: None,
                primary_key: Some(true),
                ..ColumnDescriptor::new("id", "bigint")
            },
            ColumnDescriptor {
                max_length: Some(255),
                nullable: Some(true),
                ordinal: Some(2),
                ..ColumnDescriptor::new("label", "character varying")
            },
            ColumnDescriptor {
                precision: Some(10),
                scale: Some(2),
                ordinal: Some(3),
                ..ColumnDescriptor::new("amount", "numeric")
            },
        ];
        table
    }

    #[test]
    fn test_describe_ddl() {
        let ddl = sample_table().describe_ddl();
        assert!(ddl.starts_with("CREATE TABLE \"orders\" (\n"));
        assert!(ddl.contains("\"id\" bigint NOT NULL PRIMARY KEY"));
        assert!(ddl.contains("\"label\" character varying(255) NULL"));
        assert!(ddl.contains("\"amount\" numeric(10, 2) NULL"));
        assert!(ddl.ends_with("\n);"));
    }

    #[test]
    fn test_metadata_rows_carry_row_count() {
        let rows = sample_table().metadata_rows();
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.len(), METADATA_HEADER.len());
            assert_eq!(row.last().unwrap(), "7");
        }
        // Absent attributes become empty fields, never errors.
        assert_eq!(rows[2][5], "");
    }

    #[test]
    fn test_is_binary() {
        assert!(ColumnDescriptor::new("img", "bytea").is_binary());
        assert!(ColumnDescriptor::new("img", "BYTEA").is_binary());
        assert!(!ColumnDescriptor::new("name", "text").is_binary());
        let mut unknown = ColumnDescriptor::new("x", "text");
        unknown.data_type = None;
        assert!(!unknown.is_binary());
    }

    #[test]
    fn test_needs_text_cast() {
        assert!(ColumnDescriptor::new("amount", "numeric").needs_text_cast());
        assert!(ColumnDescriptor::new("ref", "uuid").needs_text_cast());
        assert!(ColumnDescriptor::new("flag", "boolean").needs_text_cast());
        assert!(!ColumnDescriptor::new("id", "bigint").needs_text_cast());
        assert!(!ColumnDescriptor::new("name", "text").needs_text_cast());
        assert!(!ColumnDescriptor::new("at", "timestamp with time zone").needs_text_cast());
        let mut unknown = ColumnDescriptor::new("x", "text");
        unknown.data_type = None;
        assert!(unknown.needs_text_cast());
    }

    #[test]
    fn test_eligibility() {
        let mut table = TableDescriptor::new("empty");
        assert!(!table.eligible_for_export());
        table.row_count = 1;
        assert!(table.eligible_for_export());
    }
}
