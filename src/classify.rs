//! Table classification: type-2 full-reload vs. timestamp-incremental.

use crate::schema::TableDescriptor;
use tracing::debug;

/// Annotate every descriptor against the configured name sets.
///
/// A table whose name appears (case-insensitively) in `type2_tables` is
/// marked full-reload; the check takes precedence over delta-column
/// detection. Any other table is scanned column-by-column in ordinal order
/// against `delta_columns`; when several columns match, the last match wins.
/// A table with neither flag exports in full every run.
pub fn classify(tables: &mut [TableDescriptor], type2_tables: &[String], delta_columns: &[String]) {
    for table in tables.iter_mut() {
        if matches_any(&table.name, type2_tables) {
            table.full_reload = true;
            debug!(table = %table.name, "Classified as type-2 (full reload)");
            continue;
        }

        for column in &table.columns {
            if matches_any(&column.name, delta_columns) {
                table.delta_column = Some(column.name.clone());
            }
        }

        if let Some(ref col) = table.delta_column {
            debug!(table = %table.name, column = %col, "Classified as incremental");
        }
    }
}

fn matches_any(name: &str, set: &[String]) -> bool {
    set.iter().any(|entry| entry.eq_ignore_ascii_case(name))
}
