//! CSV import of candidate records.
//!
//! The file needs a header row with `id` and `name` columns; every other
//! column becomes a record attribute. Blank attribute cells are skipped.

use crate::models::{EntityType, Record};
use crate::{Error, Result};
use std::io::Read;
use std::path::Path;

/// Reads records from a CSV file.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a missing column or a non-numeric ID,
/// and [`Error::OperationFailed`] if the file cannot be read.
pub fn read_csv_file(
    path: impl AsRef<Path>,
    project_id: i64,
    entity_type: EntityType,
) -> Result<Vec<Record>> {
    let file = std::fs::File::open(path.as_ref())
        .map_err(|e| Error::operation("open_csv", format!("{}: {e}", path.as_ref().display())))?;
    read_csv(file, project_id, entity_type)
}

/// Reads records from any CSV source.
///
/// # Errors
///
/// See [`read_csv_file`].
pub fn read_csv<R: Read>(
    reader: R,
    project_id: i64,
    entity_type: EntityType,
) -> Result<Vec<Record>> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv
        .headers()
        .map_err(|e| Error::operation("read_csv_header", e))?
        .clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::InvalidInput(format!("CSV is missing the '{name}' column")))
    };
    let id_col = column("id")?;
    let name_col = column("name")?;

    let mut records = Vec::new();
    for (line, row) in csv.records().enumerate() {
        let row = row.map_err(|e| Error::operation("read_csv_row", e))?;
        let raw_id = row.get(id_col).unwrap_or_default();
        let id: i64 = raw_id.parse().map_err(|_| {
            Error::InvalidInput(format!("row {}: invalid id '{raw_id}'", line + 2))
        })?;
        let name = row.get(name_col).unwrap_or_default();

        let record = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_col && *i != name_col)
            .filter_map(|(i, header)| {
                row.get(i)
                    .filter(|v| !v.is_empty())
                    .map(|v| (header.to_lowercase(), v.to_string()))
            })
            .fold(Record::new(id, project_id, entity_type, name), |r, (k, v)| {
                r.with_field(k, v)
            });
        records.push(record);
    }

    tracing::debug!(count = records.len(), project_id, "Parsed CSV records");
    Ok(records)
}
