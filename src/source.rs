use std::io::Read;
use std::path::Path;

use anyhow::Context;

use crate::error::IngestionError;
use crate::models::RawRow;

/// Reads scored rows from a CSV export. Short or ragged lines are accepted so
/// that their missing fields are reported by the store rather than here.
///
/// A record that cannot be decoded (for example a cell with invalid UTF-8)
/// comes back as an `Err` in its own slot; only I/O failures and an unreadable
/// header abort the read.
pub fn read_rows<R: Read>(input: R) -> anyhow::Result<Vec<Result<RawRow, IngestionError>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    reader.headers().context("failed to read CSV header")?;

    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<RawRow>().enumerate() {
        match result {
            Ok(row) => rows.push(Ok(row)),
            Err(err) if err.is_io_error() => {
                return Err(err).with_context(|| format!("failed to read CSV data row {index}"));
            }
            Err(err) => rows.push(Err(IngestionError::MalformedRow {
                reason: err.to_string(),
            })),
        }
    }
    Ok(rows)
}

pub fn read_csv(path: &Path) -> anyhow::Result<Vec<Result<RawRow, IngestionError>>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_rows(file).with_context(|| format!("failed to read {}", path.display()))
}
