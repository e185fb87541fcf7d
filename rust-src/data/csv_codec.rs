//! CSV encoding of the stored dataset.
//!
//! The object is UTF-8, comma-delimited, with a `day,tx_count` header and one
//! row per day (`YYYY-MM-DD`, plain integer).

use csv::{ReaderBuilder, Terminator, Trim, WriterBuilder};

use crate::models::{DailyCountRow, Dataset, DedupPolicy};


/// Column names, in order.
pub const CSV_HEADER: [&str; 2] = ["day", "tx_count"];

/// Content type attached to the stored object.
pub const CSV_CONTENT_TYPE: &str = "text/csv";


/// Errors while decoding or encoding the stored CSV.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("stored dataset is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("unexpected CSV header {found:?}, expected \"day,tx_count\"")]
    Header { found: String },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to finish CSV output: {0}")]
    Io(#[from] std::io::Error),
}


/// Parse a stored object into a dataset.
///
/// A zero-length object or a bare header yields an empty (but present)
/// dataset. Rows are normalized, so a hand-edited file with out-of-order or
/// repeated days still produces a valid dataset.
pub fn decode_dataset(bytes: &[u8], policy: DedupPolicy) -> Result<Dataset, CodecError> {
    let text = std::str::from_utf8(bytes)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Ok(Dataset::default());
    }
    if headers.iter().ne(CSV_HEADER.iter().copied()) {
        return Err(CodecError::Header {
            found: headers.iter().collect::<Vec<_>>().join(","),
        });
    }

    let mut rows = Vec::new();
    for record in reader.deserialize::<DailyCountRow>() {
        rows.push(record?);
    }

    Ok(Dataset::from_rows(rows, policy))
}


/// Serialize a dataset into the stored CSV form.
pub fn encode_dataset(dataset: &Dataset) -> Result<Vec<u8>, CodecError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    // Header written by hand so an empty dataset still gets one.
    writer.write_record(CSV_HEADER)?;
    for row in dataset.rows() {
        writer.serialize(row)?;
    }

    writer.into_inner().map_err(|e| CodecError::Io(e.into_error()))
}
