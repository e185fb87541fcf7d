//! Persisted file format for the daily series.

mod csv_codec;

#[allow(unused_imports)]
pub use csv_codec::{decode_dataset, encode_dataset, CodecError, CSV_CONTENT_TYPE, CSV_HEADER};
