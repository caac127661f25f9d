//! Failure modes for the columnar codec (spec.md §7 "Corrupt input").

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum SchemaCodecError {
    #[snafu(display("failed to build Arrow record batch: {source}"))]
    RecordBatch { source: arrow_schema::ArrowError },

    #[snafu(display("failed to write Parquet data: {source}"))]
    ParquetWrite { source: parquet::errors::ParquetError },

    #[snafu(display("failed to open Parquet file: {source}"))]
    ParquetOpen { source: parquet::errors::ParquetError },

    #[snafu(display("I/O error: {source}"))]
    Io { source: std::io::Error },
}

impl From<arrow_schema::ArrowError> for SchemaCodecError {
    fn from(source: arrow_schema::ArrowError) -> Self {
        Self::RecordBatch { source }
    }
}

impl From<parquet::errors::ParquetError> for SchemaCodecError {
    fn from(source: parquet::errors::ParquetError) -> Self {
        Self::ParquetWrite { source }
    }
}

impl From<std::io::Error> for SchemaCodecError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}
