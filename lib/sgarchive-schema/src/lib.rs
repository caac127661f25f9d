//! Fixed-schema columnar codec: encodes SendGrid event batches to Parquet
//! with bounded row groups, and decodes individual row groups back without
//! ever materializing a whole file at once.

pub mod arrow_schema;
mod codec;
mod error;
mod event;

pub use codec::{
    build_record_batch, decode_row_group, encode_streaming, row_group_count,
    DEFAULT_ROW_GROUP_SIZE,
};
pub use error::SchemaCodecError;
pub use event::{Event, WireEvent, COLUMN_ORDER, REQUIRED_COLUMNS};
