//! The one fixed Arrow schema this codec ever writes or reads against.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};

use crate::event::COLUMN_ORDER;

const NULLABLE_STRING_COLUMNS: &[&str] = &[
    "category",
    "sg_event_id",
    "sg_message_id",
    "sg_template_id",
    "smtp_id",
    "useragent",
    "ip",
    "url",
    "reason",
    "status",
    "response",
    "attempt",
    "type",
    "bounce_classification",
    "marketing_campaign_name",
    "pool_name",
];

const NULLABLE_INT32_COLUMNS: &[&str] =
    &["tls", "asm_group_id", "marketing_campaign_id", "pool_id"];

/// Build the canonical on-disk schema in [`COLUMN_ORDER`].
pub fn arrow_schema() -> SchemaRef {
    let fields: Vec<Field> = COLUMN_ORDER
        .iter()
        .map(|&name| field_for(name))
        .collect();
    Arc::new(Schema::new(fields))
}

fn field_for(name: &str) -> Field {
    match name {
        "email" | "event" => Field::new(name, DataType::Utf8, false),
        "timestamp" => Field::new(name, DataType::Int64, false),
        "send_at" => Field::new(name, DataType::Int64, true),
        _ if NULLABLE_INT32_COLUMNS.contains(&name) => Field::new(name, DataType::Int32, true),
        _ if NULLABLE_STRING_COLUMNS.contains(&name) => Field::new(name, DataType::Utf8, true),
        _ => unreachable!("every COLUMN_ORDER entry must be classified: {name}"),
    }
}
