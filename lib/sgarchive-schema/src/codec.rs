//! Streaming encode and resilient row-group decode against the fixed
//! schema in [`crate::arrow_schema`].

use std::io::Write;
use std::sync::Arc;

use arrow::array::{Array, Int32Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use tracing::warn;

use crate::arrow_schema::arrow_schema;
use crate::error::SchemaCodecError;
use crate::event::{Event, COLUMN_ORDER, REQUIRED_COLUMNS};

/// Default row-group size: stays well under typical payload-size limits
/// such as 6 MiB per spec.md §4.3.
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10_000;

/// Consume `source` and append fixed-schema rows to `sink`, flushing a row
/// group whenever the in-memory buffer reaches `row_group_size` records.
/// Returns `false` (and the caller should discard `sink`) if no records
/// were produced.
pub async fn encode_streaming<S, W>(
    mut source: S,
    sink: W,
    row_group_size: usize,
) -> Result<bool, SchemaCodecError>
where
    S: Stream<Item = Event> + Unpin,
    W: Write + Send,
{
    let schema = arrow_schema();
    let props = WriterProperties::builder()
        .set_max_row_group_size(row_group_size)
        .build();
    let mut writer = ArrowWriter::try_new(sink, Arc::clone(&schema), Some(props))?;

    let mut buffer = Vec::with_capacity(row_group_size);
    let mut total_rows = 0usize;

    while let Some(event) = source.next().await {
        buffer.push(event);
        if buffer.len() >= row_group_size {
            total_rows += flush_row_group(&mut writer, &schema, &mut buffer)?;
        }
    }
    if !buffer.is_empty() {
        total_rows += flush_row_group(&mut writer, &schema, &mut buffer)?;
    }

    if total_rows == 0 {
        return Ok(false);
    }
    writer.close()?;
    Ok(true)
}

fn flush_row_group<W: Write + Send>(
    writer: &mut ArrowWriter<W>,
    schema: &SchemaRef,
    buffer: &mut Vec<Event>,
) -> Result<usize, SchemaCodecError> {
    let batch = build_record_batch(buffer, schema)?;
    let rows = batch.num_rows();
    writer.write(&batch)?;
    writer.flush()?;
    buffer.clear();
    Ok(rows)
}

/// Build one [`RecordBatch`] from a slice of events, in [`COLUMN_ORDER`].
pub fn build_record_batch(events: &[Event], schema: &SchemaRef) -> Result<RecordBatch, SchemaCodecError> {
    let columns: Vec<Arc<dyn Array>> = COLUMN_ORDER
        .iter()
        .map(|&name| column_for(name, events))
        .collect();
    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}

fn column_for(name: &str, events: &[Event]) -> Arc<dyn Array> {
    match name {
        "email" => Arc::new(StringArray::from_iter_values(events.iter().map(|e| e.email.as_str()))),
        "event" => Arc::new(StringArray::from_iter_values(events.iter().map(|e| e.event.as_str()))),
        "timestamp" => Arc::new(Int64Array::from_iter_values(events.iter().map(|e| e.timestamp))),
        "category" => string_column(events, |e| e.category.as_deref()),
        "sg_event_id" => string_column(events, |e| e.sg_event_id.as_deref()),
        "sg_message_id" => string_column(events, |e| e.sg_message_id.as_deref()),
        "sg_template_id" => string_column(events, |e| e.sg_template_id.as_deref()),
        "smtp_id" => string_column(events, |e| e.smtp_id.as_deref()),
        "useragent" => string_column(events, |e| e.useragent.as_deref()),
        "ip" => string_column(events, |e| e.ip.as_deref()),
        "url" => string_column(events, |e| e.url.as_deref()),
        "reason" => string_column(events, |e| e.reason.as_deref()),
        "status" => string_column(events, |e| e.status.as_deref()),
        "response" => string_column(events, |e| e.response.as_deref()),
        "attempt" => string_column(events, |e| e.attempt.as_deref()),
        "type" => string_column(events, |e| e.event_type.as_deref()),
        "bounce_classification" => string_column(events, |e| e.bounce_classification.as_deref()),
        "marketing_campaign_name" => string_column(events, |e| e.marketing_campaign_name.as_deref()),
        "pool_name" => string_column(events, |e| e.pool_name.as_deref()),
        "tls" => int32_column(events, |e| e.tls),
        "asm_group_id" => int32_column(events, |e| e.asm_group_id),
        "marketing_campaign_id" => int32_column(events, |e| e.marketing_campaign_id),
        "pool_id" => int32_column(events, |e| e.pool_id),
        "send_at" => Arc::new(Int64Array::from_iter(events.iter().map(|e| e.send_at))),
        other => unreachable!("unhandled column in COLUMN_ORDER: {other}"),
    }
}

fn string_column(events: &[Event], f: impl Fn(&Event) -> Option<&str>) -> Arc<dyn Array> {
    Arc::new(StringArray::from_iter(events.iter().map(f)))
}

fn int32_column(events: &[Event], f: impl Fn(&Event) -> Option<i32>) -> Arc<dyn Array> {
    Arc::new(Int32Array::from_iter(events.iter().map(f)))
}

/// Decode one row group. If a required column (`email`, `timestamp`,
/// `event`) is missing from the file's own schema, or any batch in this row
/// group fails to read, the row group yields zero records — never a
/// partial result (spec.md §4.3).
pub fn decode_row_group(file: Bytes, row_group_index: usize) -> Result<Vec<Event>, SchemaCodecError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|source| {
        SchemaCodecError::ParquetOpen { source }
    })?;

    let file_schema = builder.schema();
    for required in REQUIRED_COLUMNS {
        if file_schema.field_with_name(required).is_err() {
            warn!(column = required, "required column missing from file schema");
            return Ok(Vec::new());
        }
    }

    let reader = match builder.with_row_groups(vec![row_group_index]).build() {
        Ok(reader) => reader,
        Err(source) => {
            warn!(row_group_index, error = %source, "failed to open row group reader");
            return Ok(Vec::new());
        }
    };

    let mut events = Vec::new();
    for batch_result in reader {
        let batch = match batch_result {
            Ok(batch) => batch,
            Err(error) => {
                warn!(row_group_index, %error, "row group read failed, yielding zero records");
                return Ok(Vec::new());
            }
        };
        events.extend(record_batch_to_events(&batch));
    }
    Ok(events)
}

/// Total row-group count in a Parquet file, used by the compaction engine's
/// verify phase to confirm a freshly written file round-trips.
pub fn row_group_count(file: Bytes) -> Result<usize, SchemaCodecError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|source| SchemaCodecError::ParquetOpen { source })?;
    Ok(builder.metadata().num_row_groups())
}

fn record_batch_to_events(batch: &RecordBatch) -> Vec<Event> {
    let rows = batch.num_rows();
    let mut events: Vec<Event> = (0..rows).map(|_| Event::default()).collect();

    for (idx, event) in events.iter_mut().enumerate() {
        event.email = get_required_string(batch, "email", idx);
        event.event = get_required_string(batch, "event", idx);
        event.timestamp = get_required_i64(batch, "timestamp", idx);

        event.category = get_string(batch, "category", idx);
        event.sg_event_id = get_string(batch, "sg_event_id", idx);
        event.sg_message_id = get_string(batch, "sg_message_id", idx);
        event.sg_template_id = get_string(batch, "sg_template_id", idx);
        event.smtp_id = get_string(batch, "smtp_id", idx);
        event.useragent = get_string(batch, "useragent", idx);
        event.ip = get_string(batch, "ip", idx);
        event.url = get_string(batch, "url", idx);
        event.reason = get_string(batch, "reason", idx);
        event.status = get_string(batch, "status", idx);
        event.response = get_string(batch, "response", idx);
        event.attempt = get_string(batch, "attempt", idx);
        event.event_type = get_string(batch, "type", idx);
        event.bounce_classification = get_string(batch, "bounce_classification", idx);
        event.marketing_campaign_name = get_string(batch, "marketing_campaign_name", idx);
        event.pool_name = get_string(batch, "pool_name", idx);

        event.tls = get_lenient_i32(batch, "tls", idx);
        event.asm_group_id = get_lenient_i32(batch, "asm_group_id", idx);
        event.marketing_campaign_id = get_lenient_i32(batch, "marketing_campaign_id", idx);
        event.pool_id = get_lenient_i32(batch, "pool_id", idx);
        event.send_at = get_lenient_i64(batch, "send_at", idx);
    }
    events
}

fn column_index(batch: &RecordBatch, name: &str) -> Option<usize> {
    batch.schema().index_of(name).ok()
}

fn get_required_string(batch: &RecordBatch, name: &str, idx: usize) -> String {
    get_string(batch, name, idx).unwrap_or_default()
}

fn get_required_i64(batch: &RecordBatch, name: &str, idx: usize) -> i64 {
    get_lenient_i64(batch, name, idx).unwrap_or_default()
}

fn get_string(batch: &RecordBatch, name: &str, idx: usize) -> Option<String> {
    let col_idx = column_index(batch, name)?;
    let array = batch.column(col_idx).as_any().downcast_ref::<StringArray>()?;
    if array.is_null(idx) {
        None
    } else {
        Some(array.value(idx).to_string())
    }
}

/// Accepts both 32-bit and 64-bit physical representations and narrows as
/// needed, per spec.md §4.3 "width-lenient integers".
fn get_lenient_i32(batch: &RecordBatch, name: &str, idx: usize) -> Option<i32> {
    let col_idx = column_index(batch, name)?;
    let column = batch.column(col_idx);
    if let Some(array) = column.as_any().downcast_ref::<Int32Array>() {
        return (!array.is_null(idx)).then(|| array.value(idx));
    }
    if let Some(array) = column.as_any().downcast_ref::<Int64Array>() {
        return (!array.is_null(idx)).then(|| array.value(idx) as i32);
    }
    None
}

fn get_lenient_i64(batch: &RecordBatch, name: &str, idx: usize) -> Option<i64> {
    let col_idx = column_index(batch, name)?;
    let column = batch.column(col_idx);
    if let Some(array) = column.as_any().downcast_ref::<Int64Array>() {
        return (!array.is_null(idx)).then(|| array.value(idx));
    }
    if let Some(array) = column.as_any().downcast_ref::<Int32Array>() {
        return (!array.is_null(idx)).then(|| array.value(idx) as i64);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn sample_event(n: i64) -> Event {
        Event {
            email: format!("user{n}@example.com"),
            timestamp: 1_700_000_000 + n,
            event: "delivered".to_string(),
            sg_event_id: Some(format!("evt-{n}")),
            tls: Some(1),
            ..Event::default()
        }
    }

    async fn encode_to_bytes(events: Vec<Event>, row_group_size: usize) -> Option<Bytes> {
        let mut buf = Vec::new();
        let produced = encode_streaming(stream::iter(events), &mut buf, row_group_size)
            .await
            .unwrap();
        produced.then(|| Bytes::from(buf))
    }

    #[tokio::test]
    async fn empty_stream_produces_nothing() {
        let result = encode_to_bytes(vec![], 100).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn round_trips_a_single_row_group() {
        let events: Vec<Event> = (0..5).map(sample_event).collect();
        let bytes = encode_to_bytes(events.clone(), 100).await.unwrap();

        assert_eq!(row_group_count(bytes.clone()).unwrap(), 1);
        let decoded = decode_row_group(bytes, 0).unwrap();
        assert_eq!(decoded, events);
    }

    #[tokio::test]
    async fn splits_into_multiple_row_groups() {
        let events: Vec<Event> = (0..25).map(sample_event).collect();
        let bytes = encode_to_bytes(events.clone(), 10).await.unwrap();

        assert_eq!(row_group_count(bytes.clone()).unwrap(), 3);
        let group0 = decode_row_group(bytes.clone(), 0).unwrap();
        let group1 = decode_row_group(bytes.clone(), 1).unwrap();
        let group2 = decode_row_group(bytes, 2).unwrap();

        assert_eq!(group0, events[0..10]);
        assert_eq!(group1, events[10..20]);
        assert_eq!(group2, events[20..25]);
    }

    #[tokio::test]
    async fn decode_yields_empty_vec_on_bogus_bytes() {
        let bogus = Bytes::from_static(b"not a parquet file");
        let err = decode_row_group(bogus, 0);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn decode_yields_empty_vec_on_out_of_range_row_group() {
        let events: Vec<Event> = (0..3).map(sample_event).collect();
        let bytes = encode_to_bytes(events, 100).await.unwrap();
        let decoded = decode_row_group(bytes, 5).unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn optional_fields_round_trip_as_none() {
        let sparse = Event {
            email: "bare@example.com".to_string(),
            timestamp: 1,
            event: "open".to_string(),
            ..Event::default()
        };
        let bytes = encode_to_bytes(vec![sparse.clone()], 100).await.unwrap();
        let decoded = decode_row_group(bytes, 0).unwrap();
        assert_eq!(decoded, vec![sparse]);
    }

    #[test]
    fn build_record_batch_preserves_column_order() {
        let schema = arrow_schema();
        let events = vec![sample_event(0)];
        let batch = build_record_batch(&events, &schema).unwrap();
        for (idx, &name) in COLUMN_ORDER.iter().enumerate() {
            assert_eq!(batch.schema().field(idx).name(), name);
        }
    }

}
