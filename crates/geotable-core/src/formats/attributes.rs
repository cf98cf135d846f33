//! Conversion between JSON property maps and Arrow record batches.
//!
//! Readers of feature formats (`GeoJSON`, KML, shapefile) collect one property
//! map per feature and turn the lot into a [`RecordBatch`] with inferred
//! column types. Writers go the other way. Nested objects and arrays are kept
//! as their JSON text so every column stays scalar.

use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchOptions};
use arrow_json::reader::infer_json_schema_from_iterator;
use arrow_json::writer::JsonArray;
use arrow_json::{ReaderBuilder, WriterBuilder};
use arrow_schema::Schema;
use serde_json::{Map, Value};

use crate::error::{FormatError, Result};

/// One feature's properties.
pub type Properties = Map<String, Value>;

/// Builds a batch with no columns and `num_rows` rows.
///
/// # Errors
///
/// Never fails in practice; the Arrow constructor is fallible.
pub fn empty_batch(num_rows: usize) -> Result<RecordBatch> {
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::empty()),
        vec![],
        &RecordBatchOptions::new().with_row_count(Some(num_rows)),
    )?)
}

/// Converts property maps to a batch, inferring one column per key in
/// first-appearance order. Missing keys become nulls; a key whose values mix
/// types becomes a text column.
///
/// # Errors
///
/// Returns an Arrow error when a value cannot be decoded into its column.
pub fn properties_to_batch(rows: &[Properties]) -> Result<RecordBatch> {
    let flat: Vec<Value> = rows.iter().map(flatten).collect();
    let schema = infer_json_schema_from_iterator(flat.iter().map(Ok))?;
    if schema.fields().is_empty() || flat.is_empty() {
        return empty_batch(rows.len());
    }

    let mut decoder = ReaderBuilder::new(Arc::new(schema))
        .with_batch_size(flat.len())
        .with_coerce_primitive(true)
        .build_decoder()?;
    decoder.serialize(&flat)?;
    match decoder.flush()? {
        Some(batch) => Ok(batch),
        None => empty_batch(rows.len()),
    }
}

/// Converts every row of `batch` to a property map. Null cells map to JSON
/// null so every row carries every column.
///
/// # Errors
///
/// Returns an Arrow error for column types the JSON writer cannot encode.
pub fn batch_to_properties(batch: &RecordBatch) -> Result<Vec<Properties>> {
    if batch.num_columns() == 0 || batch.num_rows() == 0 {
        return Ok(vec![Properties::new(); batch.num_rows()]);
    }
    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    writer.write(batch)?;
    writer.finish()?;
    let buffer = writer.into_inner();
    serde_json::from_slice(&buffer).map_err(|e| {
        FormatError::Parse {
            format: "JSON".to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Renders a JSON value the way it should appear in a text cell.
#[must_use]
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn flatten(properties: &Properties) -> Value {
    Value::Object(
        properties
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
                    scalar => scalar.clone(),
                };
                (key.clone(), value)
            })
            .collect(),
    )
}
