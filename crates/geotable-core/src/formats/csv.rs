//! Delimited text.
//!
//! Reading infers column types with `arrow-csv`; geometry columns are found
//! later by the detector. Writing emits the attributes followed by a `wkt`
//! column, plus `geometry_layer` and `geometry_proj4` when they carry
//! information.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use arrow_array::{ArrayRef, RecordBatch, RecordBatchOptions, StringArray};
use arrow_csv::reader::Format;
use arrow_csv::{ReaderBuilder, WriterBuilder};
use arrow_schema::{DataType, Field, Schema};
use arrow_select::concat::concat_batches;
use log::debug;

use crate::detect::{GEOMETRY_LAYER_COLUMN, GEOMETRY_PROJ4_COLUMN, WKT_COLUMN};
use crate::error::{FormatError, IoErrorExt, Result};
use crate::formats::{SourceLayer, declared_proj4, layer_name};
use crate::table::GeoTable;

/// Options for reading delimited text.
#[derive(Debug, Clone)]
pub struct CsvReadOptions {
    /// Field delimiter (default: b',')
    pub delimiter: u8,
    /// Whether the first line holds column names (default: true)
    pub has_header: bool,
    /// Infer date and timestamp columns instead of keeping them as text (default: false)
    pub parse_dates: bool,
    /// Rows sampled for type inference; `None` reads them all (default: 1000)
    pub schema_infer_max_records: Option<usize>,
}

impl Default for CsvReadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            parse_dates: false,
            schema_infer_max_records: Some(1000),
        }
    }
}

impl CsvReadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    #[must_use]
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    #[must_use]
    pub fn with_parse_dates(mut self, parse_dates: bool) -> Self {
        self.parse_dates = parse_dates;
        self
    }

    #[must_use]
    pub fn with_schema_infer_max_records(mut self, max_records: Option<usize>) -> Self {
        self.schema_infer_max_records = max_records;
        self
    }
}

/// Options for writing delimited text.
#[derive(Debug, Clone)]
pub struct CsvWriteOptions {
    /// Field delimiter (default: b',')
    pub delimiter: u8,
    /// Whether to write a header row (default: true)
    pub has_header: bool,
}

impl Default for CsvWriteOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
        }
    }
}

impl CsvWriteOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    #[must_use]
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }
}

/// Reads a delimited file as one layer named after the file stem.
///
/// # Errors
///
/// Fails when the file cannot be opened or parsed, or has no columns.
pub fn read(path: &Path, options: &CsvReadOptions) -> Result<SourceLayer> {
    let attributes = read_batch(path, options)?;
    debug!(
        "Read {} rows and {} columns from {}",
        attributes.num_rows(),
        attributes.num_columns(),
        path.display()
    );
    Ok(SourceLayer::new(layer_name(path), attributes).with_native_proj4(declared_proj4(path, None)?))
}

fn read_batch(path: &Path, options: &CsvReadOptions) -> Result<RecordBatch> {
    let mut file = File::open(path).with_read_context("CSV", path)?;
    let format = Format::default()
        .with_header(options.has_header)
        .with_delimiter(options.delimiter);
    let (schema, _) = format
        .infer_schema(&mut file, options.schema_infer_max_records)
        .with_read_context("CSV", path)?;
    if schema.fields().is_empty() {
        return Err(FormatError::EmptySource {
            path: path.to_path_buf(),
        }
        .into());
    }
    let schema = Arc::new(if options.parse_dates {
        schema
    } else {
        dates_as_text(&schema)
    });

    file.seek(SeekFrom::Start(0)).with_read_context("CSV", path)?;
    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_format(format)
        .build(file)
        .with_read_context("CSV", path)?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_read_context("CSV", path)?;
    Ok(concat_batches(&schema, &batches)?)
}

fn dates_as_text(schema: &Schema) -> Schema {
    Schema::new(
        schema
            .fields()
            .iter()
            .map(|field| match field.data_type() {
                DataType::Date32
                | DataType::Date64
                | DataType::Timestamp(_, _)
                | DataType::Time32(_)
                | DataType::Time64(_) => Field::new(field.name(), DataType::Utf8, true),
                _ => field.as_ref().clone(),
            })
            .collect::<Vec<_>>(),
    )
}

/// Writes a table as delimited text.
///
/// # Errors
///
/// Fails when the file cannot be created or a column cannot be rendered.
pub fn write(table: &GeoTable, path: &Path, options: &CsvWriteOptions) -> Result<()> {
    let batch = to_batch(table)?;
    let file = File::create(path).with_write_context("CSV", path)?;
    let mut writer = WriterBuilder::new()
        .with_delimiter(options.delimiter)
        .with_header(options.has_header)
        .build(file);
    writer.write(&batch).with_write_context("CSV", path)?;
    debug!("Wrote {} rows to {}", batch.num_rows(), path.display());
    Ok(())
}

/// Builds the batch written to CSV: attributes, then `wkt`, then the layer and
/// projection columns when needed.
pub(crate) fn to_batch(table: &GeoTable) -> Result<RecordBatch> {
    let reserved = [WKT_COLUMN, GEOMETRY_LAYER_COLUMN, GEOMETRY_PROJ4_COLUMN];
    let attributes = table.attributes();
    let mut fields: Vec<Field> = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();
    for (field, column) in attributes.schema().fields().iter().zip(attributes.columns()) {
        if reserved.contains(&field.name().as_str()) {
            continue;
        }
        fields.push(field.as_ref().clone());
        columns.push(Arc::clone(column));
    }

    let mut text_column = |name: &str, values: Vec<String>| {
        fields.push(Field::new(name, DataType::Utf8, false));
        columns.push(Arc::new(StringArray::from(values)) as ArrayRef);
    };
    text_column(
        WKT_COLUMN,
        table.geometries().iter().map(|g| g.to_wkt()).collect(),
    );
    if !table.has_one_layer() {
        text_column(GEOMETRY_LAYER_COLUMN, table.layers().to_vec());
    }
    if !table.has_standard_proj4() {
        text_column(GEOMETRY_PROJ4_COLUMN, table.proj4s().to_vec());
    }

    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &RecordBatchOptions::new().with_row_count(Some(table.len())),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::projection::LONGITUDE_LATITUDE_PROJ4;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_read_infers_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("points.csv");
        fs::write(&path, "name,value,wkt\nA,1,POINT (0 0)\nB,2.5,POINT (1 1)\n").unwrap();

        let layer = read(&path, &CsvReadOptions::default()).unwrap();
        assert_eq!(layer.name, "points");
        assert_eq!(layer.num_rows(), 2);
        assert_eq!(layer.column_names(), vec!["name", "value", "wkt"]);
        let schema = layer.attributes.schema();
        assert_eq!(schema.field_with_name("value").unwrap().data_type(), &DataType::Float64);
        assert!(layer.native_proj4.is_none());
    }

    #[test]
    fn test_dates_stay_text_unless_requested() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.csv");
        fs::write(&path, "day,lat,lon\n2020-01-02,1,2\n").unwrap();

        let layer = read(&path, &CsvReadOptions::default()).unwrap();
        let schema = layer.attributes.schema();
        assert_eq!(schema.field_with_name("day").unwrap().data_type(), &DataType::Utf8);

        let layer = read(&path, &CsvReadOptions::new().with_parse_dates(true)).unwrap();
        let schema = layer.attributes.schema();
        assert_eq!(schema.field_with_name("day").unwrap().data_type(), &DataType::Date32);
    }

    #[test]
    fn test_read_delimiter_and_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("points.tsv");
        fs::write(&path, "wkt\tname\nPOINT (0 0)\tA\n").unwrap();
        fs::write(dir.path().join("points.proj4"), "+proj=utm +zone=17\n").unwrap();

        let layer = read(&path, &CsvReadOptions::new().with_delimiter(b'\t')).unwrap();
        assert_eq!(layer.column_names(), vec!["wkt", "name"]);
        assert_eq!(layer.native_proj4.as_deref(), Some("+proj=utm +zone=17"));
    }

    #[test]
    fn test_read_empty_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "").unwrap();
        assert!(read(&path, &CsvReadOptions::default()).is_err());
    }

    #[test]
    fn test_write_adds_reserved_columns_only_when_needed() {
        let one = GeoTable::new(
            crate::formats::attributes::empty_batch(1).unwrap(),
            vec![Geometry::point(1.0, 2.0)],
            vec!["a".to_string()],
            vec![LONGITUDE_LATITUDE_PROJ4.to_string()],
        )
        .unwrap();
        let batch = to_batch(&one).unwrap();
        let names: Vec<String> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["wkt"]);

        let two = GeoTable::concat(&[
            one.clone(),
            GeoTable::new(
                crate::formats::attributes::empty_batch(1).unwrap(),
                vec![Geometry::point(500_000.0, 0.0)],
                vec!["b".to_string()],
                vec!["+proj=utm +zone=31".to_string()],
            )
            .unwrap(),
        ])
        .unwrap();
        let batch = to_batch(&two).unwrap();
        let names: Vec<String> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["wkt", "geometry_layer", "geometry_proj4"]);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        write(&two, &path, &CsvWriteOptions::default()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("wkt,geometry_layer,geometry_proj4\n"));
        assert!(text.contains("POINT (1 2),a,"));
    }
}
