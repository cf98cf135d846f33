//! Format readers and writers.
//!
//! Readers turn a file into one or more [`SourceLayer`]s: raw attribute
//! columns, plus native geometries when the format carries them, plus the CRS
//! the source declares for itself. Geometry detection, decoding and
//! reprojection happen afterwards, the same way for every format.

pub mod archive;
pub mod attributes;
pub mod csv;
pub mod geojson;
pub mod kmz;
pub mod shapefile;

use std::path::Path;

use arrow_array::RecordBatch;
use log::debug;

use crate::detect::GEOMETRY_OBJECT_COLUMN;
use crate::drivers::{self, Driver};
use crate::error::{DriverError, Result};
use crate::geometry::Geometry;
use crate::projection::read_sidecar_proj4;

pub use self::csv::{CsvReadOptions, CsvWriteOptions};

/// One layer as handed over by a format reader, before geometry decoding.
#[derive(Debug, Clone)]
pub struct SourceLayer {
    /// Layer name, usually the file stem or a folder name.
    pub name: String,
    /// Attribute columns, including any geometry-bearing text columns.
    pub attributes: RecordBatch,
    /// One geometry per row when the format supplies them directly.
    pub native_geometries: Option<Vec<Option<Geometry>>>,
    /// CRS declared by the source (sidecar `.proj4` first, then the format's own).
    pub native_proj4: Option<String>,
}

impl SourceLayer {
    pub fn new(name: impl Into<String>, attributes: RecordBatch) -> Self {
        Self {
            name: name.into(),
            attributes,
            native_geometries: None,
            native_proj4: None,
        }
    }

    #[must_use]
    pub fn with_native_geometries(mut self, geometries: Vec<Option<Geometry>>) -> Self {
        self.native_geometries = Some(geometries);
        self
    }

    #[must_use]
    pub fn with_native_proj4(mut self, proj4: Option<String>) -> Self {
        self.native_proj4 = proj4;
        self
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.attributes.num_rows()
    }

    /// Column names as seen by the detector. Native geometries show up as the
    /// reserved `geometry_object` column after the attribute columns.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .attributes
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        if self.native_geometries.is_some() {
            names.push(GEOMETRY_OBJECT_COLUMN.to_string());
        }
        names
    }
}

/// Layer name derived from a path: the file stem.
#[must_use]
pub fn layer_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The CRS a file declares: its sidecar `.proj4` if present, else `embedded`.
///
/// # Errors
///
/// Returns an I/O error when the sidecar exists but cannot be read.
pub fn declared_proj4(path: &Path, embedded: Option<String>) -> Result<Option<String>> {
    Ok(read_sidecar_proj4(path)?.or(embedded))
}

/// Returns `true` for paths with a `.zip` extension.
#[must_use]
pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Reads every layer of `path` with `driver`.
///
/// # Errors
///
/// Fails when the driver cannot read, or with the reader's own error.
pub fn read_layers(path: &Path, driver: &Driver, csv: &CsvReadOptions) -> Result<Vec<SourceLayer>> {
    debug!("Reading {} as {}", path.display(), driver.short_name);
    if !driver.capabilities.read.is_supported() {
        return Err(DriverError::OperationNotSupported {
            driver: driver.short_name.to_string(),
            operation: "reading".to_string(),
        }
        .into());
    }
    if is_zip(path) {
        return archive::read(path, csv);
    }
    match driver.short_name {
        drivers::CSV => Ok(vec![self::csv::read(path, csv)?]),
        drivers::GEOJSON | drivers::GEOJSON_SEQ => Ok(vec![geojson::read(path)?]),
        drivers::SHAPEFILE => Ok(vec![shapefile::read(path)?]),
        drivers::KML => kmz::read_kml(path),
        drivers::KMZ => kmz::read_kmz(path),
        other => Err(DriverError::OperationNotSupported {
            driver: other.to_string(),
            operation: "reading".to_string(),
        }
        .into()),
    }
}
