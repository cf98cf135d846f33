//! Loading files into a [`GeoTable`] and saving it back out.
//!
//! `load` reads every layer of a source with the driver registered for its
//! extension, finds each layer's geometry columns, decodes and filters rows,
//! tags every row with its layer and projection, and reprojects the union when
//! a target projection is given. `save` reprojects when asked and hands the
//! table to the destination format, split into physical layers where the
//! format needs them.

use std::path::Path;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::{Array, RecordBatch, RecordBatchOptions};
use arrow_cast::cast;
use arrow_schema::{DataType, Schema};
use log::{debug, info};
use tempfile::TempDir;

use crate::decode::{DecodeOptions, decode};
use crate::detect::{GEOMETRY_LAYER_COLUMN, GEOMETRY_OBJECT_COLUMN, GEOMETRY_PROJ4_COLUMN, detect};
use crate::drivers::{self, Driver, driver_for_path};
use crate::error::{ConfigError, DriverError, FormatError, IoError, IoErrorExt, Result};
use crate::formats::{
    CsvReadOptions, CsvWriteOptions, SourceLayer, archive, csv, geojson, is_zip, kmz, read_layers,
    shapefile,
};
use crate::geometry::{BoundingBox, Geometry};
use crate::projection::{
    LONGITUDE_LATITUDE_PROJ4, ProjectionReference, normalize_proj4, resolve, resolve_with_embedded,
};
use crate::table::{GeoTable, take_rows};
use crate::types::{DatasetInfo, FieldInfo, LayerInfo};

/// Options for [`load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Projection of the source geometries (default: sidecar, embedded CRS, then lon/lat)
    pub source_proj4: ProjectionReference,
    /// Reproject every row to this projection; `None` keeps native projections
    pub target_proj4: Option<ProjectionReference>,
    /// Strip z ordinates
    pub drop_z: bool,
    /// Keep rows intersecting this box, in source coordinates
    pub bounding_box: Option<BoundingBox>,
    /// Keep rows intersecting this polygon, in source coordinates
    pub bounding_polygon: Option<Geometry>,
    /// Keep only these layers
    pub layer_selector: Option<Vec<String>>,
    /// Delimited text parsing
    pub csv: CsvReadOptions,
}

impl LoadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source_proj4(mut self, reference: ProjectionReference) -> Self {
        self.source_proj4 = reference;
        self
    }

    #[must_use]
    pub fn with_target_proj4(mut self, reference: ProjectionReference) -> Self {
        self.target_proj4 = Some(reference);
        self
    }

    #[must_use]
    pub fn with_drop_z(mut self, drop_z: bool) -> Self {
        self.drop_z = drop_z;
        self
    }

    #[must_use]
    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    #[must_use]
    pub fn with_bounding_polygon(mut self, polygon: Geometry) -> Self {
        self.bounding_polygon = Some(polygon);
        self
    }

    #[must_use]
    pub fn with_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layer_selector = Some(layers.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_csv(mut self, csv: CsvReadOptions) -> Self {
        self.csv = csv;
        self
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            drop_z: self.drop_z,
            bounding_box: self.bounding_box,
            bounding_polygon: self.bounding_polygon.clone(),
        }
    }
}

/// Options for [`save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Reproject to this projection before writing; `None` keeps the table's
    pub target_proj4: Option<ProjectionReference>,
    /// Output driver; `None` picks one from the destination extension
    pub driver: Option<Driver>,
    /// Delimited text output
    pub csv: CsvWriteOptions,
}

impl SaveOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_target_proj4(mut self, reference: ProjectionReference) -> Self {
        self.target_proj4 = Some(reference);
        self
    }

    #[must_use]
    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = Some(driver);
        self
    }

    #[must_use]
    pub fn with_csv(mut self, csv: CsvWriteOptions) -> Self {
        self.csv = csv;
        self
    }
}

fn input_driver(path: &Path) -> Result<Driver> {
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    driver_for_path(path).ok_or_else(|| {
        FormatError::UnsupportedFormat {
            path: path.to_path_buf(),
        }
        .into()
    })
}

/// Loads every layer of `path` into one table.
///
/// # Errors
///
/// Fails when the source cannot be read, a layer has no recognizable geometry
/// columns or no decodable geometry, or a projection cannot be resolved or
/// applied. No partial table is returned.
pub fn load(path: impl AsRef<Path>, options: &LoadOptions) -> Result<GeoTable> {
    let path = path.as_ref();
    let driver = input_driver(path)?;
    let mut layers = read_layers(path, &driver, &options.csv)?;
    if let Some(selector) = &options.layer_selector {
        layers.retain(|layer| {
            selector.contains(&layer.name)
                || layer.column_names().iter().any(|c| c == GEOMETRY_LAYER_COLUMN)
        });
    }

    let decode_options = options.decode_options();
    let mut tables = Vec::with_capacity(layers.len());
    for layer in &layers {
        let table = load_layer(path, layer, &options.source_proj4, &decode_options)?;
        tables.push(match &options.layer_selector {
            Some(selector) => table.select_layers(selector.as_slice())?,
            None => table,
        });
    }
    let table = if tables.is_empty() {
        GeoTable::empty()?
    } else {
        GeoTable::concat(&tables)?
    };
    info!(
        "Loaded {} rows in {} layer(s) from {}",
        table.len(),
        table.layer_names().len(),
        path.display()
    );

    match &options.target_proj4 {
        None => Ok(table),
        Some(ProjectionReference::Utm) => {
            let target = table.utm_proj4()?;
            info!("Reprojecting to {target}");
            table.reproject(&target)
        },
        Some(reference) => {
            let target = resolve(reference, Some(path))?;
            info!("Reprojecting to {target}");
            table.reproject(&target)
        },
    }
}

fn load_layer(
    path: &Path,
    layer: &SourceLayer,
    source_proj4: &ProjectionReference,
    options: &DecodeOptions,
) -> Result<GeoTable> {
    let plan = detect(&layer.column_names())?;
    debug!("Layer '{}' uses {} geometry", layer.name, plan.encoding());
    let decoded = decode(layer, &plan, options)?;
    let picked = take_rows(&layer.attributes, &decoded.rows)?;

    let layer_proj4 = resolve_with_embedded(source_proj4, Some(path), layer.native_proj4.as_deref())?;
    let layers = per_row_text(&picked, GEOMETRY_LAYER_COLUMN, &layer.name)?;
    let proj4s = per_row_text(&picked, GEOMETRY_PROJ4_COLUMN, &layer_proj4)?
        .iter()
        .map(|proj4| normalize_proj4(proj4))
        .collect();

    let mut consumed = plan.geometry_columns();
    consumed.extend([GEOMETRY_OBJECT_COLUMN, GEOMETRY_LAYER_COLUMN, GEOMETRY_PROJ4_COLUMN]);
    let attributes = without_columns(&picked, &consumed)?;
    GeoTable::new(attributes, decoded.geometries, layers, proj4s)
}

/// Values of a reserved text column, falling back to `default` for rows
/// where it is absent, null or blank.
fn per_row_text(batch: &RecordBatch, column: &str, default: &str) -> Result<Vec<String>> {
    let Some(values) = batch.column_by_name(column) else {
        return Ok(vec![default.to_string(); batch.num_rows()]);
    };
    let text = cast(values, &DataType::Utf8)?;
    let text = text.as_string::<i32>();
    Ok((0..text.len())
        .map(|i| {
            if text.is_null(i) || text.value(i).trim().is_empty() {
                default.to_string()
            } else {
                text.value(i).trim().to_string()
            }
        })
        .collect())
}

fn without_columns(batch: &RecordBatch, names: &[&str]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let (fields, columns): (Vec<_>, Vec<_>) = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .filter(|(field, _)| !names.contains(&field.name().as_str()))
        .map(|(field, column)| (Arc::clone(field), Arc::clone(column)))
        .unzip();
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &RecordBatchOptions::new().with_row_count(Some(batch.num_rows())),
    )?)
}

/// UTM descriptor for the centroid of everything in `path`.
///
/// # Errors
///
/// Fails when the source cannot be loaded, is empty, or its centroid is out of
/// longitude/latitude range.
pub fn load_utm_proj4(path: impl AsRef<Path>) -> Result<String> {
    load(path, &LoadOptions::default())?.utm_proj4()
}

/// Saves `table` to `path`.
///
/// # Errors
///
/// Fails when no driver can write the destination, the target projection
/// cannot be resolved or applied, or the writer fails.
pub fn save(table: &GeoTable, path: impl AsRef<Path>, options: &SaveOptions) -> Result<()> {
    let path = path.as_ref();
    let driver = match &options.driver {
        Some(driver) => driver.clone(),
        None => driver_for_path(path).ok_or_else(|| FormatError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?,
    };
    if !driver.capabilities.write.is_supported() {
        return Err(DriverError::OperationNotSupported {
            driver: driver.short_name.to_string(),
            operation: "writing".to_string(),
        }
        .into());
    }

    let table = match &options.target_proj4 {
        None => table.clone(),
        Some(ProjectionReference::Utm) => table.reproject(&table.utm_proj4()?)?,
        Some(ProjectionReference::Sidecar) => {
            return Err(ConfigError::InvalidOption {
                option: "target_proj4".to_string(),
                message: "a sidecar projection can only describe a source".to_string(),
            }
            .into());
        },
        Some(reference) => table.reproject(&resolve(reference, None)?)?,
    };
    info!(
        "Saving {} rows to {} as {}",
        table.len(),
        path.display(),
        driver.short_name
    );

    match driver.short_name {
        drivers::CSV => csv::write(&table, path, &options.csv),
        drivers::GEOJSON => geojson::write(&table, path),
        drivers::SHAPEFILE => save_shapefiles(&table, path),
        drivers::KML | drivers::KMZ => {
            let lonlat = normalize_proj4(LONGITUDE_LATITUDE_PROJ4);
            let table = match &options.target_proj4 {
                None => table.reproject(&lonlat)?,
                Some(_) if table.proj4s().iter().all(|p| *p == lonlat) => table,
                Some(reference) => {
                    return Err(ConfigError::InvalidOption {
                        option: "target_proj4".to_string(),
                        message: format!(
                            "{} stores longitude/latitude only, not '{reference}'",
                            driver.short_name
                        ),
                    }
                    .into());
                },
            };
            if driver.short_name == drivers::KML {
                kmz::write_kml(&table, path)
            } else {
                kmz::write_kmz(&table, path)
            }
        },
        other => Err(DriverError::OperationNotSupported {
            driver: other.to_string(),
            operation: "writing".to_string(),
        }
        .into()),
    }
}

/// One shapefile per layer. A `.zip` destination holds them all; a `.shp`
/// destination takes a single layer.
fn save_shapefiles(table: &GeoTable, path: &Path) -> Result<()> {
    let layers = table.split_by_layer()?;
    if !is_zip(path) {
        if layers.len() > 1 {
            return Err(ConfigError::InvalidOption {
                option: "output".to_string(),
                message: format!(
                    "{} layers cannot share one .shp file; save to a .zip instead",
                    layers.len()
                ),
            }
            .into());
        }
        let (name, layer) = match layers.into_iter().next() {
            Some(named) => named,
            None => (String::new(), table.clone()),
        };
        return shapefile::write_layer(&single_proj4(layer)?, &name, path);
    }

    let staging = TempDir::new().with_write_context("Shapefile", path)?;
    let mut used: Vec<String> = Vec::new();
    for (name, layer) in layers {
        let stem = unique_file_stem(&name, &used);
        let shp = staging.path().join(format!("{stem}.shp"));
        shapefile::write_layer(&single_proj4(layer)?, &name, &shp)?;
        used.push(stem);
    }
    archive::write_directory(staging.path(), path)
}

/// A shapefile holds one projection; a layer mixing several is brought to
/// the projection of its first row.
fn single_proj4(layer: GeoTable) -> Result<GeoTable> {
    if layer.has_one_proj4() {
        return Ok(layer);
    }
    match layer.proj4s().first().cloned() {
        Some(first) => layer.reproject(&first),
        None => Ok(layer),
    }
}

fn unique_file_stem(layer: &str, used: &[String]) -> String {
    let cleaned: String = layer
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let base = if cleaned.is_empty() {
        "layer".to_string()
    } else {
        cleaned
    };
    let mut stem = base.clone();
    let mut n = 1;
    while used.contains(&stem) {
        stem = format!("{base}_{n}");
        n += 1;
    }
    stem
}

/// Loads `input` and saves it to `output`, returning the number of rows written.
///
/// # Errors
///
/// See [`load`] and [`save`].
pub fn convert(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    load_options: &LoadOptions,
    save_options: &SaveOptions,
) -> Result<usize> {
    let (input, output) = (input.as_ref(), output.as_ref());
    info!("Converting {} to {}", input.display(), output.display());
    let table = load(input, load_options)?;
    save(&table, output, save_options)?;
    Ok(table.len())
}

/// Summarizes the layers, geometry kinds, projections and fields of `path`.
///
/// # Errors
///
/// See [`load`].
pub fn describe(path: impl AsRef<Path>, options: &LoadOptions) -> Result<DatasetInfo> {
    let path = path.as_ref();
    let driver = input_driver(path)?;
    let table = load(path, options)?;

    let mut layers = Vec::new();
    for (name, layer) in table.split_by_layer()? {
        let mut geometry_kinds: Vec<String> = layer
            .geometries()
            .iter()
            .map(|g| g.kind().as_str().to_string())
            .collect();
        geometry_kinds.sort();
        geometry_kinds.dedup();
        layers.push(LayerInfo {
            name,
            row_count: layer.len(),
            geometry_kinds,
            proj4s: layer.proj4_groups().keys().map(|p| (*p).to_string()).collect(),
            bounds: BoundingBox::of(layer.geometries()),
        });
    }
    let fields = table
        .attributes()
        .schema()
        .fields()
        .iter()
        .map(|field| FieldInfo {
            name: field.name().clone(),
            data_type: field.data_type().to_string(),
            nullable: field.is_nullable(),
        })
        .collect();

    Ok(DatasetInfo {
        dataset: path.display().to_string(),
        driver: driver.short_name.to_string(),
        driver_long_name: driver.long_name.to_string(),
        row_count: table.len(),
        layers,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GeoTableError, GeometryError};
    use std::fs;

    fn write(dir: &TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_load_tags_layer_and_default_projection() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "stops.csv", "name,lat,lon\nA,40.7,-74.0\nB,40.8,-73.9\n");
        let table = load(&path, &LoadOptions::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.layer_names(), vec!["stops"]);
        assert!(table.has_standard_proj4());
        let names: Vec<String> = table
            .attributes()
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["name"]);
        assert_eq!(table.geometries()[0], Geometry::point(-74.0, 40.7));
    }

    #[test]
    fn test_reserved_columns_override_per_row() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "mixed.csv",
            "wkt,geometry_layer,geometry_proj4\n\
             POINT (1 2),roads,\n\
             POINT (500000 0),rivers,+proj=utm +zone=31 +datum=WGS84\n",
        );
        let table = load(&path, &LoadOptions::default()).unwrap();
        assert_eq!(table.layers(), &["roads".to_string(), "rivers".to_string()]);
        assert_eq!(table.proj4s()[0], LONGITUDE_LATITUDE_PROJ4);
        assert_eq!(table.proj4s()[1], "+proj=utm +zone=31 +datum=WGS84");
        assert_eq!(table.attributes().num_columns(), 0);

        let selected = load(&path, &LoadOptions::new().with_layers(["rivers"])).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.layers()[0], "rivers");
    }

    #[test]
    fn test_unknown_layer_selects_nothing() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "stops.csv", "wkt\nPOINT (0 0)\n");
        let table = load(&path, &LoadOptions::new().with_layers(["nope"])).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_missing_geometry_columns_fail() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "plain.csv", "name,value\nA,1\n");
        let err = load(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            GeoTableError::Geometry(GeometryError::GeometryColumnsNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_file_and_unknown_extension() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load(dir.path().join("absent.csv"), &LoadOptions::default()).unwrap_err(),
            GeoTableError::Io(IoError::FileNotFound { .. })
        ));
        let path = write(&dir, "data.xyz", "");
        assert!(matches!(
            load(&path, &LoadOptions::default()).unwrap_err(),
            GeoTableError::Format(FormatError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_kmz_rejects_projected_target() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "stops.csv", "wkt\nPOINT (0 0)\n");
        let table = load(&path, &LoadOptions::default()).unwrap();
        let options = SaveOptions::new().with_target_proj4("mercator".parse().unwrap());
        let err = save(&table, dir.path().join("out.kmz"), &options).unwrap_err();
        assert!(matches!(err, GeoTableError::Config(_)));
    }

    #[test]
    fn test_sidecar_is_not_a_save_target() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "stops.csv", "wkt\nPOINT (0 0)\n");
        let table = load(&path, &LoadOptions::default()).unwrap();
        let output = dir.path().join("out.csv");
        let options = SaveOptions::new().with_target_proj4(ProjectionReference::Sidecar);
        let err = save(&table, &output, &options).unwrap_err();
        assert!(matches!(err, GeoTableError::Config(_)));
        assert!(!output.exists());
    }

    #[test]
    fn test_geojson_seq_is_read_only() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "stops.csv", "wkt\nPOINT (0 0)\n");
        let table = load(&path, &LoadOptions::default()).unwrap();
        let err = save(&table, dir.path().join("out.ndjson"), &SaveOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            GeoTableError::Driver(DriverError::OperationNotSupported { .. })
        ));
    }

    #[test]
    fn test_multi_layer_shp_needs_zip() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "mixed.csv",
            "wkt,geometry_layer,name\nPOINT (1 2),a,x\nPOINT (3 4),b,y\n",
        );
        let table = load(&path, &LoadOptions::default()).unwrap();
        let err = save(&table, dir.path().join("out.shp"), &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, GeoTableError::Config(_)));

        let zip = dir.path().join("out.zip");
        save(&table, &zip, &SaveOptions::default()).unwrap();
        let reloaded = load(&zip, &LoadOptions::default()).unwrap();
        assert_eq!(reloaded.layer_names(), vec!["a", "b"]);
        assert_eq!(reloaded.geometries(), table.geometries());
    }

    #[test]
    fn test_unique_file_stem() {
        assert_eq!(unique_file_stem("Parks & Rec", &[]), "Parks___Rec");
        assert_eq!(unique_file_stem("", &[]), "layer");
        assert_eq!(unique_file_stem("a", &["a".to_string()]), "a_1");
    }

    #[test]
    fn test_describe_reports_layers() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "mixed.csv",
            "wkt,geometry_layer,name\nPOINT (1 2),a,x\nLINESTRING (0 0, 1 1),b,y\nPOINT (3 4),a,z\n",
        );
        let info = describe(&path, &LoadOptions::default()).unwrap();
        assert_eq!(info.driver, "CSV");
        assert_eq!(info.row_count, 3);
        assert_eq!(info.layers.len(), 2);
        assert_eq!(info.layers[0].name, "a");
        assert_eq!(info.layers[0].row_count, 2);
        assert_eq!(info.layers[0].geometry_kinds, vec!["Point"]);
        assert_eq!(info.layers[0].bounds, Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(info.fields.len(), 1);
        assert_eq!(info.fields[0].name, "name");
    }
}
