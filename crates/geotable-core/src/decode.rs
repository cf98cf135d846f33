//! Row-to-geometry decoding.
//!
//! Applies a [`DecodingPlan`] to every row of a [`SourceLayer`]. Rows whose
//! geometry cannot be decoded are skipped and counted; the call only fails
//! when a non-empty layer yields no geometry at all. Spatial filters compare
//! against geometries in the layer's own coordinate system.

use arrow_array::Array;
use arrow_array::cast::AsArray;
use arrow_array::types::Float64Type;
use arrow_cast::cast;
use arrow_schema::DataType;
use geo::Intersects;
use log::{debug, warn};

use crate::detect::DecodingPlan;
use crate::error::{GeometryError, Result};
use crate::formats::SourceLayer;
use crate::geometry::{BoundingBox, Geometry};

/// Per-row decoding options.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Strip the z ordinate from every coordinate.
    pub drop_z: bool,
    /// Keep only rows whose geometry intersects this box.
    pub bounding_box: Option<BoundingBox>,
    /// Keep only rows whose geometry intersects this polygon.
    pub bounding_polygon: Option<Geometry>,
}

/// Result of decoding one layer.
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    /// Indices of the surviving source rows, in source order.
    pub rows: Vec<usize>,
    /// Geometry of each surviving row, parallel to `rows`.
    pub geometries: Vec<Geometry>,
    /// Rows dropped because their geometry was missing or malformed.
    pub skipped: usize,
    /// Rows dropped by the spatial filters.
    pub filtered: usize,
}

/// Decodes every row of `layer` according to `plan`.
///
/// # Errors
///
/// Fails with [`GeometryError::NoValidGeometry`] when the layer has rows but
/// none of them decodes, and with an Arrow error when a geometry column cannot
/// be read as text or numbers.
pub fn decode(layer: &SourceLayer, plan: &DecodingPlan, options: &DecodeOptions) -> Result<Decoded> {
    let raw = raw_geometries(layer, plan)?;
    let total = raw.len();

    let bounding_rect = options.bounding_box.map(|b| b.to_rect());
    let bounding_polygon = options.bounding_polygon.as_ref().map(Geometry::to_geo);

    let mut decoded = Decoded::default();
    for (row, geometry) in raw.into_iter().enumerate() {
        let Some(geometry) = geometry else {
            decoded.skipped += 1;
            continue;
        };
        let geometry = if options.drop_z {
            geometry.without_z()
        } else {
            geometry
        };
        if bounding_rect.is_some() || bounding_polygon.is_some() {
            let planar = geometry.to_geo();
            let keep = bounding_rect.is_none_or(|rect| planar.intersects(&rect))
                && bounding_polygon
                    .as_ref()
                    .is_none_or(|polygon| planar.intersects(polygon));
            if !keep {
                decoded.filtered += 1;
                continue;
            }
        }
        decoded.rows.push(row);
        decoded.geometries.push(geometry);
    }

    if decoded.skipped > 0 {
        if decoded.skipped == total {
            return Err(GeometryError::NoValidGeometry {
                source_name: layer.name.clone(),
                skipped: decoded.skipped,
            }
            .into());
        }
        warn!(
            "Skipped {} of {total} rows with missing or malformed geometry in '{}'",
            decoded.skipped, layer.name
        );
    }
    debug!(
        "Decoded {} rows of '{}' ({}, {} filtered out)",
        decoded.rows.len(),
        layer.name,
        plan.encoding(),
        decoded.filtered
    );
    Ok(decoded)
}

/// Produces one optional geometry per source row.
fn raw_geometries(layer: &SourceLayer, plan: &DecodingPlan) -> Result<Vec<Option<Geometry>>> {
    let batch = &layer.attributes;
    match plan {
        DecodingPlan::WellKnownText { column, swap_xy } => {
            let Some(values) = batch.column_by_name(column) else {
                return Ok(vec![None; batch.num_rows()]);
            };
            let text = cast(values, &DataType::Utf8)?;
            let text = text.as_string::<i32>();
            Ok((0..text.len())
                .map(|i| {
                    if text.is_null(i) {
                        return None;
                    }
                    match Geometry::from_wkt(text.value(i)) {
                        Ok(geometry) if *swap_xy => Some(geometry.swap_xy()),
                        Ok(geometry) => Some(geometry),
                        Err(err) => {
                            debug!("Row {i} of '{}': {err}", layer.name);
                            None
                        },
                    }
                })
                .collect())
        },
        DecodingPlan::LatLonPair {
            latitude,
            longitude,
        } => {
            let (Some(latitudes), Some(longitudes)) =
                (batch.column_by_name(latitude), batch.column_by_name(longitude))
            else {
                return Ok(vec![None; batch.num_rows()]);
            };
            let latitudes = cast(latitudes, &DataType::Float64)?;
            let longitudes = cast(longitudes, &DataType::Float64)?;
            let latitudes = latitudes.as_primitive::<Float64Type>();
            let longitudes = longitudes.as_primitive::<Float64Type>();
            Ok((0..batch.num_rows())
                .map(|i| {
                    if latitudes.is_null(i) || longitudes.is_null(i) {
                        return None;
                    }
                    let (y, x) = (latitudes.value(i), longitudes.value(i));
                    (x.is_finite() && y.is_finite()).then(|| Geometry::point(x, y))
                })
                .collect())
        },
        DecodingPlan::Native { .. } => Ok(layer
            .native_geometries
            .clone()
            .unwrap_or_else(|| vec![None; batch.num_rows()])),
    }
}
