//! `GeoJSON` and newline-delimited `GeoJSON` sequences.

use std::fs;
use std::path::Path;

use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue, Value};
use log::debug;

use crate::detect::{GEOMETRY_LAYER_COLUMN, GEOMETRY_PROJ4_COLUMN};
use crate::error::{FormatError, IoErrorExt, Result};
use crate::formats::attributes::{Properties, batch_to_properties, properties_to_batch};
use crate::formats::{SourceLayer, declared_proj4, layer_name};
use crate::geometry::{Coordinate, Geometry};
use crate::table::GeoTable;

/// Parsed feature: properties and an optional geometry.
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub properties: JsonObject,
    /// `None` when the feature has no geometry or one geotable cannot hold.
    pub geometry: Option<Geometry>,
}

/// Reads a `GeoJSON` document or sequence as one layer.
///
/// # Errors
///
/// Fails when the file cannot be read or is neither a `GeoJSON` document nor a
/// sequence of them.
pub fn read(path: &Path) -> Result<SourceLayer> {
    let bytes = fs::read(path).with_read_context("GeoJSON", path)?;
    let (records, crs) = parse_geojson_bytes(&bytes)?;
    debug!("Parsed {} features from {}", records.len(), path.display());

    let properties: Vec<Properties> = records.iter().map(|r| r.properties.clone()).collect();
    let geometries = records.into_iter().map(|r| r.geometry).collect();
    Ok(SourceLayer::new(layer_name(path), properties_to_batch(&properties)?)
        .with_native_geometries(geometries)
        .with_native_proj4(declared_proj4(path, crs)?))
}

/// Parses raw bytes into feature records, plus the legacy `crs` member of a
/// feature collection when it names an EPSG code.
///
/// # Errors
///
/// Returns [`FormatError::Parse`] when neither parse succeeds.
pub fn parse_geojson_bytes(bytes: &[u8]) -> Result<(Vec<FeatureRecord>, Option<String>)> {
    match GeoJson::from_reader(bytes) {
        Ok(geojson) => {
            let crs = match &geojson {
                GeoJson::FeatureCollection(collection) => collection
                    .foreign_members
                    .as_ref()
                    .and_then(|members| members.get("crs"))
                    .and_then(crs_name),
                _ => None,
            };
            Ok((geojson_to_records(geojson), crs))
        },
        Err(primary_err) => {
            let primary_err = primary_err.to_string();
            parse_geojson_sequence(bytes)
                .map(|records| (records, None))
                .map_err(|sequence_err| {
                    FormatError::Parse {
                        format: "GeoJSON".to_string(),
                        message: format!(
                            "not a GeoJSON document ({primary_err}); also not a GeoJSON sequence: {sequence_err}"
                        ),
                    }
                    .into()
                })
        },
    }
}

fn geojson_to_records(geojson: GeoJson) -> Vec<FeatureRecord> {
    match geojson {
        GeoJson::FeatureCollection(collection) => {
            collection.features.into_iter().map(feature_to_record).collect()
        },
        GeoJson::Feature(feature) => vec![feature_to_record(feature)],
        GeoJson::Geometry(geometry) => vec![FeatureRecord {
            properties: JsonObject::new(),
            geometry: from_geojson_value(&geometry.value),
        }],
    }
}

fn feature_to_record(feature: Feature) -> FeatureRecord {
    FeatureRecord {
        geometry: feature.geometry.as_ref().and_then(|g| from_geojson_value(&g.value)),
        properties: feature.properties.unwrap_or_default(),
    }
}

fn parse_geojson_sequence(bytes: &[u8]) -> std::result::Result<Vec<FeatureRecord>, String> {
    let mut records = Vec::new();
    for (line_idx, raw_line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line_number = line_idx + 1;
        let line = std::str::from_utf8(raw_line)
            .map_err(|err| format!("line {line_number} is not valid UTF-8: {err}"))?
            .trim()
            // RFC 8142 record separator
            .trim_start_matches('\u{1e}');
        if line.is_empty() {
            continue;
        }
        let geojson = line
            .parse::<GeoJson>()
            .map_err(|err| format!("line {line_number}: {err}"))?;
        records.extend(geojson_to_records(geojson));
    }
    if records.is_empty() {
        return Err("no GeoJSON features found".to_string());
    }
    Ok(records)
}

/// Reads `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}}`.
fn crs_name(crs: &JsonValue) -> Option<String> {
    let name = crs.get("properties")?.get("name")?.as_str()?;
    let code = name
        .strip_prefix("urn:ogc:def:crs:EPSG::")
        .or_else(|| name.strip_prefix("EPSG:"))?;
    // EPSG:4326 and CRS84 both mean the longitude/latitude default.
    (code != "4326").then(|| format!("EPSG:{code}"))
}

/// Converts a `GeoJSON` geometry value, keeping a third ordinate when present.
/// Geometry collections and degenerate positions yield `None`.
#[must_use]
pub fn from_geojson_value(value: &Value) -> Option<Geometry> {
    let line = |positions: &[Vec<f64>]| -> Option<Vec<Coordinate>> {
        positions.iter().map(|p| Coordinate::from_slice(p)).collect()
    };
    let rings = |rings: &[Vec<Vec<f64>>]| -> Option<Vec<Vec<Coordinate>>> {
        rings.iter().map(|r| line(r)).collect()
    };
    let geometry = match value {
        Value::Point(position) => Geometry::Point(Coordinate::from_slice(position)?),
        Value::MultiPoint(positions) => Geometry::MultiPoint(line(positions)?),
        Value::LineString(positions) => Geometry::LineString(line(positions)?),
        Value::MultiLineString(lines) => Geometry::MultiLineString(rings(lines)?),
        Value::Polygon(polygon) => Geometry::Polygon(rings(polygon)?),
        Value::MultiPolygon(polygons) => Geometry::MultiPolygon(
            polygons.iter().map(|p| rings(p)).collect::<Option<_>>()?,
        ),
        Value::GeometryCollection(_) => return None,
    };
    (geometry.coordinate_count() > 0).then_some(geometry)
}

#[must_use]
pub fn to_geojson_value(geometry: &Geometry) -> Value {
    let line = |cs: &[Coordinate]| -> Vec<Vec<f64>> { cs.iter().map(Coordinate::to_vec).collect() };
    let rings = |rs: &[Vec<Coordinate>]| -> Vec<Vec<Vec<f64>>> { rs.iter().map(|r| line(r)).collect() };
    match geometry {
        Geometry::Point(c) => Value::Point(c.to_vec()),
        Geometry::MultiPoint(cs) => Value::MultiPoint(line(cs)),
        Geometry::LineString(cs) => Value::LineString(line(cs)),
        Geometry::MultiLineString(parts) => Value::MultiLineString(rings(parts)),
        Geometry::Polygon(polygon) => Value::Polygon(rings(polygon)),
        Geometry::MultiPolygon(polygons) => {
            Value::MultiPolygon(polygons.iter().map(|p| rings(p)).collect())
        },
    }
}

/// Builds the feature collection written for `table`.
///
/// # Errors
///
/// Returns an Arrow error when attributes cannot be rendered as JSON.
pub fn to_feature_collection(table: &GeoTable) -> Result<FeatureCollection> {
    let with_layer = !table.has_one_layer();
    let with_proj4 = !table.has_standard_proj4();
    let features = batch_to_properties(table.attributes())?
        .into_iter()
        .enumerate()
        .map(|(i, mut properties)| {
            if with_layer {
                properties.insert(
                    GEOMETRY_LAYER_COLUMN.to_string(),
                    JsonValue::String(table.layers()[i].clone()),
                );
            }
            if with_proj4 {
                properties.insert(
                    GEOMETRY_PROJ4_COLUMN.to_string(),
                    JsonValue::String(table.proj4s()[i].clone()),
                );
            }
            Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(to_geojson_value(&table.geometries()[i]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

/// Writes a table as a `GeoJSON` feature collection.
///
/// # Errors
///
/// Fails when the file cannot be written.
pub fn write(table: &GeoTable, path: &Path) -> Result<()> {
    let collection = to_feature_collection(table)?;
    fs::write(path, collection.to_string()).with_write_context("GeoJSON", path)?;
    debug!("Wrote {} features to {}", table.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_feature_collection() {
        let data = br#"{
  "type": "FeatureCollection",
  "features": [
    {"type":"Feature","geometry":{"type":"Point","coordinates":[1.0,2.0,3.0]},"properties":{"name":"A"}},
    {"type":"Feature","geometry":null,"properties":{"value":42}}
  ]
}"#;

        let (records, crs) = parse_geojson_bytes(data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].geometry, Some(Geometry::Point(Coordinate::xyz(1.0, 2.0, 3.0))));
        assert_eq!(records[0].properties.get("name").unwrap(), "A");
        assert!(records[1].geometry.is_none());
        assert!(crs.is_none());
    }

    #[test]
    fn parse_collection_crs() {
        let data = br#"{"type":"FeatureCollection",
  "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::3857"}},
  "features":[]}"#;
        let (_, crs) = parse_geojson_bytes(data).unwrap();
        assert_eq!(crs.as_deref(), Some("EPSG:3857"));
    }

    #[test]
    fn parse_single_geometry() {
        let data = br#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}"#;
        let (records, _) = parse_geojson_bytes(data).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].geometry.as_ref().unwrap().coordinate_count(), 4);
    }

    #[test]
    fn parse_sequence() {
        let data = br#"{"type":"Feature","geometry":{"type":"Point","coordinates":[0,0]},"properties":{"id":1}}

{"type":"Feature","geometry":{"type":"Point","coordinates":[1,1]},"properties":{"id":2}}
"#;
        let (records, _) = parse_geojson_bytes(data).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn parse_invalid_json_combines_errors() {
        let err = parse_geojson_bytes(b"not valid json at all").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("not a GeoJSON document"));
        assert!(message.contains("also not a GeoJSON sequence"));
    }

    #[test]
    fn test_read_and_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("roads.geojson");
        fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
  {"type":"Feature","geometry":{"type":"LineString","coordinates":[[0,0,1],[1,1,2]]},"properties":{"name":"Main"}}
]}"#,
        )
        .unwrap();

        let layer = read(&path).unwrap();
        assert_eq!(layer.name, "roads");
        assert_eq!(layer.column_names(), vec!["name", "geometry_object"]);
        let geometry = layer.native_geometries.as_ref().unwrap()[0].clone().unwrap();
        assert!(geometry.has_z());

        let table = GeoTable::new(
            layer.attributes.clone(),
            vec![geometry],
            vec!["roads".to_string()],
            vec![crate::projection::LONGITUDE_LATITUDE_PROJ4.to_string()],
        )
        .unwrap();
        let out = dir.path().join("out.geojson");
        write(&table, &out).unwrap();
        let (records, _) = parse_geojson_bytes(&fs::read(&out).unwrap()).unwrap();
        assert_eq!(records[0].properties.get("name").unwrap(), "Main");
        assert!(records[0].properties.get("geometry_layer").is_none());
        assert_eq!(records[0].geometry, table.geometries().first().cloned());
    }
}
