//! ESRI shapefiles: `.shp` geometry, `.dbf` attributes, and an optional `.prj`
//! or `.proj4` CRS. One shapefile is one layer.

use std::fs;
use std::path::Path;

use arrow_schema::DataType;
use log::{debug, warn};
use serde_json::Value;
use shapefile::dbase::{self, FieldName, FieldValue, TableWriterBuilder};
use shapefile::record::EsriShape;
use shapefile::{
    Multipoint, MultipointZ, NO_DATA, Point, PointM, PointZ, Polygon, PolygonRing,
    PolygonZ, Polyline, PolylineZ, Shape,
};

use crate::error::{ConfigError, FormatError, GeometryError, IoErrorExt, Result};
use crate::formats::attributes::{Properties, batch_to_properties, empty_batch, properties_to_batch, value_to_text};
use crate::formats::{SourceLayer, declared_proj4, layer_name};
use crate::geometry::{Coordinate, Geometry, GeometryKind};
use crate::projection::sidecar_path;
use crate::table::GeoTable;

/// Longest field name a `.dbf` header can hold.
const DBF_FIELD_NAME_LENGTH: usize = 10;
/// Longest character field a `.dbf` can hold.
const DBF_CHARACTER_LENGTH: usize = 254;

/// Reads one shapefile as a layer named after the file stem.
///
/// # Errors
///
/// Fails when the `.shp` or `.dbf` cannot be read, or when they disagree on
/// the number of records.
pub fn read(path: &Path) -> Result<SourceLayer> {
    let shapes = shapefile::read_shapes(path).with_read_context("Shapefile", path)?;
    let geometries: Vec<Option<Geometry>> = shapes.iter().map(from_shape).collect();

    let dbf_path = path.with_extension("dbf");
    let attributes = if dbf_path.is_file() {
        let rows = read_dbf(&dbf_path)?;
        if rows.len() != shapes.len() {
            return Err(FormatError::Parse {
                format: "Shapefile".to_string(),
                message: format!(
                    "{} has {} shapes but {} has {} records",
                    path.display(),
                    shapes.len(),
                    dbf_path.display(),
                    rows.len()
                ),
            }
            .into());
        }
        properties_to_batch(&rows)?
    } else {
        empty_batch(shapes.len())?
    };

    let prj_path = path.with_extension("prj");
    let embedded = if prj_path.is_file() {
        Some(fs::read_to_string(&prj_path).with_read_context("PRJ", &prj_path)?)
    } else {
        None
    };
    debug!("Read {} shapes from {}", shapes.len(), path.display());
    Ok(SourceLayer::new(layer_name(path), attributes)
        .with_native_geometries(geometries)
        .with_native_proj4(declared_proj4(path, embedded)?))
}

fn read_dbf(path: &Path) -> Result<Vec<Properties>> {
    let mut reader = dbase::Reader::from_path(path).with_read_context("DBF", path)?;
    let names: Vec<String> = reader
        .fields()
        .iter()
        .map(|field| field.name().to_string())
        .collect();
    let records = reader.read().with_read_context("DBF", path)?;
    Ok(records
        .iter()
        .map(|record| {
            names
                .iter()
                .map(|name| {
                    let value = record.get(name).map_or(Value::Null, field_to_json);
                    (name.clone(), value)
                })
                .collect()
        })
        .collect())
}

fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Character(text) => text
            .as_ref()
            .map_or(Value::Null, |t| Value::String(t.trim_end().to_string())),
        FieldValue::Memo(text) => Value::String(text.clone()),
        FieldValue::Numeric(number) => number.map_or(Value::Null, Value::from),
        FieldValue::Float(number) => number.map_or(Value::Null, |n| Value::from(f64::from(n))),
        FieldValue::Double(number) | FieldValue::Currency(number) => Value::from(*number),
        FieldValue::Integer(number) => Value::from(*number),
        FieldValue::Logical(flag) => flag.map_or(Value::Null, Value::Bool),
        FieldValue::Date(date) => date.as_ref().map_or(Value::Null, |d| {
            Value::String(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }),
        other => Value::String(format!("{other:?}")),
    }
}

/// Access to the x/y/z of the three shapefile point flavours.
trait ShapePoint {
    fn coordinate(&self) -> Coordinate;
}

impl ShapePoint for Point {
    fn coordinate(&self) -> Coordinate {
        Coordinate::xy(self.x, self.y)
    }
}

impl ShapePoint for PointM {
    fn coordinate(&self) -> Coordinate {
        Coordinate::xy(self.x, self.y)
    }
}

impl ShapePoint for PointZ {
    fn coordinate(&self) -> Coordinate {
        Coordinate::xyz(self.x, self.y, self.z)
    }
}

fn coordinates<P: ShapePoint>(points: &[P]) -> Vec<Coordinate> {
    points.iter().map(ShapePoint::coordinate).collect()
}

fn from_parts<P: ShapePoint>(parts: &[Vec<P>]) -> Option<Geometry> {
    match parts {
        [] => None,
        [line] => Some(Geometry::LineString(coordinates(line))),
        _ => Some(Geometry::MultiLineString(
            parts.iter().map(|p| coordinates(p)).collect(),
        )),
    }
}

/// Outer rings start a polygon; inner rings are holes of the latest one.
fn from_rings<P: ShapePoint>(rings: &[PolygonRing<P>]) -> Option<Geometry> {
    let mut polygons: Vec<Vec<Vec<Coordinate>>> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => polygons.push(vec![coordinates(points)]),
            PolygonRing::Inner(points) => match polygons.last_mut() {
                Some(polygon) => polygon.push(coordinates(points)),
                None => polygons.push(vec![coordinates(points)]),
            },
        }
    }
    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(polygons)),
    }
}

fn from_shape(shape: &Shape) -> Option<Geometry> {
    match shape {
        Shape::NullShape | Shape::Multipatch(_) => None,
        Shape::Point(p) => Some(Geometry::Point(p.coordinate())),
        Shape::PointM(p) => Some(Geometry::Point(p.coordinate())),
        Shape::PointZ(p) => Some(Geometry::Point(p.coordinate())),
        Shape::Multipoint(mp) => Some(Geometry::MultiPoint(coordinates(mp.points()))),
        Shape::MultipointM(mp) => Some(Geometry::MultiPoint(coordinates(mp.points()))),
        Shape::MultipointZ(mp) => Some(Geometry::MultiPoint(coordinates(mp.points()))),
        Shape::Polyline(line) => from_parts(line.parts()),
        Shape::PolylineM(line) => from_parts(line.parts()),
        Shape::PolylineZ(line) => from_parts(line.parts()),
        Shape::Polygon(polygon) => from_rings(polygon.rings()),
        Shape::PolygonM(polygon) => from_rings(polygon.rings()),
        Shape::PolygonZ(polygon) => from_rings(polygon.rings()),
    }
}

/// The geometry family shared by every geometry of a layer.
///
/// # Errors
///
/// Fails with [`GeometryError::MixedGeometryKinds`] when families differ.
pub fn layer_family(layer: &str, geometries: &[Geometry]) -> Result<Option<GeometryKind>> {
    let mut families: Vec<GeometryKind> = geometries.iter().map(|g| g.kind().family()).collect();
    families.sort_unstable();
    families.dedup();
    match families[..] {
        [] => Ok(None),
        [family] => Ok(Some(family)),
        _ => Err(GeometryError::MixedGeometryKinds {
            layer: layer.to_string(),
            kinds: families
                .iter()
                .map(GeometryKind::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        }
        .into()),
    }
}

/// Writes one layer to `path` (`.shp`, with `.shx`, `.dbf` and a `.proj4`
/// sidecar next to it).
///
/// # Errors
///
/// Fails for layers mixing geometry families, lines with fewer than two
/// vertices, or any write failure.
pub fn write_layer(table: &GeoTable, layer: &str, path: &Path) -> Result<()> {
    let family = layer_family(layer, table.geometries())?;
    let (builder, fields) = table_builder(table)?;
    let records = batch_to_properties(table.attributes())?
        .iter()
        .map(|properties| to_record(properties, &fields))
        .collect::<Vec<_>>();
    let geometries = table.geometries();
    let has_z = geometries.iter().any(Geometry::has_z);

    let point = |c: &Coordinate| Point::new(c.x, c.y);
    let point_z = |c: &Coordinate| PointZ::new(c.x, c.y, c.z.unwrap_or(0.0), NO_DATA);
    let only_points = geometries.iter().all(|g| matches!(g, Geometry::Point(_)));

    match (family, has_z) {
        (None | Some(GeometryKind::Point), false) if only_points => {
            let shapes = geometries.iter().filter_map(|g| match g {
                Geometry::Point(c) => Some(point(c)),
                _ => None,
            });
            write_shapes(path, builder, shapes.collect(), &records)?;
        },
        (None | Some(GeometryKind::Point), true) if only_points => {
            let shapes = geometries.iter().filter_map(|g| match g {
                Geometry::Point(c) => Some(point_z(c)),
                _ => None,
            });
            write_shapes(path, builder, shapes.collect(), &records)?;
        },
        (None | Some(GeometryKind::Point), false) => {
            let shapes = geometries
                .iter()
                .map(|g| Multipoint::new(g.coordinates().map(point).collect()));
            write_shapes(path, builder, shapes.collect(), &records)?;
        },
        (None | Some(GeometryKind::Point), true) => {
            let shapes = geometries
                .iter()
                .map(|g| MultipointZ::new(g.coordinates().map(point_z).collect()));
            write_shapes(path, builder, shapes.collect(), &records)?;
        },
        (Some(GeometryKind::LineString), false) => {
            let shapes = line_parts(layer, geometries, point)?;
            write_shapes(path, builder, shapes.into_iter().map(Polyline::with_parts).collect(), &records)?;
        },
        (Some(GeometryKind::LineString), true) => {
            let shapes = line_parts(layer, geometries, point_z)?;
            write_shapes(path, builder, shapes.into_iter().map(PolylineZ::with_parts).collect(), &records)?;
        },
        (Some(_), false) => {
            let shapes = polygon_rings(geometries, point);
            write_shapes(path, builder, shapes.into_iter().map(Polygon::with_rings).collect(), &records)?;
        },
        (Some(_), true) => {
            let shapes = polygon_rings(geometries, point_z);
            write_shapes(path, builder, shapes.into_iter().map(PolygonZ::with_rings).collect(), &records)?;
        },
    }

    if let Some(proj4) = table.proj4s().first() {
        let sidecar = sidecar_path(path);
        fs::write(&sidecar, proj4).with_write_context("proj4", &sidecar)?;
    }
    debug!("Wrote {} shapes to {}", table.len(), path.display());
    Ok(())
}

fn write_shapes<S: EsriShape>(
    path: &Path,
    builder: TableWriterBuilder,
    shapes: Vec<S>,
    records: &[dbase::Record],
) -> Result<()> {
    let mut writer = shapefile::Writer::from_path(path, builder).with_write_context("Shapefile", path)?;
    for (shape, record) in shapes.iter().zip(records) {
        writer
            .write_shape_and_record(shape, record)
            .with_write_context("Shapefile", path)?;
    }
    Ok(())
}

fn line_parts<P>(
    layer: &str,
    geometries: &[Geometry],
    point: impl Fn(&Coordinate) -> P,
) -> Result<Vec<Vec<Vec<P>>>> {
    geometries
        .iter()
        .map(|g| {
            let parts: Vec<&Vec<Coordinate>> = match g {
                Geometry::LineString(line) => vec![line],
                Geometry::MultiLineString(lines) => lines.iter().collect(),
                _ => vec![],
            };
            if parts.iter().any(|part| part.len() < 2) {
                return Err(FormatError::Parse {
                    format: "Shapefile".to_string(),
                    message: format!("layer '{layer}' has a line with fewer than two vertices"),
                }
                .into());
            }
            Ok(parts
                .into_iter()
                .map(|part| part.iter().map(&point).collect())
                .collect())
        })
        .collect()
}

fn polygon_rings<P>(geometries: &[Geometry], point: impl Fn(&Coordinate) -> P) -> Vec<Vec<PolygonRing<P>>> {
    let polygon = |rings: &[Vec<Coordinate>]| -> Vec<PolygonRing<P>> {
        rings
            .iter()
            .enumerate()
            .map(|(i, ring)| {
                let points = ring.iter().map(&point).collect();
                if i == 0 {
                    PolygonRing::Outer(points)
                } else {
                    PolygonRing::Inner(points)
                }
            })
            .collect()
    };
    geometries
        .iter()
        .map(|g| match g {
            Geometry::Polygon(rings) => polygon(rings),
            Geometry::MultiPolygon(polygons) => polygons.iter().flat_map(|p| polygon(p)).collect(),
            _ => vec![],
        })
        .collect()
}

/// A `.dbf` column: the attribute it comes from and how it is stored.
struct DbfField {
    column: String,
    name: String,
    kind: DbfKind,
}

#[derive(Clone, Copy)]
enum DbfKind {
    Character,
    Numeric,
    Logical,
}

fn table_builder(table: &GeoTable) -> Result<(TableWriterBuilder, Vec<DbfField>)> {
    let attributes = table.attributes();
    let rows = batch_to_properties(attributes)?;
    let mut builder = TableWriterBuilder::new();
    let mut fields: Vec<DbfField> = Vec::new();

    for field in attributes.schema().fields() {
        let column = field.name().clone();
        let name = dbf_name(&column, &fields);
        if name != column {
            warn!("Field '{column}' is stored as '{name}' in the .dbf");
        }
        let field_name = FieldName::try_from(name.as_str()).map_err(|e| ConfigError::InvalidOption {
            option: "field name".to_string(),
            message: format!("'{name}': {e:?}"),
        })?;
        let kind = match field.data_type() {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => {
                builder = builder.add_numeric_field(field_name, 20, 0);
                DbfKind::Numeric
            },
            DataType::Float16 | DataType::Float32 | DataType::Float64 => {
                builder = builder.add_numeric_field(field_name, 20, 10);
                DbfKind::Numeric
            },
            DataType::Boolean => {
                builder = builder.add_logical_field(field_name);
                DbfKind::Logical
            },
            _ => {
                let longest = rows
                    .iter()
                    .filter_map(|row| row.get(&column).and_then(value_to_text))
                    .map(|text| text.len())
                    .max()
                    .unwrap_or(1);
                #[allow(clippy::cast_possible_truncation)]
                let length = longest.clamp(1, DBF_CHARACTER_LENGTH) as u8;
                builder = builder.add_character_field(field_name, length);
                DbfKind::Character
            },
        };
        fields.push(DbfField { column, name, kind });
    }
    Ok((builder, fields))
}

/// Truncates a column name to fit a `.dbf` header, keeping names unique.
fn dbf_name(column: &str, taken: &[DbfField]) -> String {
    let base: String = column.chars().take(DBF_FIELD_NAME_LENGTH).collect();
    let is_free = |candidate: &str| !taken.iter().any(|f| f.name == candidate);
    if is_free(&base) {
        return base;
    }
    (1..)
        .map(|n| {
            let suffix = n.to_string();
            let keep = DBF_FIELD_NAME_LENGTH.saturating_sub(suffix.len());
            format!("{}{suffix}", column.chars().take(keep).collect::<String>())
        })
        .find(|candidate| is_free(candidate))
        .unwrap_or(base)
}

fn to_record(properties: &Properties, fields: &[DbfField]) -> dbase::Record {
    let mut record = dbase::Record::default();
    for field in fields {
        let value = properties.get(&field.column).unwrap_or(&Value::Null);
        let stored = match field.kind {
            DbfKind::Numeric => FieldValue::Numeric(value.as_f64()),
            DbfKind::Logical => FieldValue::Logical(value.as_bool()),
            DbfKind::Character => FieldValue::Character(value_to_text(value).map(|text| {
                let mut end = text.len().min(DBF_CHARACTER_LENGTH);
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text[..end].to_string()
            })),
        };
        record.insert(field.name.clone(), stored);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::attributes::properties_to_batch;
    use crate::projection::LONGITUDE_LATITUDE_PROJ4;
    use serde_json::json;
    use tempfile::TempDir;

    fn layer_table(geometries: Vec<Geometry>, properties: Vec<Value>) -> GeoTable {
        let rows: Vec<Properties> = properties
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        let n = geometries.len();
        GeoTable::new(
            properties_to_batch(&rows).unwrap(),
            geometries,
            vec!["parcels".to_string(); n],
            vec![LONGITUDE_LATITUDE_PROJ4.to_string(); n],
        )
        .unwrap()
    }

    #[test]
    fn test_write_then_read_polygons() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parcels.shp");
        let table = layer_table(
            vec![
                Geometry::from_wkt("POLYGON ((0 0, 0 10, 10 10, 10 0, 0 0), (2 2, 3 2, 3 3, 2 3, 2 2))")
                    .unwrap(),
                Geometry::from_wkt("MULTIPOLYGON (((20 20, 20 21, 21 21, 20 20)), ((30 30, 30 31, 31 31, 30 30)))")
                    .unwrap(),
            ],
            vec![json!({"name": "a", "area": 1.5}), json!({"name": "b", "area": 2})],
        );
        write_layer(&table, "parcels", &path).unwrap();
        assert!(path.with_extension("proj4").is_file());

        let layer = read(&path).unwrap();
        assert_eq!(layer.name, "parcels");
        assert_eq!(layer.native_proj4.as_deref(), Some(LONGITUDE_LATITUDE_PROJ4));
        let geometries = layer.native_geometries.unwrap();
        assert_eq!(geometries.len(), 2);
        let first = geometries[0].clone().unwrap();
        assert_eq!(first.kind(), GeometryKind::Polygon);
        assert_eq!(first.coordinate_count(), 10);
        assert_eq!(geometries[1].as_ref().unwrap().kind(), GeometryKind::MultiPolygon);

        let rows = batch_to_properties(&layer.attributes).unwrap();
        assert_eq!(rows[0]["name"], json!("a"));
        assert_eq!(rows[1]["area"].as_f64(), Some(2.0));
    }

    #[test]
    fn test_write_points_with_z() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wells.shp");
        let table = layer_table(
            vec![Geometry::Point(Coordinate::xyz(1.0, 2.0, 3.0))],
            vec![json!({"depth": 12})],
        );
        write_layer(&table, "wells", &path).unwrap();
        let layer = read(&path).unwrap();
        assert_eq!(
            layer.native_geometries.unwrap()[0],
            Some(Geometry::Point(Coordinate::xyz(1.0, 2.0, 3.0)))
        );
    }

    #[test]
    fn test_mixed_kinds_fail() {
        let dir = TempDir::new().unwrap();
        let table = layer_table(
            vec![
                Geometry::point(0.0, 0.0),
                Geometry::from_wkt("LINESTRING (0 0, 1 1)").unwrap(),
            ],
            vec![json!({}), json!({})],
        );
        let err = write_layer(&table, "mixed", &dir.path().join("mixed.shp")).unwrap_err();
        assert!(err.to_string().contains("mixes geometry kinds (Point, LineString)"));
    }

    #[test]
    fn test_dbf_names_are_truncated_and_unique() {
        let fields = vec![DbfField {
            column: "population_2020".to_string(),
            name: "population".to_string(),
            kind: DbfKind::Numeric,
        }];
        assert_eq!(dbf_name("id", &fields), "id");
        assert_eq!(dbf_name("population_2021", &fields), "populatio1");
    }
}
