//! The geotable: attribute rows paired with a geometry, a layer name and a
//! projection descriptor.
//!
//! Attributes live in an Arrow [`RecordBatch`]; the three reserved columns
//! (`geometry_object`, `geometry_layer`, `geometry_proj4`) are kept as
//! parallel vectors of the same length. Every operation that changes rows or
//! coordinates returns a new table.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow_array::{ArrayRef, BooleanArray, RecordBatch, RecordBatchOptions, UInt64Array, new_null_array};
use arrow_cast::cast;
use arrow_schema::{ArrowError, DataType, Field, Schema};
use arrow_select::concat::concat_batches;
use arrow_select::filter::filter_record_batch;
use arrow_select::take::take_record_batch;
use geo::Centroid;
use geo_types::GeometryCollection;
use log::debug;

use crate::error::{ProjectionError, Result};
use crate::formats::attributes::{Properties, batch_to_properties, empty_batch};
use crate::geometry::Geometry;
use crate::projection::{LONGITUDE_LATITUDE_PROJ4, normalize_proj4, resolve_utm};
use crate::transform::reproject_grouped;

/// One row of a [`GeoTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRow<'a> {
    /// The caller's attribute values, by column name.
    pub properties: Properties,
    pub geometry: &'a Geometry,
    pub layer: &'a str,
    pub proj4: &'a str,
}

#[derive(Debug, Clone)]
pub struct GeoTable {
    attributes: RecordBatch,
    geometries: Vec<Geometry>,
    layers: Vec<String>,
    proj4s: Vec<String>,
}

impl GeoTable {
    /// Assembles a table from its parts.
    ///
    /// # Errors
    ///
    /// Fails when the parts disagree on the number of rows.
    pub fn new(
        attributes: RecordBatch,
        geometries: Vec<Geometry>,
        layers: Vec<String>,
        proj4s: Vec<String>,
    ) -> Result<Self> {
        let rows = geometries.len();
        if attributes.num_rows() != rows || layers.len() != rows || proj4s.len() != rows {
            return Err(ArrowError::InvalidArgumentError(format!(
                "geotable parts disagree on row count (attributes={}, geometries={rows}, layers={}, proj4s={})",
                attributes.num_rows(),
                layers.len(),
                proj4s.len()
            ))
            .into());
        }
        Ok(Self {
            attributes,
            geometries,
            layers,
            proj4s,
        })
    }

    /// A table with no rows and no attribute columns.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the Arrow constructor is fallible.
    pub fn empty() -> Result<Self> {
        Self::new(empty_batch(0)?, vec![], vec![], vec![])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    #[must_use]
    pub fn attributes(&self) -> &RecordBatch {
        &self.attributes
    }

    #[must_use]
    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    #[must_use]
    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    #[must_use]
    pub fn proj4s(&self) -> &[String] {
        &self.proj4s
    }

    /// Returns row `index`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error when the attributes cannot be rendered as JSON.
    pub fn row(&self, index: usize) -> Result<Option<GeoRow<'_>>> {
        if index >= self.len() {
            return Ok(None);
        }
        let slice = self.attributes.slice(index, 1);
        let properties = batch_to_properties(&slice)?
            .into_iter()
            .next()
            .unwrap_or_default();
        Ok(Some(GeoRow {
            properties,
            geometry: &self.geometries[index],
            layer: &self.layers[index],
            proj4: &self.proj4s[index],
        }))
    }

    /// Returns every row in order.
    ///
    /// # Errors
    ///
    /// See [`GeoTable::row`].
    pub fn rows(&self) -> Result<Vec<GeoRow<'_>>> {
        let properties = batch_to_properties(&self.attributes)?;
        Ok(properties
            .into_iter()
            .enumerate()
            .map(|(i, properties)| GeoRow {
                properties,
                geometry: &self.geometries[i],
                layer: &self.layers[i],
                proj4: &self.proj4s[i],
            })
            .collect())
    }

    /// Distinct layer names in first-appearance order.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for layer in &self.layers {
            if !names.contains(&layer.as_str()) {
                names.push(layer);
            }
        }
        names
    }

    /// Row indices grouped by projection descriptor.
    #[must_use]
    pub fn proj4_groups(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (row, proj4) in self.proj4s.iter().enumerate() {
            groups.entry(proj4).or_default().push(row);
        }
        groups
    }

    #[must_use]
    pub fn has_one_layer(&self) -> bool {
        self.layer_names().len() <= 1
    }

    #[must_use]
    pub fn has_one_proj4(&self) -> bool {
        self.proj4_groups().len() <= 1
    }

    /// Returns `true` when every row is in longitude/latitude.
    #[must_use]
    pub fn has_standard_proj4(&self) -> bool {
        let standard = normalize_proj4(LONGITUDE_LATITUDE_PROJ4);
        self.proj4s.iter().all(|proj4| *proj4 == standard)
    }

    /// Keeps the rows whose mask entry is `true`.
    ///
    /// # Errors
    ///
    /// Fails when the mask length differs from the row count.
    pub fn filter(&self, mask: &[bool]) -> Result<GeoTable> {
        if mask.len() != self.len() {
            return Err(ArrowError::InvalidArgumentError(format!(
                "filter mask has {} entries for {} rows",
                mask.len(),
                self.len()
            ))
            .into());
        }
        let kept = mask.iter().filter(|keep| **keep).count();
        let attributes = if self.attributes.num_columns() == 0 {
            empty_batch(kept)?
        } else {
            filter_record_batch(&self.attributes, &BooleanArray::from(mask.to_vec()))?
        };
        let pick = |values: &[String]| -> Vec<String> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(value, _)| value.clone())
                .collect()
        };
        Self::new(
            attributes,
            self.geometries
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(geometry, _)| geometry.clone())
                .collect(),
            pick(&self.layers),
            pick(&self.proj4s),
        )
    }

    /// Keeps the rows of the named layers. Unknown names select nothing.
    ///
    /// # Errors
    ///
    /// See [`GeoTable::filter`].
    pub fn select_layers<S: AsRef<str>>(&self, names: &[S]) -> Result<GeoTable> {
        let mask: Vec<bool> = self
            .layers
            .iter()
            .map(|layer| names.iter().any(|name| name.as_ref() == layer))
            .collect();
        self.filter(&mask)
    }

    /// Splits the table into one table per layer, in first-appearance order.
    ///
    /// # Errors
    ///
    /// See [`GeoTable::filter`].
    pub fn split_by_layer(&self) -> Result<Vec<(String, GeoTable)>> {
        self.layer_names()
            .into_iter()
            .map(|name| Ok((name.to_string(), self.select_layers(&[name])?)))
            .collect()
    }

    /// Stacks tables vertically.
    ///
    /// Columns are matched by name, in first-appearance order. A column whose
    /// type differs between tables becomes text; a column missing from a
    /// table is null for that table's rows.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error when a column cannot be cast to its unified type.
    pub fn concat(tables: &[GeoTable]) -> Result<GeoTable> {
        let mut fields: Vec<Field> = Vec::new();
        for table in tables {
            for field in table.attributes.schema().fields() {
                let unified = match fields.iter().position(|f| f.name() == field.name()) {
                    None => {
                        fields.push(Field::new(field.name(), field.data_type().clone(), true));
                        continue;
                    },
                    Some(index) => index,
                };
                let existing = fields[unified].data_type();
                let data_type = match (existing, field.data_type()) {
                    (a, b) if a == b => continue,
                    (DataType::Null, other) | (other, DataType::Null) => other.clone(),
                    _ => DataType::Utf8,
                };
                fields[unified] = Field::new(field.name(), data_type, true);
            }
        }
        let schema = Arc::new(Schema::new(fields));
        let total: usize = tables.iter().map(GeoTable::len).sum();

        let attributes = if schema.fields().is_empty() {
            empty_batch(total)?
        } else {
            let batches = tables
                .iter()
                .map(|table| conform(&table.attributes, &schema))
                .collect::<Result<Vec<_>>>()?;
            concat_batches(&schema, &batches)?
        };

        let mut geometries = Vec::with_capacity(total);
        let mut layers = Vec::with_capacity(total);
        let mut proj4s = Vec::with_capacity(total);
        for table in tables {
            geometries.extend_from_slice(&table.geometries);
            layers.extend_from_slice(&table.layers);
            proj4s.extend_from_slice(&table.proj4s);
        }
        Self::new(attributes, geometries, layers, proj4s)
    }

    /// Returns a copy with every geometry expressed in `target_proj4`.
    ///
    /// # Errors
    ///
    /// Propagates projection parse and transformation failures.
    pub fn reproject(&self, target_proj4: &str) -> Result<GeoTable> {
        let target = normalize_proj4(target_proj4);
        if self.proj4s.iter().all(|proj4| *proj4 == target) {
            return Ok(self.clone());
        }
        debug!(
            "Reprojecting {} rows in {} projection group(s) to '{target}'",
            self.len(),
            self.proj4_groups().len()
        );
        let geometries = reproject_grouped(&self.geometries, &self.proj4s, &target)?;
        Self::new(
            self.attributes.clone(),
            geometries,
            self.layers.clone(),
            vec![target; self.len()],
        )
    }

    /// Returns a copy without z ordinates.
    #[must_use]
    pub fn drop_z(&self) -> GeoTable {
        Self {
            geometries: self.geometries.iter().map(Geometry::without_z).collect(),
            ..self.clone()
        }
    }

    /// UTM descriptor for the centroid of all geometries, taken in
    /// longitude/latitude.
    ///
    /// # Errors
    ///
    /// Fails when the table has no geometry or the centroid is out of range.
    pub fn utm_proj4(&self) -> Result<String> {
        let lonlat = self.reproject(LONGITUDE_LATITUDE_PROJ4)?;
        let collection: GeometryCollection<f64> =
            lonlat.geometries.iter().map(Geometry::to_geo).collect();
        let Some(centroid) = collection.centroid() else {
            return Err(ProjectionError::UnsupportedProjection {
                proj4: "utm".to_string(),
                reason: "no geometries to locate a UTM zone".to_string(),
            }
            .into());
        };
        resolve_utm(centroid.x(), centroid.y())
    }
}

/// Picks `rows` (in the given order) out of `batch`.
pub(crate) fn take_rows(batch: &RecordBatch, rows: &[usize]) -> Result<RecordBatch> {
    if batch.num_columns() == 0 {
        return empty_batch(rows.len());
    }
    let indices = UInt64Array::from_iter_values(rows.iter().map(|row| *row as u64));
    Ok(take_record_batch(batch, &indices)?)
}

/// Casts and pads `batch` to `schema`.
fn conform(batch: &RecordBatch, schema: &Arc<Schema>) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(column) if column.data_type() == field.data_type() => Ok(Arc::clone(column)),
            Some(column) => cast(column, field.data_type()),
            None => Ok(new_null_array(field.data_type(), batch.num_rows())),
        })
        .collect::<std::result::Result<Vec<ArrayRef>, ArrowError>>()?;
    Ok(RecordBatch::try_new_with_options(
        Arc::clone(schema),
        columns,
        &RecordBatchOptions::new().with_row_count(Some(batch.num_rows())),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::cast::AsArray;
    use arrow_array::types::Int64Type;
    use arrow_array::{Array, Int64Array, StringArray};
    use serde_json::json;

    fn lonlat() -> String {
        LONGITUDE_LATITUDE_PROJ4.to_string()
    }

    fn table(layer: &str, names: &[&str], points: &[(f64, f64)]) -> GeoTable {
        let names: ArrayRef = Arc::new(StringArray::from(names.to_vec()));
        GeoTable::new(
            RecordBatch::try_from_iter([("name", names)]).unwrap(),
            points.iter().map(|(x, y)| Geometry::point(*x, *y)).collect(),
            vec![layer.to_string(); points.len()],
            vec![lonlat(); points.len()],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_mismatched_parts() {
        let result = GeoTable::new(empty_batch(2).unwrap(), vec![], vec![], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_row_access() {
        let t = table("cities", &["a", "b"], &[(1.0, 2.0), (3.0, 4.0)]);
        let row = t.row(1).unwrap().unwrap();
        assert_eq!(row.properties["name"], json!("b"));
        assert_eq!(*row.geometry, Geometry::point(3.0, 4.0));
        assert_eq!(row.layer, "cities");
        assert!(t.row(2).unwrap().is_none());
        assert_eq!(t.rows().unwrap().len(), 2);
    }

    #[test]
    fn test_concat_unifies_columns() {
        let a = table("a", &["x"], &[(0.0, 0.0)]);
        let counts: ArrayRef = Arc::new(Int64Array::from(vec![7]));
        let names: ArrayRef = Arc::new(Int64Array::from(vec![42]));
        let b = GeoTable::new(
            RecordBatch::try_from_iter([("count", counts), ("name", names)]).unwrap(),
            vec![Geometry::point(1.0, 1.0)],
            vec!["b".to_string()],
            vec![lonlat()],
        )
        .unwrap();

        let both = GeoTable::concat(&[a, b]).unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both.layer_names(), vec!["a", "b"]);
        let schema = both.attributes().schema();
        assert_eq!(schema.field_with_name("name").unwrap().data_type(), &DataType::Utf8);
        let names = both.attributes().column_by_name("name").unwrap().as_string::<i32>();
        assert_eq!(names.value(1), "42");
        let counts = both
            .attributes()
            .column_by_name("count")
            .unwrap()
            .as_primitive::<Int64Type>();
        assert!(counts.is_null(0));
        assert_eq!(counts.value(1), 7);
    }

    #[test]
    fn test_select_layers() {
        let t = GeoTable::concat(&[
            table("a", &["1", "2"], &[(0.0, 0.0), (1.0, 1.0)]),
            table("b", &["3"], &[(2.0, 2.0)]),
        ])
        .unwrap();
        assert!(!t.has_one_layer());
        let b = t.select_layers(&["b"]).unwrap();
        assert_eq!(b.len(), 1);
        assert!(b.has_one_layer());
        assert!(t.select_layers(&["missing"]).unwrap().is_empty());

        let split = t.split_by_layer().unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].1.len(), 2);
    }

    #[test]
    fn test_reproject_returns_new_table() {
        let t = table("a", &["x"], &[(-74.0, 40.7)]);
        let utm = t.utm_proj4().unwrap();
        assert!(utm.contains("+zone=18"));

        let projected = t.reproject(&utm).unwrap();
        assert_eq!(projected.proj4s(), &[utm.clone()]);
        assert!(!projected.has_standard_proj4());
        // The original is untouched.
        assert_eq!(t.geometries()[0], Geometry::point(-74.0, 40.7));
        assert!(t.has_standard_proj4());
        // Still the same zone when computed from projected coordinates.
        assert_eq!(projected.utm_proj4().unwrap(), utm);
    }

    #[test]
    fn test_utm_of_empty_table_fails() {
        assert!(GeoTable::empty().unwrap().utm_proj4().is_err());
    }

    #[test]
    fn test_take_rows_without_columns() {
        let batch = take_rows(&empty_batch(5).unwrap(), &[0, 3]).unwrap();
        assert_eq!(batch.num_rows(), 2);
    }
}
