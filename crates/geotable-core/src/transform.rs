//! Geometry reprojection.
//!
//! A [`Transformer`] is built once per (source, target) descriptor pair and
//! applied coordinate by coordinate. Only x and y go through PROJ; a z
//! ordinate passes through untouched. Equal descriptors give an identity
//! transformer that returns geometries bit-for-bit unchanged.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use proj::Proj;

use crate::error::{ProjectionError, Result};
use crate::geometry::{Coordinate, Geometry};
use crate::projection::normalize_proj4;

/// Transforms geometries between two projection descriptors.
pub struct Transformer {
    source: String,
    target: String,
    proj: Option<Proj>,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("identity", &self.is_identity())
            .finish()
    }
}

impl Transformer {
    /// Parses both descriptors.
    ///
    /// # Errors
    ///
    /// Fails with [`ProjectionError::UnsupportedProjection`] when PROJ cannot
    /// parse either descriptor or build an operation between them.
    pub fn new(source_proj4: &str, target_proj4: &str) -> Result<Self> {
        let source = normalize_proj4(source_proj4);
        let target = normalize_proj4(target_proj4);
        if source == target {
            return Ok(Self {
                source,
                target,
                proj: None,
            });
        }
        let proj = Proj::new_known_crs(&source, &target, None).map_err(|e| {
            // Blame whichever side PROJ rejects on its own.
            let culprit = [&source, &target]
                .into_iter()
                .find(|proj4| Proj::new(proj4).is_err())
                .unwrap_or(&source);
            ProjectionError::UnsupportedProjection {
                proj4: culprit.clone(),
                reason: e.to_string(),
            }
        })?;
        debug!("Created transformation '{source}' -> '{target}'");
        Ok(Self {
            source,
            target,
            proj: Some(proj),
        })
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    #[must_use]
    pub fn source_proj4(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn target_proj4(&self) -> &str {
        &self.target
    }

    /// Transforms one geometry, keeping its kind and vertex order.
    ///
    /// # Errors
    ///
    /// Fails with [`ProjectionError::CoordinateTransformation`] when PROJ
    /// rejects a coordinate or produces a non-finite one.
    pub fn transform(&self, geometry: &Geometry) -> Result<Geometry> {
        let Some(proj) = &self.proj else {
            return Ok(geometry.clone());
        };
        geometry
            .try_map_coords(|c| {
                let converted = proj.convert((c.x, c.y)).map_err(|e| e.to_string());
                match converted {
                    Ok((x, y)) if x.is_finite() && y.is_finite() => Ok(Coordinate { x, y, z: c.z }),
                    Ok((x, y)) => Err(format!("non-finite result ({x}, {y})")),
                    Err(reason) => Err(reason),
                }
            })
            .map_err(|reason| {
                ProjectionError::CoordinateTransformation {
                    source_proj4: self.source.clone(),
                    target_proj4: self.target.clone(),
                    wkt: geometry.to_wkt(),
                    reason,
                }
                .into()
            })
    }
}

/// Transforms a single geometry between two descriptors.
///
/// # Errors
///
/// See [`Transformer::new`] and [`Transformer::transform`].
pub fn transform(geometry: &Geometry, source_proj4: &str, target_proj4: &str) -> Result<Geometry> {
    Transformer::new(source_proj4, target_proj4)?.transform(geometry)
}

/// Reprojects rows whose descriptors may differ, building one transformer per
/// distinct source descriptor. Output order matches input order.
///
/// # Errors
///
/// Returns the first error raised by any group.
pub fn reproject_grouped(
    geometries: &[Geometry],
    proj4s: &[String],
    target_proj4: &str,
) -> Result<Vec<Geometry>> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (row, proj4) in proj4s.iter().enumerate().take(geometries.len()) {
        groups.entry(proj4.as_str()).or_default().push(row);
    }

    let mut output: Vec<Option<Geometry>> = vec![None; geometries.len()];
    for (source, rows) in groups {
        let transformer = Transformer::new(source, target_proj4)?;
        debug!(
            "Reprojecting {} rows from '{}' to '{}'",
            rows.len(),
            transformer.source_proj4(),
            transformer.target_proj4()
        );
        for row in rows {
            output[row] = Some(transformer.transform(&geometries[row])?);
        }
    }
    // Rows beyond the descriptor list keep their geometry.
    Ok(output
        .into_iter()
        .zip(geometries)
        .map(|(reprojected, original)| reprojected.unwrap_or_else(|| original.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{LONGITUDE_LATITUDE_PROJ4, SPHERICAL_MERCATOR_PROJ4, resolve_utm};
    use approx::assert_relative_eq;

    fn point_xy(geometry: &Geometry) -> (f64, f64) {
        let Geometry::Point(c) = geometry else {
            panic!("expected point, got {geometry:?}");
        };
        (c.x, c.y)
    }

    #[test]
    fn test_identity_is_exact() {
        let g = Geometry::from_wkt("LINESTRING Z (0.1 0.2 3, 10.123456789 -5.5 4)").unwrap();
        let out = transform(&g, "+proj=utm +zone=18", " +proj=utm  +zone=18 ").unwrap();
        assert_eq!(out, g);
        assert!(Transformer::new("x", "x").unwrap().is_identity());
    }

    #[test]
    fn test_lonlat_to_mercator() {
        let g = Geometry::point(-36.508, -54.2815);
        let out = transform(&g, LONGITUDE_LATITUDE_PROJ4, SPHERICAL_MERCATOR_PROJ4).unwrap();
        let (x, y) = point_xy(&out);
        assert_relative_eq!(x, -4_064_052.0, epsilon = 1.0);
        assert_relative_eq!(y, -7_223_650.5, epsilon = 1.0);
    }

    #[test]
    fn test_round_trip_keeps_z_and_shape() {
        let g = Geometry::from_wkt("POLYGON Z ((-74 40.7 1, -73.9 40.7 2, -73.9 40.8 3, -74 40.7 1))")
            .unwrap();
        let utm = resolve_utm(-74.0, 40.7).unwrap();
        let there = transform(&g, LONGITUDE_LATITUDE_PROJ4, &utm).unwrap();
        let back = transform(&there, &utm, LONGITUDE_LATITUDE_PROJ4).unwrap();

        assert_eq!(back.kind(), g.kind());
        assert_eq!(back.coordinate_count(), g.coordinate_count());
        for (a, b) in g.coordinates().zip(back.coordinates()) {
            assert_relative_eq!(a.x, b.x, epsilon = 1e-7);
            assert_relative_eq!(a.y, b.y, epsilon = 1e-7);
            assert_eq!(a.z, b.z);
        }
    }

    #[test]
    fn test_unparseable_descriptor_fails() {
        let err = Transformer::new(LONGITUDE_LATITUDE_PROJ4, "+proj=nonsense +zone=x").unwrap_err();
        assert!(matches!(
            err,
            crate::error::GeoTableError::Projection(ProjectionError::UnsupportedProjection { .. })
        ));
    }

    #[test]
    fn test_reproject_grouped_preserves_order() {
        let utm = resolve_utm(-74.0, 40.7).unwrap();
        let lonlat = LONGITUDE_LATITUDE_PROJ4.to_string();
        let in_utm = transform(&Geometry::point(-74.0, 40.7), &lonlat, &utm).unwrap();
        let geometries = vec![Geometry::point(1.0, 2.0), in_utm, Geometry::point(3.0, 4.0)];
        let proj4s = vec![lonlat.clone(), utm, lonlat.clone()];

        let out = reproject_grouped(&geometries, &proj4s, &lonlat).unwrap();
        assert_eq!(out[0], geometries[0]);
        assert_eq!(out[2], geometries[2]);
        let (x, y) = point_xy(&out[1]);
        assert_relative_eq!(x, -74.0, epsilon = 1e-7);
        assert_relative_eq!(y, 40.7, epsilon = 1e-7);
    }
}
