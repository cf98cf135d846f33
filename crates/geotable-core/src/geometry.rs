//! Geometry values carried by every geotable row.
//!
//! Geometries keep an optional z ordinate per coordinate, which the planar
//! `geo` types cannot hold, so the crate uses its own small model and converts
//! to [`geo_types::Geometry`] only for spatial predicates and centroids.

use std::fmt;
use std::str::FromStr;

use geo_types::{
    Coord, LineString as GeoLineString, MultiLineString as GeoMultiLineString,
    MultiPoint as GeoMultiPoint, MultiPolygon as GeoMultiPolygon, Point as GeoPoint,
    Polygon as GeoPolygon, Rect,
};

use crate::error::{ConfigError, GeometryError};

/// A coordinate tuple `(x, y[, z])`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Coordinate {
    #[must_use]
    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    #[must_use]
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    /// Builds a coordinate from a position array such as `[x, y]` or `[x, y, z]`.
    ///
    /// Returns `None` when fewer than two ordinates are present.
    #[must_use]
    pub fn from_slice(position: &[f64]) -> Option<Self> {
        match position {
            [x, y] => Some(Self::xy(*x, *y)),
            [x, y, z, ..] => Some(Self::xyz(*x, *y, *z)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        match self.z {
            Some(z) => vec![self.x, self.y, z],
            None => vec![self.x, self.y],
        }
    }

    fn to_geo(self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

/// The kind of a [`Geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "LineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::MultiLineString => "MultiLineString",
            GeometryKind::MultiPolygon => "MultiPolygon",
        }
    }

    /// Returns the single-part kind this kind belongs with, so that a point and
    /// a multipoint compare equal.
    #[must_use]
    pub fn family(&self) -> GeometryKind {
        match self {
            GeometryKind::Point | GeometryKind::MultiPoint => GeometryKind::Point,
            GeometryKind::LineString | GeometryKind::MultiLineString => GeometryKind::LineString,
            GeometryKind::Polygon | GeometryKind::MultiPolygon => GeometryKind::Polygon,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A geometry value. Rings and parts are stored as ordered coordinate lists.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coordinate),
    LineString(Vec<Coordinate>),
    /// Exterior ring first, then holes.
    Polygon(Vec<Vec<Coordinate>>),
    MultiPoint(Vec<Coordinate>),
    MultiLineString(Vec<Vec<Coordinate>>),
    MultiPolygon(Vec<Vec<Vec<Coordinate>>>),
}

impl Geometry {
    #[must_use]
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point(Coordinate::xy(x, y))
    }

    #[must_use]
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::LineString(_) => GeometryKind::LineString,
            Geometry::Polygon(_) => GeometryKind::Polygon,
            Geometry::MultiPoint(_) => GeometryKind::MultiPoint,
            Geometry::MultiLineString(_) => GeometryKind::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryKind::MultiPolygon,
        }
    }

    /// Parses well-known text, keeping z ordinates.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidWkt`] for malformed text, empty
    /// geometries and geometry collections.
    pub fn from_wkt(text: &str) -> Result<Self, GeometryError> {
        let invalid = |reason: &str| GeometryError::InvalidWkt {
            text: text.to_string(),
            reason: reason.to_string(),
        };
        let parsed = wkt::Wkt::<f64>::from_str(text.trim()).map_err(|e| invalid(e))?;
        let geometry = match parsed {
            wkt::Wkt::Point(point) => {
                Geometry::Point(point.0.map(from_wkt_coord).ok_or_else(|| invalid("empty point"))?)
            },
            wkt::Wkt::LineString(line) => Geometry::LineString(from_wkt_line(line)),
            wkt::Wkt::Polygon(polygon) => Geometry::Polygon(from_wkt_polygon(polygon)),
            wkt::Wkt::MultiPoint(points) => Geometry::MultiPoint(
                points
                    .0
                    .into_iter()
                    .filter_map(|point| point.0.map(from_wkt_coord))
                    .collect(),
            ),
            wkt::Wkt::MultiLineString(lines) => {
                Geometry::MultiLineString(lines.0.into_iter().map(from_wkt_line).collect())
            },
            wkt::Wkt::MultiPolygon(polygons) => {
                Geometry::MultiPolygon(polygons.0.into_iter().map(from_wkt_polygon).collect())
            },
            wkt::Wkt::GeometryCollection(_) => {
                return Err(invalid("geometry collections are not supported"));
            },
        };
        if geometry.coordinate_count() == 0 {
            return Err(invalid("empty geometry"));
        }
        Ok(geometry)
    }

    /// Renders the geometry as well-known text.
    #[must_use]
    pub fn to_wkt(&self) -> String {
        self.to_string()
    }

    #[must_use]
    pub fn has_z(&self) -> bool {
        self.coordinates().any(|c| c.z.is_some())
    }

    #[must_use]
    pub fn coordinate_count(&self) -> usize {
        self.coordinates().count()
    }

    /// Iterates over every coordinate in storage order.
    pub fn coordinates(&self) -> Box<dyn Iterator<Item = &Coordinate> + '_> {
        match self {
            Geometry::Point(c) => Box::new(std::iter::once(c)),
            Geometry::LineString(cs) | Geometry::MultiPoint(cs) => Box::new(cs.iter()),
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                Box::new(rings.iter().flatten())
            },
            Geometry::MultiPolygon(polygons) => Box::new(polygons.iter().flatten().flatten()),
        }
    }

    /// Applies a fallible function to every coordinate, preserving kind and
    /// vertex order.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map_coords<E, F>(&self, mut f: F) -> Result<Geometry, E>
    where
        F: FnMut(Coordinate) -> Result<Coordinate, E>,
    {
        let mut line = |cs: &[Coordinate]| cs.iter().map(|c| f(*c)).collect::<Result<Vec<_>, E>>();
        Ok(match self {
            Geometry::Point(c) => Geometry::Point(line(std::slice::from_ref(c))?[0]),
            Geometry::LineString(cs) => Geometry::LineString(line(cs)?),
            Geometry::MultiPoint(cs) => Geometry::MultiPoint(line(cs)?),
            Geometry::Polygon(rings) => {
                Geometry::Polygon(rings.iter().map(|r| line(r)).collect::<Result<_, E>>()?)
            },
            Geometry::MultiLineString(parts) => Geometry::MultiLineString(
                parts.iter().map(|p| line(p)).collect::<Result<_, E>>()?,
            ),
            Geometry::MultiPolygon(polygons) => Geometry::MultiPolygon(
                polygons
                    .iter()
                    .map(|rings| rings.iter().map(|r| line(r)).collect::<Result<Vec<_>, E>>())
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// Applies an infallible function to every coordinate.
    #[must_use]
    pub fn map_coords<F>(&self, mut f: F) -> Geometry
    where
        F: FnMut(Coordinate) -> Coordinate,
    {
        match self.try_map_coords::<std::convert::Infallible, _>(|c| Ok(f(c))) {
            Ok(geometry) => geometry,
            Err(never) => match never {},
        }
    }

    /// Returns a copy with the third ordinate stripped from every coordinate.
    #[must_use]
    pub fn without_z(&self) -> Geometry {
        self.map_coords(|c| Coordinate::xy(c.x, c.y))
    }

    /// Returns a copy with x and y exchanged, for sources written in
    /// latitude/longitude order.
    #[must_use]
    pub fn swap_xy(&self) -> Geometry {
        self.map_coords(|c| Coordinate {
            x: c.y,
            y: c.x,
            z: c.z,
        })
    }

    /// Converts to a planar `geo` geometry, discarding z.
    #[must_use]
    pub fn to_geo(&self) -> geo_types::Geometry<f64> {
        let line = |cs: &[Coordinate]| -> GeoLineString<f64> {
            GeoLineString::new(cs.iter().map(|c| c.to_geo()).collect())
        };
        let polygon = |rings: &[Vec<Coordinate>]| -> GeoPolygon<f64> {
            let mut rings = rings.iter().map(|r| line(r));
            let exterior = rings.next().unwrap_or_else(|| GeoLineString::new(vec![]));
            GeoPolygon::new(exterior, rings.collect())
        };
        match self {
            Geometry::Point(c) => GeoPoint::from(c.to_geo()).into(),
            Geometry::LineString(cs) => line(cs).into(),
            Geometry::Polygon(rings) => polygon(rings).into(),
            Geometry::MultiPoint(cs) => {
                GeoMultiPoint::new(cs.iter().map(|c| GeoPoint::from(c.to_geo())).collect()).into()
            },
            Geometry::MultiLineString(parts) => {
                GeoMultiLineString::new(parts.iter().map(|p| line(p)).collect()).into()
            },
            Geometry::MultiPolygon(polygons) => {
                GeoMultiPolygon::new(polygons.iter().map(|p| polygon(p)).collect()).into()
            },
        }
    }

    /// Converts from a planar `geo` geometry. Collections, lines, rects and
    /// triangles map to their nearest kind; empty collections yield `None`.
    #[must_use]
    pub fn from_geo(geometry: &geo_types::Geometry<f64>) -> Option<Self> {
        use geo_types::Geometry as G;

        let line = |l: &GeoLineString<f64>| -> Vec<Coordinate> {
            l.0.iter().map(|c| Coordinate::xy(c.x, c.y)).collect()
        };
        let polygon = |p: &GeoPolygon<f64>| -> Vec<Vec<Coordinate>> {
            std::iter::once(p.exterior())
                .chain(p.interiors())
                .map(line)
                .collect()
        };
        Some(match geometry {
            G::Point(p) => Geometry::point(p.x(), p.y()),
            G::Line(l) => Geometry::LineString(vec![
                Coordinate::xy(l.start.x, l.start.y),
                Coordinate::xy(l.end.x, l.end.y),
            ]),
            G::LineString(l) => Geometry::LineString(line(l)),
            G::Polygon(p) => Geometry::Polygon(polygon(p)),
            G::MultiPoint(mp) => {
                Geometry::MultiPoint(mp.iter().map(|p| Coordinate::xy(p.x(), p.y())).collect())
            },
            G::MultiLineString(ml) => Geometry::MultiLineString(ml.iter().map(line).collect()),
            G::MultiPolygon(mp) => Geometry::MultiPolygon(mp.iter().map(polygon).collect()),
            G::Rect(r) => Geometry::Polygon(polygon(&r.to_polygon())),
            G::Triangle(t) => Geometry::Polygon(polygon(&t.to_polygon())),
            G::GeometryCollection(gc) => gc.iter().find_map(Geometry::from_geo)?,
        })
    }
}

fn from_wkt_coord(coord: wkt::types::Coord<f64>) -> Coordinate {
    Coordinate {
        x: coord.x,
        y: coord.y,
        z: coord.z,
    }
}

fn from_wkt_line(line: wkt::types::LineString<f64>) -> Vec<Coordinate> {
    line.0.into_iter().map(from_wkt_coord).collect()
}

fn from_wkt_polygon(polygon: wkt::types::Polygon<f64>) -> Vec<Vec<Coordinate>> {
    polygon.0.into_iter().map(from_wkt_line).collect()
}

impl FromStr for Geometry {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Geometry::from_wkt(s)
    }
}

/// Coordinate list; z ordinates are written only when `with_z` is set.
struct WktCoords<'a>(&'a [Coordinate], bool);

impl fmt::Display for WktCoords<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", c.x, c.y)?;
            if let (true, Some(z)) = (self.1, c.z) {
                write!(f, " {z}")?;
            }
        }
        f.write_str(")")
    }
}

struct WktRings<'a>(&'a [Vec<Coordinate>], bool);

impl fmt::Display for WktRings<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, ring) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", WktCoords(ring, self.1))?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.kind().as_str().to_uppercase();
        // A Z tag needs an ordinate on every vertex.
        let with_z = self.coordinates().all(|c| c.z.is_some());
        let z = if with_z { " Z" } else { "" };
        write!(f, "{tag}{z} ")?;
        match self {
            Geometry::Point(c) => write!(f, "{}", WktCoords(std::slice::from_ref(c), with_z)),
            Geometry::LineString(cs) | Geometry::MultiPoint(cs) => {
                write!(f, "{}", WktCoords(cs, with_z))
            },
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                write!(f, "{}", WktRings(rings, with_z))
            },
            Geometry::MultiPolygon(polygons) => {
                f.write_str("(")?;
                for (i, polygon) in polygons.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", WktRings(polygon, with_z))?;
                }
                f.write_str(")")
            },
        }
    }
}

/// An axis-aligned rectangle `(min_x, min_y, max_x, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    #[must_use]
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new((self.min_x, self.min_y), (self.max_x, self.max_y))
    }

    /// Smallest box covering every coordinate, or `None` for no geometries.
    pub fn of<'a>(geometries: impl IntoIterator<Item = &'a Geometry>) -> Option<Self> {
        let mut bounds: Option<Self> = None;
        for c in geometries.into_iter().flat_map(Geometry::coordinates) {
            bounds = Some(match bounds {
                None => Self::new(c.x, c.y, c.x, c.y),
                Some(b) => Self::new(
                    b.min_x.min(c.x),
                    b.min_y.min(c.y),
                    b.max_x.max(c.x),
                    b.max_y.max(c.y),
                ),
            });
        }
        bounds
    }
}

impl FromStr for BoundingBox {
    type Err = ConfigError;

    /// Parses `"minx,miny,maxx,maxy"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: String| ConfigError::InvalidOption {
            option: "bounding_box".to_string(),
            message,
        };
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(format!("'{s}': {e}")))?;
        match values[..] {
            [min_x, min_y, max_x, max_y] if min_x <= max_x && min_y <= max_y => {
                Ok(Self::new(min_x, min_y, max_x, max_y))
            },
            [_, _, _, _] => Err(invalid(format!("'{s}': minimum exceeds maximum"))),
            _ => Err(invalid(format!("'{s}': expected four comma-separated numbers"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point_with_z() {
        let g = Geometry::from_wkt("POINT Z (1 2 3)").unwrap();
        assert_eq!(g, Geometry::Point(Coordinate::xyz(1.0, 2.0, 3.0)));
        assert!(g.has_z());
        assert_eq!(g.to_wkt(), "POINT Z (1 2 3)");
    }

    #[test]
    fn test_partial_z_is_written_as_2d() {
        let g = Geometry::LineString(vec![Coordinate::xyz(1.0, 2.0, 3.0), Coordinate::xy(4.0, 5.0)]);
        assert_eq!(g.to_wkt(), "LINESTRING (1 2, 4 5)");
        let reparsed = Geometry::from_wkt(&g.to_wkt()).unwrap();
        assert_eq!(reparsed, g.without_z());
    }

    #[test]
    fn test_parse_polygon_with_hole() {
        let g = Geometry::from_wkt(
            "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0), (2 2, 3 2, 3 3, 2 2))",
        )
        .unwrap();
        let Geometry::Polygon(rings) = &g else {
            panic!("expected polygon, got {g:?}");
        };
        assert_eq!(rings.len(), 2);
        assert_eq!(g.coordinate_count(), 9);
        assert_eq!(
            g.to_wkt(),
            "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0), (2 2, 3 2, 3 3, 2 2))"
        );
    }

    #[test]
    fn test_reject_malformed_and_empty() {
        assert!(Geometry::from_wkt("x").is_err());
        assert!(Geometry::from_wkt("POINT EMPTY").is_err());
        assert!(Geometry::from_wkt("GEOMETRYCOLLECTION (POINT (0 0))").is_err());
    }

    #[test]
    fn test_without_z_and_swap() {
        let g = Geometry::LineString(vec![Coordinate::xyz(1.0, 2.0, 3.0), Coordinate::xy(4.0, 5.0)]);
        assert!(!g.without_z().has_z());
        assert_eq!(
            g.swap_xy(),
            Geometry::LineString(vec![Coordinate::xyz(2.0, 1.0, 3.0), Coordinate::xy(5.0, 4.0)])
        );
    }

    #[test]
    fn test_geo_round_trip() {
        let g = Geometry::from_wkt("MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))")
            .unwrap();
        assert_eq!(Geometry::from_geo(&g.to_geo()), Some(g));
    }

    #[test]
    fn test_bounding_box_parse() {
        let bbox: BoundingBox = "-1, -1, 10, 10".parse().unwrap();
        assert_eq!(bbox, BoundingBox::new(-1.0, -1.0, 10.0, 10.0));
        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("5,0,1,1".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_bounding_box_of_geometries() {
        let geometries = [Geometry::point(0.0, 5.0), Geometry::point(-2.0, 1.0)];
        assert_eq!(
            BoundingBox::of(&geometries),
            Some(BoundingBox::new(-2.0, 1.0, 0.0, 5.0))
        );
        assert_eq!(BoundingBox::of(&[]), None);
    }
}
