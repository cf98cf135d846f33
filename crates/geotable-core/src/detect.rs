//! Geometry column detection.
//!
//! Column names are matched case-sensitively against a fixed, ordered list of
//! conventions. The first convention that matches wins; the result is a
//! [`DecodingPlan`] describing which columns to read and how.

use crate::error::GeometryError;

/// Column holding well-known text in longitude/latitude (x, y) order.
pub const WKT_COLUMN: &str = "wkt";
/// Column holding well-known text written in latitude/longitude order.
pub const LATITUDE_LONGITUDE_WKT_COLUMN: &str = "latitude_longitude_wkt";
/// Column holding well-known text explicitly in longitude/latitude order.
pub const LONGITUDE_LATITUDE_WKT_COLUMN: &str = "longitude_latitude_wkt";
/// Reserved column of native geometry values supplied by a format reader.
pub const GEOMETRY_OBJECT_COLUMN: &str = "geometry_object";
/// Reserved column naming the source layer of a row.
pub const GEOMETRY_LAYER_COLUMN: &str = "geometry_layer";
/// Reserved column holding the projection descriptor of a row's geometry.
pub const GEOMETRY_PROJ4_COLUMN: &str = "geometry_proj4";

/// How the geometry of one source table is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodingPlan {
    /// One column of well-known text.
    WellKnownText {
        column: String,
        /// The text is in (lat, lon) order and must be swapped to (lon, lat).
        swap_xy: bool,
    },
    /// Separate numeric columns; one point per row built from (longitude, latitude).
    LatLonPair {
        latitude: String,
        longitude: String,
    },
    /// The reader already produced geometry values.
    Native { column: String },
}

impl DecodingPlan {
    /// Columns consumed by the plan, which are not carried over as attributes.
    #[must_use]
    pub fn geometry_columns(&self) -> Vec<&str> {
        match self {
            DecodingPlan::WellKnownText { column, .. } | DecodingPlan::Native { column } => {
                vec![column.as_str()]
            },
            DecodingPlan::LatLonPair {
                latitude,
                longitude,
            } => vec![latitude.as_str(), longitude.as_str()],
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn encoding(&self) -> &'static str {
        match self {
            DecodingPlan::WellKnownText { swap_xy: false, .. } => "wkt",
            DecodingPlan::WellKnownText { swap_xy: true, .. } => "wkt (lat, lon)",
            DecodingPlan::LatLonPair { .. } => "latitude/longitude",
            DecodingPlan::Native { .. } => "native",
        }
    }
}

/// One naming convention, checked against the column names of a table.
enum Convention {
    Wkt { column: &'static str, swap_xy: bool },
    Pair { latitude: &'static str, longitude: &'static str },
    Native,
}

impl Convention {
    fn plan(&self, columns: &[&str]) -> Option<DecodingPlan> {
        let has = |name: &str| columns.contains(&name);
        match *self {
            Convention::Wkt { column, swap_xy } => {
                has(column).then(|| DecodingPlan::WellKnownText {
                    column: column.to_string(),
                    swap_xy,
                })
            },
            Convention::Pair {
                latitude,
                longitude,
            } => (has(latitude) && has(longitude)).then(|| DecodingPlan::LatLonPair {
                latitude: latitude.to_string(),
                longitude: longitude.to_string(),
            }),
            Convention::Native => has(GEOMETRY_OBJECT_COLUMN).then(|| DecodingPlan::Native {
                column: GEOMETRY_OBJECT_COLUMN.to_string(),
            }),
        }
    }
}

/// Conventions in priority order.
const CONVENTIONS: [Convention; 6] = [
    Convention::Wkt {
        column: WKT_COLUMN,
        swap_xy: false,
    },
    Convention::Wkt {
        column: LATITUDE_LONGITUDE_WKT_COLUMN,
        swap_xy: true,
    },
    Convention::Wkt {
        column: LONGITUDE_LATITUDE_WKT_COLUMN,
        swap_xy: false,
    },
    Convention::Pair {
        latitude: "latitude",
        longitude: "longitude",
    },
    Convention::Pair {
        latitude: "lat",
        longitude: "lon",
    },
    Convention::Native,
];

/// Chooses the decoding plan for a table from its column names.
///
/// # Errors
///
/// Returns [`GeometryError::GeometryColumnsNotFound`], naming every inspected
/// column, when no convention matches.
pub fn detect<S: AsRef<str>>(column_names: &[S]) -> Result<DecodingPlan, GeometryError> {
    let columns: Vec<&str> = column_names.iter().map(AsRef::as_ref).collect();
    CONVENTIONS
        .iter()
        .find_map(|convention| convention.plan(&columns))
        .ok_or_else(|| GeometryError::GeometryColumnsNotFound {
            columns: columns.iter().map(ToString::to_string).collect(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_wkt() {
        let plan = detect(&["name", "wkt", "value"]).unwrap();
        assert_eq!(
            plan,
            DecodingPlan::WellKnownText {
                column: "wkt".to_string(),
                swap_xy: false
            }
        );
        assert_eq!(plan.geometry_columns(), vec!["wkt"]);
    }

    #[test]
    fn test_detect_wkt_order_variants() {
        assert_eq!(
            detect(&["latitude_longitude_wkt", "id"]).unwrap(),
            DecodingPlan::WellKnownText {
                column: "latitude_longitude_wkt".to_string(),
                swap_xy: true
            }
        );
        assert_eq!(
            detect(&["longitude_latitude_wkt"]).unwrap(),
            DecodingPlan::WellKnownText {
                column: "longitude_latitude_wkt".to_string(),
                swap_xy: false
            }
        );
    }

    #[test]
    fn test_detect_pairs() {
        assert_eq!(
            detect(&["longitude", "name", "latitude"]).unwrap(),
            DecodingPlan::LatLonPair {
                latitude: "latitude".to_string(),
                longitude: "longitude".to_string()
            }
        );
        assert_eq!(
            detect(&["lon", "lat"]).unwrap().geometry_columns(),
            vec!["lat", "lon"]
        );
        // A lone half of a pair is not enough.
        assert!(detect(&["lat", "longitude"]).is_err());
    }

    #[test]
    fn test_detect_priority() {
        let plan = detect(&["lat", "lon", "wkt"]).unwrap();
        assert_eq!(plan.encoding(), "wkt");

        let plan = detect(&["lat", "lon", "latitude", "longitude"]).unwrap();
        assert_eq!(plan.geometry_columns(), vec!["latitude", "longitude"]);

        let plan = detect(&[GEOMETRY_OBJECT_COLUMN, "latitude_longitude_wkt"]).unwrap();
        assert_eq!(plan.encoding(), "wkt (lat, lon)");
    }

    #[test]
    fn test_detect_native() {
        let plan = detect(&["name", GEOMETRY_OBJECT_COLUMN]).unwrap();
        assert_eq!(plan.encoding(), "native");
    }

    #[test]
    fn test_detect_is_case_sensitive() {
        let err = detect(&["WKT", "Latitude", "Longitude"]).unwrap_err();
        let GeometryError::GeometryColumnsNotFound { columns } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(*columns, vec!["WKT", "Latitude", "Longitude"]);
    }

    #[test]
    fn test_detect_is_deterministic() {
        let columns = ["b", "lat", "lon", "a"];
        assert_eq!(detect(&columns).unwrap(), detect(&columns).unwrap());
    }
}
