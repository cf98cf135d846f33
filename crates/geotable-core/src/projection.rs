//! Projection descriptor resolution.
//!
//! A descriptor is a PROJ parameter string (or any CRS text PROJ accepts, such
//! as the WKT found in a shapefile `.prj`). Descriptors compare by exact string
//! equality after [`normalize_proj4`]; no semantic CRS equivalence is checked.
//!
//! Resolution is an ordered fallback chain: an explicit descriptor wins, then a
//! sibling `.proj4` file, then the CRS embedded in the source format, then
//! longitude/latitude.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;

use crate::error::{IoErrorExt, ProjectionError, Result};

/// Longitude/latitude on the WGS84 datum (EPSG:4326).
pub const LONGITUDE_LATITUDE_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Spherical (web) mercator (EPSG:3857).
pub const SPHERICAL_MERCATOR_PROJ4: &str = "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 \
     +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +wktext +no_defs";

/// Token asking for the descriptor stored next to the source in a `.proj4` file.
pub const SIDECAR_TOKEN: &str = "@proj4";

/// Extension of sidecar projection files.
pub const SIDECAR_EXTENSION: &str = "proj4";

/// Projections that can be named instead of spelled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownProjection {
    LongitudeLatitude,
    SphericalMercator,
}

impl WellKnownProjection {
    #[must_use]
    pub fn proj4(&self) -> String {
        normalize_proj4(match self {
            WellKnownProjection::LongitudeLatitude => LONGITUDE_LATITUDE_PROJ4,
            WellKnownProjection::SphericalMercator => SPHERICAL_MERCATOR_PROJ4,
        })
    }
}

/// How a caller refers to a projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProjectionReference {
    /// Longitude/latitude unless the source says otherwise.
    #[default]
    Default,
    /// A descriptor given verbatim.
    Explicit(String),
    /// Read `<source stem>.proj4` next to the source.
    Sidecar,
    /// A projection known by name.
    Named(WellKnownProjection),
    /// The UTM zone containing the centroid of the loaded geometries.
    Utm,
}

impl FromStr for ProjectionReference {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "" => ProjectionReference::Default,
            SIDECAR_TOKEN => ProjectionReference::Sidecar,
            "lonlat" | "longlat" | "epsg:4326" => {
                ProjectionReference::Named(WellKnownProjection::LongitudeLatitude)
            },
            "mercator" | "epsg:3857" => {
                ProjectionReference::Named(WellKnownProjection::SphericalMercator)
            },
            "utm" => ProjectionReference::Utm,
            _ => ProjectionReference::Explicit(trimmed.to_string()),
        })
    }
}

impl fmt::Display for ProjectionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionReference::Default => f.write_str("default"),
            ProjectionReference::Explicit(proj4) => f.write_str(proj4),
            ProjectionReference::Sidecar => f.write_str(SIDECAR_TOKEN),
            ProjectionReference::Named(named) => f.write_str(&named.proj4()),
            ProjectionReference::Utm => f.write_str("utm"),
        }
    }
}

/// Normalizes a descriptor: surrounding whitespace is trimmed and inner runs
/// of whitespace collapse to a single space.
#[must_use]
pub fn normalize_proj4(proj4: &str) -> String {
    proj4.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves a reference for a source that carries no CRS of its own.
///
/// `source_path` locates the sidecar file when one is requested.
///
/// # Errors
///
/// Fails with [`ProjectionError::UnsupportedProjection`] for an empty explicit
/// descriptor or [`ProjectionReference::Utm`], which needs geometries to
/// resolve, and with an I/O error when the sidecar exists but is unreadable.
pub fn resolve(reference: &ProjectionReference, source_path: Option<&Path>) -> Result<String> {
    resolve_with_embedded(reference, source_path, None)
}

/// Resolves a reference through the whole fallback chain:
/// explicit, sidecar `.proj4`, CRS embedded in the source, default.
///
/// # Errors
///
/// See [`resolve`].
pub fn resolve_with_embedded(
    reference: &ProjectionReference,
    source_path: Option<&Path>,
    embedded: Option<&str>,
) -> Result<String> {
    match reference {
        ProjectionReference::Explicit(proj4) => {
            let proj4 = normalize_proj4(proj4);
            if proj4.is_empty() {
                return Err(ProjectionError::UnsupportedProjection {
                    proj4,
                    reason: "empty descriptor".to_string(),
                }
                .into());
            }
            Ok(proj4)
        },
        ProjectionReference::Named(named) => Ok(named.proj4()),
        ProjectionReference::Utm => Err(ProjectionError::UnsupportedProjection {
            proj4: "utm".to_string(),
            reason: "the UTM zone can only be resolved from loaded geometries".to_string(),
        }
        .into()),
        ProjectionReference::Sidecar | ProjectionReference::Default => {
            infer(source_path, embedded)
        },
    }
}

/// Picks the descriptor of a source from its sidecar file, then its embedded
/// CRS, then the longitude/latitude default.
///
/// # Errors
///
/// Returns an I/O error when a sidecar exists but cannot be read.
pub fn infer(source_path: Option<&Path>, embedded: Option<&str>) -> Result<String> {
    if let Some(path) = source_path
        && let Some(proj4) = read_sidecar_proj4(path)?
    {
        debug!("Using sidecar projection for {}: {proj4}", path.display());
        return Ok(proj4);
    }
    if let Some(embedded) = embedded.map(normalize_proj4)
        && !embedded.is_empty()
    {
        return Ok(embedded);
    }
    Ok(normalize_proj4(LONGITUDE_LATITUDE_PROJ4))
}

/// Path of the sidecar projection file for `source_path`.
#[must_use]
pub fn sidecar_path(source_path: &Path) -> PathBuf {
    source_path.with_extension(SIDECAR_EXTENSION)
}

/// Reads and normalizes `<stem>.proj4` next to `source_path`, if it exists.
///
/// # Errors
///
/// Returns an I/O error when the file exists but cannot be read.
pub fn read_sidecar_proj4(source_path: &Path) -> Result<Option<String>> {
    let path = sidecar_path(source_path);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).with_read_context("proj4", &path)?;
    let proj4 = normalize_proj4(&text);
    Ok((!proj4.is_empty()).then_some(proj4))
}

/// Builds the UTM descriptor for a zone and hemisphere.
#[must_use]
pub fn utm_proj4(zone: u8, north: bool) -> String {
    let mut parts = vec!["+proj=utm".to_string(), format!("+zone={zone}")];
    if !north {
        parts.push("+south".to_string());
    }
    parts.extend(
        ["+ellps=WGS84", "+datum=WGS84", "+units=m", "+no_defs"]
            .iter()
            .map(ToString::to_string),
    );
    parts.join(" ")
}

/// Returns the UTM descriptor of the zone containing a longitude/latitude.
///
/// # Errors
///
/// Fails with [`ProjectionError::InvalidCoordinate`] when longitude is outside
/// [-180, 180] or latitude outside [-90, 90].
pub fn resolve_utm(longitude: f64, latitude: f64) -> Result<String> {
    if !(-180.0..=180.0).contains(&longitude) || !(-90.0..=90.0).contains(&latitude) {
        return Err(ProjectionError::InvalidCoordinate {
            longitude,
            latitude,
        }
        .into());
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let zone = (((longitude + 180.0) / 6.0).floor() as u8 + 1).min(60);
    Ok(utm_proj4(zone, latitude >= 0.0))
}
