//! Driver registry for the formats geotable can read and write.
//!
//! A driver names a format (e.g. `"CSV"`, `"ESRI Shapefile"`) together with the
//! file extensions it claims and the operations it supports. Loading picks a
//! driver from the source path; saving picks one from the destination path
//! unless the caller names a driver explicitly.
//!
//! # Examples
//!
//! ```
//! use geotable_core::drivers::{driver_for_path, find_driver};
//!
//! let csv = find_driver("csv").expect("CSV driver should exist");
//! assert!(csv.capabilities.write.is_supported());
//!
//! let driver = driver_for_path("parcels.zip").expect("zip maps to a driver");
//! assert_eq!(driver.short_name, "ESRI Shapefile");
//! ```

use std::path::Path;

/// Support status for a specific driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportStatus {
    /// The operation is implemented.
    Supported,
    /// The operation is not supported by the driver.
    NotSupported,
}

impl SupportStatus {
    /// Returns `true` if the operation is implemented.
    ///
    /// # Examples
    ///
    /// ```
    /// use geotable_core::drivers::SupportStatus;
    ///
    /// assert!(SupportStatus::Supported.is_supported());
    /// assert!(!SupportStatus::NotSupported.is_supported());
    /// ```
    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(self, SupportStatus::Supported)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            SupportStatus::Supported => "Supported",
            SupportStatus::NotSupported => "Not Supported",
        }
    }
}

/// Operations supported by a driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverCapabilities {
    /// Support status for describing a dataset (`geotable info`).
    pub info: SupportStatus,
    /// Support status for loading.
    pub read: SupportStatus,
    /// Support status for saving.
    pub write: SupportStatus,
}

impl DriverCapabilities {
    /// Returns `true` if at least one operation is implemented.
    #[must_use]
    pub fn has_supported_operation(&self) -> bool {
        self.info.is_supported() || self.read.is_supported() || self.write.is_supported()
    }
}

/// Format driver definition.
///
/// # Examples
///
/// ```
/// use geotable_core::drivers::{Driver, SupportStatus};
///
/// let driver = Driver::new(
///     "GeoJSON",
///     "GeoJSON",
///     &["geojson", "json"],
///     SupportStatus::Supported,
///     SupportStatus::Supported,
///     SupportStatus::Supported,
/// );
///
/// assert_eq!(driver.short_name, "GeoJSON");
/// assert!(driver.handles_extension("JSON"));
/// ```
#[derive(Debug, Clone)]
pub struct Driver {
    /// Short name used in the CLI and for driver identification (e.g., `"GeoJSON"`).
    pub short_name: &'static str,
    /// Long descriptive name for display purposes.
    pub long_name: &'static str,
    /// Lowercase file extensions claimed by the driver, without the dot.
    pub extensions: &'static [&'static str],
    /// Operations supported by this driver.
    pub capabilities: DriverCapabilities,
}

impl Driver {
    #[must_use]
    pub const fn new(
        short_name: &'static str,
        long_name: &'static str,
        extensions: &'static [&'static str],
        info: SupportStatus,
        read: SupportStatus,
        write: SupportStatus,
    ) -> Self {
        Self {
            short_name,
            long_name,
            extensions,
            capabilities: DriverCapabilities { info, read, write },
        }
    }

    /// Returns `true` if `extension` (case-insensitive, no dot) belongs to this driver.
    #[must_use]
    pub fn handles_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    }
}

pub const CSV: &str = "CSV";
pub const GEOJSON: &str = "GeoJSON";
pub const GEOJSON_SEQ: &str = "GeoJSONSeq";
pub const SHAPEFILE: &str = "ESRI Shapefile";
pub const KML: &str = "KML";
pub const KMZ: &str = "KMZ";

/// Returns the complete registry.
#[must_use]
pub fn get_drivers() -> Vec<Driver> {
    use SupportStatus::{NotSupported, Supported};

    vec![
        Driver::new(
            CSV,
            "Comma Separated Value (.csv), optionally zipped",
            &["csv", "tsv", "txt"],
            Supported,
            Supported,
            Supported,
        ),
        Driver::new(GEOJSON, "GeoJSON", &["geojson", "json"], Supported, Supported, Supported),
        Driver::new(
            GEOJSON_SEQ,
            "GeoJSONSeq: sequence of GeoJSON features",
            &["geojsonl", "geojsons", "ndjson"],
            Supported,
            Supported,
            NotSupported,
        ),
        Driver::new(
            SHAPEFILE,
            "ESRI Shapefile / DBF (zipped)",
            &["shp", "zip"],
            Supported,
            Supported,
            Supported,
        ),
        Driver::new(KML, "Keyhole Markup Language", &["kml"], Supported, Supported, Supported),
        Driver::new(
            KMZ,
            "Keyhole Markup Language (zipped)",
            &["kmz"],
            Supported,
            Supported,
            Supported,
        ),
    ]
}

/// Returns all drivers that have at least one supported operation.
#[must_use]
pub fn get_available_drivers() -> Vec<Driver> {
    get_drivers()
        .into_iter()
        .filter(|d| d.capabilities.has_supported_operation())
        .collect()
}

/// Finds a driver by its short name (case-insensitive).
///
/// # Examples
///
/// ```
/// use geotable_core::drivers::find_driver;
///
/// let driver = find_driver("kmz").expect("KMZ should exist");
/// assert_eq!(driver.short_name, "KMZ");
/// assert!(find_driver("InvalidDriver").is_none());
/// ```
#[must_use]
pub fn find_driver(name: &str) -> Option<Driver> {
    get_drivers()
        .into_iter()
        .find(|d| d.short_name.eq_ignore_ascii_case(name))
}

/// Picks the driver claiming the extension of `path`.
#[must_use]
pub fn driver_for_path(path: impl AsRef<Path>) -> Option<Driver> {
    let extension = path.as_ref().extension()?.to_str()?;
    get_drivers()
        .into_iter()
        .find(|d| d.handles_extension(extension))
}

/// Returns all driver short names in alphabetically sorted order.
///
/// # Examples
///
/// ```
/// use geotable_core::drivers::get_driver_names;
///
/// let names = get_driver_names();
/// assert!(names.contains(&"GeoJSON"));
///
/// let mut sorted = names.clone();
/// sorted.sort_unstable();
/// assert_eq!(names, sorted);
/// ```
#[must_use]
pub fn get_driver_names() -> Vec<&'static str> {
    let mut names: Vec<_> = get_drivers().iter().map(|d| d.short_name).collect();
    names.sort_unstable();
    names
}
