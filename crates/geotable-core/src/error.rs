//! Error types for geotable operations.
//!
//! Errors are grouped by concern (geometry decoding, projections, I/O, formats,
//! drivers, configuration) under the root [`GeoTableError`]. Row-level decode
//! failures never surface here: they are counted and skipped by the decoder.
//! Everything in this module describes a failure of a whole source or call.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for geotable operations.
///
/// Display formatting is delegated to the domain-specific variants.
#[derive(Debug, Error)]
pub enum GeoTableError {
    /// Geometry column detection and decoding errors
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Projection resolution and coordinate transformation errors
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// I/O errors (file read/write, path issues)
    #[error(transparent)]
    Io(#[from] IoError),

    /// Format parsing and validation errors
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Driver lookup errors
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Errors raised by the Arrow attribute table
    #[error("Attribute table error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

/// Geometry detection and decoding errors.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// No known geometry column convention matched the table's columns
    #[error("Geometry columns not found (inspected columns: {})", columns.join(", "))]
    GeometryColumnsNotFound {
        /// The column names that were inspected, in table order
        columns: Vec<String>,
    },

    /// Every row of a non-empty source failed to decode
    #[error("No valid geometry in {source_name} ({skipped} rows could not be decoded)")]
    NoValidGeometry {
        /// The source or layer being decoded
        source_name: String,
        /// Number of rows that were skipped
        skipped: usize,
    },

    /// Well-known text could not be parsed
    #[error("WKT unparseable ({text}): {reason}")]
    InvalidWkt {
        /// The offending text
        text: String,
        /// Why parsing failed
        reason: String,
    },

    /// A layer being written mixes geometry families a format cannot hold together
    #[error("Layer '{layer}' mixes geometry kinds ({kinds})")]
    MixedGeometryKinds {
        /// The layer name
        layer: String,
        /// Comma-separated kinds found in the layer
        kinds: String,
    },
}

/// Projection errors.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Longitude or latitude outside its valid range
    #[error("Invalid coordinate (longitude={longitude}, latitude={latitude})")]
    InvalidCoordinate {
        /// The longitude that was supplied
        longitude: f64,
        /// The latitude that was supplied
        latitude: f64,
    },

    /// A projection descriptor could not be parsed
    #[error("Unsupported projection '{proj4}': {reason}")]
    UnsupportedProjection {
        /// The descriptor as given
        proj4: String,
        /// Why it was rejected
        reason: String,
    },

    /// The projection primitive rejected a coordinate
    #[error(
        "Coordinate transformation failed (source_proj4='{source_proj4}', target_proj4='{target_proj4}', wkt='{wkt}'): {reason}"
    )]
    CoordinateTransformation {
        /// Source descriptor
        source_proj4: String,
        /// Target descriptor
        target_proj4: String,
        /// The geometry being transformed
        wkt: String,
        /// Message from the projection library
        reason: String,
    },
}

/// I/O related errors.
#[derive(Debug, Error)]
pub enum IoError {
    /// Failed to read from a file
    #[error("Failed to read {format} file '{path}': {source}")]
    Read {
        /// The format being read (e.g., "CSV", "`GeoJSON`")
        format: String,
        /// The file path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failed to write to a file
    #[error("Failed to write {format} file '{path}': {source}")]
    Write {
        /// The format being written
        format: String,
        /// The file path
        path: PathBuf,
        /// The underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Path is invalid
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// The invalid path
        path: PathBuf,
        /// Why the path is invalid
        reason: String,
    },

    /// File was not found
    #[error("File not found: '{path}'")]
    FileNotFound {
        /// The missing file path
        path: PathBuf,
    },
}

/// Format parsing and validation errors.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Failed to parse a format
    #[error("Failed to parse {format}: {message}")]
    Parse {
        /// The format being parsed
        format: String,
        /// Description of the parse error
        message: String,
    },

    /// The path does not map to a supported format
    #[error("Unsupported format for '{path}'")]
    UnsupportedFormat {
        /// The path whose format could not be determined
        path: PathBuf,
    },

    /// The source contains no columns or no layers at all
    #[error("Source '{path}' is empty")]
    EmptySource {
        /// The empty source
        path: PathBuf,
    },
}

/// Driver-related errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Driver was not found in the registry
    #[error("Driver '{name}' not found. Available drivers: {available}")]
    NotFound {
        /// The requested driver name
        name: String,
        /// Comma-separated list of available drivers
        available: String,
    },

    /// Driver does not support the requested operation
    #[error("Driver '{driver}' does not support {operation}")]
    OperationNotSupported {
        /// The driver name
        driver: String,
        /// The operation that's not supported (e.g., "reading", "writing")
        operation: String,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid option value
    #[error("Invalid {option} option: {message}")]
    InvalidOption {
        /// The option name
        option: String,
        /// Why it's invalid
        message: String,
    },
}

/// Type alias for Results using `GeoTableError`.
pub type Result<T> = std::result::Result<T, GeoTableError>;

impl GeoTableError {
    /// Get a user-friendly error message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Geometry(e) => e.user_message(),
            Self::Io(e) => e.user_message(),
            Self::Driver(e) => e.user_message(),
            Self::Projection(e) => format!("Projection error: {e}"),
            Self::Format(e) => format!("Format error: {e}"),
            Self::Config(e) => format!("Configuration error: {e}"),
            Self::Arrow(e) => format!("Attribute table error: {e}"),
        }
    }

    /// Get recovery suggestions if available.
    #[must_use]
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::Geometry(e) => e.recovery_suggestion(),
            Self::Io(e) => e.recovery_suggestion(),
            Self::Projection(e) => e.recovery_suggestion(),
            Self::Driver(DriverError::NotFound { .. }) => {
                Some("Run 'geotable drivers' to see all available drivers.".to_string())
            },
            _ => None,
        }
    }

    /// Check if this error is potentially recoverable by changing options.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Projection(ProjectionError::UnsupportedProjection { .. })
                | Self::Geometry(GeometryError::GeometryColumnsNotFound { .. })
        )
    }
}

impl GeometryError {
    fn user_message(&self) -> String {
        match self {
            Self::GeometryColumnsNotFound { columns } => format!(
                "No geometry columns found.\n\nInspected columns:\n{}",
                columns
                    .iter()
                    .map(|c| format!("  - {c}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            _ => self.to_string(),
        }
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::GeometryColumnsNotFound { .. } => Some(
                "Provide a 'wkt' column, a 'latitude'/'longitude' pair or a 'lat'/'lon' pair."
                    .to_string(),
            ),
            Self::NoValidGeometry { .. } | Self::InvalidWkt { .. } => {
                Some("Validate geometries using a GIS tool before importing.".to_string())
            },
            Self::MixedGeometryKinds { .. } => {
                Some("Split the layer by geometry kind or save to CSV or GeoJSON.".to_string())
            },
        }
    }
}

impl ProjectionError {
    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::UnsupportedProjection { .. } => {
                Some("Check the proj4 string, e.g. '+proj=longlat +datum=WGS84 +no_defs'.".to_string())
            },
            Self::InvalidCoordinate { .. } => {
                Some("Longitude must be within [-180, 180] and latitude within [-90, 90].".to_string())
            },
            Self::CoordinateTransformation { .. } => {
                Some("Check that the source projection matches the data.".to_string())
            },
        }
    }
}

impl IoError {
    fn user_message(&self) -> String {
        match self {
            Self::Read { format, path, .. } => {
                format!("Failed to read {} file: {}", format, path.display())
            },
            Self::Write { format, path, .. } => {
                format!("Failed to write {} file: {}", format, path.display())
            },
            Self::FileNotFound { path } => {
                format!("File not found: {}", path.display())
            },
            Self::InvalidPath { .. } => self.to_string(),
        }
    }

    fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::FileNotFound { .. } => {
                Some("Check that the file path is correct and the file exists.".to_string())
            },
            Self::InvalidPath { .. } => {
                Some("Ensure the path is valid and properly formatted.".to_string())
            },
            _ => None,
        }
    }
}

impl DriverError {
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { name, available } => {
                format!(
                    "Driver '{name}' not found.\n\nAvailable drivers:\n{}",
                    available
                        .split(", ")
                        .map(|d| format!("  - {d}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                )
            },
            Self::OperationNotSupported { driver, operation } => {
                format!("The '{driver}' driver does not support {operation}.")
            },
        }
    }
}

/// Extension trait for adding I/O context to errors.
pub trait IoErrorExt<T> {
    /// Add read context to an error.
    ///
    /// # Errors
    ///
    /// Returns an [`IoError::Read`] if the underlying operation fails.
    fn with_read_context(self, format: &str, path: impl Into<PathBuf>) -> Result<T>;

    /// Add write context to an error.
    ///
    /// # Errors
    ///
    /// Returns an [`IoError::Write`] if the underlying operation fails.
    fn with_write_context(self, format: &str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T, E> IoErrorExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_read_context(self, format: &str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| {
            GeoTableError::Io(IoError::Read {
                format: format.to_string(),
                path: path.into(),
                source: Box::new(e),
            })
        })
    }

    fn with_write_context(self, format: &str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| {
            GeoTableError::Io(IoError::Write {
                format: format.to_string(),
                path: path.into(),
                source: Box::new(e),
            })
        })
    }
}

/// Helper to create `DriverError::NotFound` with available drivers.
#[must_use]
pub fn driver_not_found(name: &str) -> DriverError {
    use crate::drivers::get_driver_names;

    let available = get_driver_names().join(", ");
    DriverError::NotFound {
        name: name.to_string(),
        available,
    }
}
