//! `geotable-core` loads heterogeneous geospatial files into one table of
//! attribute rows, each paired with a geometry, a source layer name and a
//! projection descriptor, and writes that table back out in any supported
//! format and projection.
//!
//! This crate includes:
//! - **Driver Registry**: A static registry of supported formats and their capabilities.
//! - **Geometry Detection**: Discovery of the columns that encode geometry in a plain table.
//! - **Decoding**: Row-by-row geometry decoding with skip-and-count of malformed rows and spatial filters.
//! - **Projection**: Descriptor resolution (explicit, sidecar, embedded, default) and UTM selection.
//! - **Reprojection**: Coordinate transformation through PROJ, grouped by source descriptor.
//! - **Operations**: `load`, `save`, `convert`, `describe` and `load_utm_proj4`.
//!
//! ```no_run
//! use geotable_core::operations::{LoadOptions, SaveOptions, load, save};
//!
//! let table = load("parcels.zip", &LoadOptions::new().with_target_proj4("lonlat".parse()?))?;
//! save(&table, "parcels.geojson", &SaveOptions::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod decode;
pub mod detect;
pub mod draw;
pub mod drivers;
pub mod error;
pub mod formats;
pub mod geometry;
pub mod operations;
pub mod projection;
pub mod table;
pub mod transform;
pub mod types;

pub use error::{GeoTableError, Result};
pub use geometry::{BoundingBox, Coordinate, Geometry, GeometryKind};
pub use projection::ProjectionReference;
pub use table::GeoTable;
