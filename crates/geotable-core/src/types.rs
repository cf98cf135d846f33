//! Summary types describing a loaded dataset.
//!
//! These back the `info` command: one [`LayerInfo`] per source layer and the
//! attribute schema shared by all of them.

use crate::geometry::BoundingBox;

/// Information about a dataset.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    /// Path to the dataset
    pub dataset: String,
    /// Driver name
    pub driver: String,
    /// Driver long name
    pub driver_long_name: String,
    /// Total number of rows with a decodable geometry
    pub row_count: usize,
    /// Layers in first-appearance order
    pub layers: Vec<LayerInfo>,
    /// Attribute fields, shared by every layer
    pub fields: Vec<FieldInfo>,
}

/// Information about one layer.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    /// Layer name
    pub name: String,
    /// Number of rows
    pub row_count: usize,
    /// Distinct geometry kinds, sorted
    pub geometry_kinds: Vec<String>,
    /// Distinct projection descriptors, sorted
    pub proj4s: Vec<String>,
    /// Extent in the layer's own coordinates
    pub bounds: Option<BoundingBox>,
}

/// Information about a field/column.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Data type
    pub data_type: String,
    /// Whether the field is nullable
    pub nullable: bool,
}
