//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures and formatting functions
//! for presenting dataset and driver information in a human-readable format.

use tabled::{Table, Tabled};

use geotable_core::drivers::Driver;
use geotable_core::types::{DatasetInfo, LayerInfo};

/// Table row representation for displaying layer information.
#[derive(Tabled)]
pub struct LayerRow {
    #[tabled(rename = "Layer")]
    pub name: String,
    #[tabled(rename = "Rows")]
    pub row_count: usize,
    /// Distinct geometry kinds in the layer.
    #[tabled(rename = "Geometry")]
    pub geometry_kinds: String,
    /// Projection descriptor(s) of the layer.
    #[tabled(rename = "Projection")]
    pub proj4: String,
    /// Extent as `minx, miny, maxx, maxy`.
    #[tabled(rename = "Extent")]
    pub extent: String,
}

impl From<&LayerInfo> for LayerRow {
    fn from(layer: &LayerInfo) -> Self {
        Self {
            name: layer.name.clone(),
            row_count: layer.row_count,
            geometry_kinds: layer.geometry_kinds.join(", "),
            proj4: layer.proj4s.join("\n"),
            extent: layer.bounds.map_or_else(
                || "N/A".to_string(),
                |b| format!("{}, {}, {}, {}", b.min_x, b.min_y, b.max_x, b.max_y),
            ),
        }
    }
}

/// Table row representation for displaying field/column information.
#[derive(Tabled)]
pub struct FieldRow {
    /// Name of the field.
    #[tabled(rename = "Field")]
    pub name: String,
    /// Data type of the field.
    #[tabled(rename = "Type")]
    pub data_type: String,
    /// Whether the field can contain null values.
    #[tabled(rename = "Nullable")]
    pub nullable: String,
}

/// Table row representation for displaying driver information.
#[derive(Tabled)]
pub struct DriverRow {
    /// Short identifier for the driver (e.g., `GeoJSON`, `KMZ`).
    #[tabled(rename = "Short Name")]
    pub short_name: String,
    /// Full descriptive name of the driver format.
    #[tabled(rename = "Long Name")]
    pub long_name: String,
    #[tabled(rename = "Extensions")]
    pub extensions: String,
    /// Support status for reading dataset metadata and information.
    #[tabled(rename = "Info")]
    pub info: String,
    /// Support status for reading data from this format.
    #[tabled(rename = "Read")]
    pub read: String,
    /// Support status for writing data to this format.
    #[tabled(rename = "Write")]
    pub write: String,
}

impl From<&Driver> for DriverRow {
    fn from(d: &Driver) -> Self {
        Self {
            short_name: d.short_name.to_string(),
            long_name: d.long_name.to_string(),
            extensions: d.extensions.join(", "),
            info: d.capabilities.info.as_str().to_string(),
            read: d.capabilities.read.as_str().to_string(),
            write: d.capabilities.write.as_str().to_string(),
        }
    }
}

/// Display dataset information in formatted tables.
///
/// Presents the driver, one row per layer and the shared field schema,
/// written to standard output.
pub fn display_dataset_info(info: &DatasetInfo) {
    println!("\nDataset: {}", info.dataset);
    println!("Driver: {} ({})", info.driver, info.driver_long_name);
    println!("Rows: {}", info.row_count);

    if !info.layers.is_empty() {
        println!("\n=== Layers ===");
        let layer_rows: Vec<LayerRow> = info.layers.iter().map(LayerRow::from).collect();
        println!("{}", Table::new(layer_rows));
    }

    if !info.fields.is_empty() {
        println!("\n=== Fields ===");

        let field_rows: Vec<FieldRow> = info
            .fields
            .iter()
            .map(|f| FieldRow {
                name: f.name.clone(),
                data_type: f.data_type.clone(),
                nullable: if f.nullable { "Yes" } else { "No" }.to_string(),
            })
            .collect();

        println!("{}", Table::new(field_rows));
    }
}

/// Display the driver registry as a table.
pub fn display_drivers(drivers: &[Driver]) {
    println!("\nAvailable Drivers ({} total):\n", drivers.len());
    let rows: Vec<DriverRow> = drivers.iter().map(DriverRow::from).collect();
    println!("{}", Table::new(rows));
}
