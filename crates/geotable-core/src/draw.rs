//! SVG rendering of a geotable for a quick look.
//!
//! Each layer gets a colour from a fixed palette in first-appearance order.
//! Coordinates are drawn as they are, with y pointing up.

use std::fs;
use std::path::Path;

use quick_xml::escape::escape;

use crate::error::{IoErrorExt, Result};
use crate::geometry::{BoundingBox, Coordinate, Geometry};
use crate::table::GeoTable;

const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

const CANVAS: f64 = 800.0;
const MARGIN: f64 = 10.0;

/// Colour of each layer, in first-appearance order.
#[must_use]
pub fn layer_colors(table: &GeoTable) -> Vec<(String, &'static str)> {
    table
        .layer_names()
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), PALETTE[i % PALETTE.len()]))
        .collect()
}

/// Maps table coordinates onto the canvas.
struct Viewport {
    bounds: BoundingBox,
    scale: f64,
}

impl Viewport {
    fn new(bounds: BoundingBox) -> Self {
        let span = (bounds.max_x - bounds.min_x).max(bounds.max_y - bounds.min_y);
        let scale = if span > 0.0 {
            (CANVAS - 2.0 * MARGIN) / span
        } else {
            1.0
        };
        Self { bounds, scale }
    }

    fn project(&self, c: &Coordinate) -> (f64, f64) {
        (
            MARGIN + (c.x - self.bounds.min_x) * self.scale,
            MARGIN + (self.bounds.max_y - c.y) * self.scale,
        )
    }

    fn points(&self, coordinates: &[Coordinate]) -> String {
        coordinates
            .iter()
            .map(|c| {
                let (x, y) = self.project(c);
                format!("{x:.2},{y:.2}")
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn ring_path(&self, ring: &[Coordinate], out: &mut String) {
        for (i, c) in ring.iter().enumerate() {
            let (x, y) = self.project(c);
            out.push_str(&format!("{}{x:.2},{y:.2} ", if i == 0 { "M" } else { "L" }));
        }
        out.push_str("Z ");
    }
}

fn draw_polygons(out: &mut String, view: &Viewport, polygons: &[&Vec<Vec<Coordinate>>], color: &str) {
    let mut d = String::new();
    for rings in polygons {
        for ring in rings.iter() {
            view.ring_path(ring, &mut d);
        }
    }
    out.push_str(&format!(
        "  <path d=\"{}\" fill=\"{color}\" fill-opacity=\"0.4\" fill-rule=\"evenodd\" stroke=\"{color}\"/>\n",
        d.trim_end()
    ));
}

fn draw_geometry(out: &mut String, view: &Viewport, geometry: &Geometry, color: &str) {
    match geometry {
        Geometry::Point(c) => {
            let (x, y) = view.project(c);
            out.push_str(&format!("  <circle cx=\"{x:.2}\" cy=\"{y:.2}\" r=\"3\" fill=\"{color}\"/>\n"));
        },
        Geometry::MultiPoint(points) => {
            for c in points {
                draw_geometry(out, view, &Geometry::Point(*c), color);
            }
        },
        Geometry::LineString(line) => {
            out.push_str(&format!(
                "  <polyline points=\"{}\" fill=\"none\" stroke=\"{color}\"/>\n",
                view.points(line)
            ));
        },
        Geometry::MultiLineString(lines) => {
            for line in lines {
                draw_geometry(out, view, &Geometry::LineString(line.clone()), color);
            }
        },
        Geometry::Polygon(rings) => draw_polygons(out, view, &[rings], color),
        Geometry::MultiPolygon(polygons) => {
            draw_polygons(out, view, &polygons.iter().collect::<Vec<_>>(), color);
        },
    }
}

/// Renders every geometry of `table` as an SVG document.
#[must_use]
pub fn draw(table: &GeoTable) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let size = CANVAS as u32;
    let mut out = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{size}\" height=\"{size}\" viewBox=\"0 0 {size} {size}\">\n"
    );
    if let Some(bounds) = BoundingBox::of(table.geometries()) {
        let view = Viewport::new(bounds);
        for (layer, color) in layer_colors(table) {
            out.push_str(&format!(" <g id=\"{}\">\n", escape(layer.as_str())));
            for (geometry, _) in table
                .geometries()
                .iter()
                .zip(table.layers())
                .filter(|(_, name)| **name == layer)
            {
                draw_geometry(&mut out, &view, geometry, color);
            }
            out.push_str(" </g>\n");
        }
    }
    out.push_str("</svg>\n");
    out
}

/// Writes [`draw`] output to `path`.
///
/// # Errors
///
/// Fails when the file cannot be written.
pub fn write_svg(table: &GeoTable, path: &Path) -> Result<()> {
    fs::write(path, draw(table)).with_write_context("SVG", path)
}
