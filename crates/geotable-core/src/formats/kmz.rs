//! KML documents, plain or zipped as KMZ.
//!
//! Each `Folder` holding placemarks is a layer named after the folder;
//! placemarks outside any folder belong to a layer named after the file.
//! Coordinates are always longitude/latitude.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

use crate::error::{FormatError, IoErrorExt, Result};
use crate::formats::attributes::{Properties, batch_to_properties, properties_to_batch, value_to_text};
use crate::formats::{SourceLayer, layer_name};
use crate::geometry::{Coordinate, Geometry};
use crate::projection::LONGITUDE_LATITUDE_PROJ4;
use crate::table::GeoTable;

/// Name of the KML entry written inside a KMZ.
const KMZ_DOCUMENT: &str = "doc.kml";

/// Reads a `.kml` file.
///
/// # Errors
///
/// Fails when the file cannot be read or is not well-formed XML.
pub fn read_kml(path: &Path) -> Result<Vec<SourceLayer>> {
    let text = fs::read_to_string(path).with_read_context("KML", path)?;
    parse_kml(&text, &layer_name(path))
}

/// Reads a `.kmz` archive: the first `.kml` entry, preferring `doc.kml`.
///
/// # Errors
///
/// Fails when the archive cannot be opened, holds no KML, or the KML is not
/// well-formed.
pub fn read_kmz(path: &Path) -> Result<Vec<SourceLayer>> {
    let file = File::open(path).with_read_context("KMZ", path)?;
    let mut archive = ZipArchive::new(file).with_read_context("KMZ", path)?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let entry = names
        .iter()
        .find(|name| name.eq_ignore_ascii_case(KMZ_DOCUMENT))
        .or_else(|| names.iter().find(|name| name.to_ascii_lowercase().ends_with(".kml")))
        .ok_or_else(|| FormatError::EmptySource {
            path: path.to_path_buf(),
        })?;
    let mut text = String::new();
    archive
        .by_name(entry)
        .with_read_context("KMZ", path)?
        .read_to_string(&mut text)
        .with_read_context("KMZ", path)?;
    parse_kml(&text, &layer_name(path))
}

#[derive(Default)]
struct Placemark {
    properties: Properties,
    parts: Vec<Geometry>,
    rings: Vec<Vec<Coordinate>>,
}

impl Placemark {
    /// One geometry from the parts collected; a `MultiGeometry` must be
    /// homogeneous.
    fn geometry(&mut self) -> Option<Geometry> {
        let parts = std::mem::take(&mut self.parts);
        if parts.len() <= 1 {
            return parts.into_iter().next();
        }
        if parts.iter().all(|g| matches!(g, Geometry::Point(_))) {
            return Some(Geometry::MultiPoint(
                parts.iter().flat_map(|g| g.coordinates().copied().collect::<Vec<_>>()).collect(),
            ));
        }
        let mut lines = Vec::new();
        let mut polygons = Vec::new();
        for part in parts {
            match part {
                Geometry::LineString(line) => lines.push(line),
                Geometry::MultiLineString(more) => lines.extend(more),
                Geometry::Polygon(rings) => polygons.push(rings),
                Geometry::MultiPolygon(more) => polygons.extend(more),
                Geometry::Point(_) | Geometry::MultiPoint(_) => return None,
            }
        }
        match (lines.is_empty(), polygons.is_empty()) {
            (false, true) => Some(Geometry::MultiLineString(lines)),
            (true, false) => Some(Geometry::MultiPolygon(polygons)),
            _ => None,
        }
    }
}

struct Folder {
    name: Option<String>,
    rows: Vec<Properties>,
    geometries: Vec<Option<Geometry>>,
}

impl Folder {
    fn new() -> Self {
        Self {
            name: None,
            rows: Vec::new(),
            geometries: Vec::new(),
        }
    }

    fn into_layer(self, fallback: &str) -> Result<SourceLayer> {
        let name = self.name.unwrap_or_else(|| fallback.to_string());
        Ok(SourceLayer::new(name, properties_to_batch(&self.rows)?)
            .with_native_geometries(self.geometries)
            .with_native_proj4(Some(LONGITUDE_LATITUDE_PROJ4.to_string())))
    }
}

fn parse_coordinates(text: &str) -> Vec<Coordinate> {
    text.split_whitespace()
        .filter_map(|tuple| {
            let values: Vec<f64> = tuple
                .split(',')
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .ok()?;
            Coordinate::from_slice(&values)
        })
        .collect()
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Option<String> {
    element
        .try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn parse_error(message: impl std::fmt::Display) -> FormatError {
    FormatError::Parse {
        format: "KML".to_string(),
        message: message.to_string(),
    }
}

/// Parses KML text into layers. `document_layer` names the layer holding
/// placemarks found outside any folder.
///
/// # Errors
///
/// Fails when the text is not well-formed XML.
pub fn parse_kml(text: &str, document_layer: &str) -> Result<Vec<SourceLayer>> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut folders: Vec<Folder> = Vec::new();
    let mut finished: Vec<Folder> = Vec::new();
    let mut document = Folder::new();
    let mut placemark: Option<Placemark> = None;
    let mut data_name: Option<String> = None;
    let mut text_buffer = String::new();

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(element) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                text_buffer.clear();
                match name.as_str() {
                    "Folder" => folders.push(Folder::new()),
                    "Placemark" => placemark = Some(Placemark::default()),
                    "Data" | "SimpleData" => data_name = attribute(&element, "name"),
                    _ => {},
                }
                path.push(name);
            },
            Event::Text(content) => {
                text_buffer.push_str(&content.unescape().map_err(parse_error)?);
            },
            Event::CData(content) => {
                text_buffer.push_str(&String::from_utf8_lossy(&content));
            },
            Event::End(_) => {
                let Some(name) = path.pop() else {
                    return Err(parse_error("unbalanced closing tag").into());
                };
                let parent = path.last().map(String::as_str);
                let value = std::mem::take(&mut text_buffer);
                match (name.as_str(), parent) {
                    ("Folder", _) => {
                        if let Some(folder) = folders.pop() {
                            finished.push(folder);
                        }
                    },
                    ("Placemark", _) => {
                        if let Some(mut done) = placemark.take() {
                            let geometry = done.geometry();
                            if geometry.is_none() {
                                warn!("Placemark without a usable geometry in '{document_layer}'");
                            }
                            let target = folders.last_mut().unwrap_or(&mut document);
                            target.rows.push(done.properties);
                            target.geometries.push(geometry);
                        }
                    },
                    ("name", Some("Folder")) => {
                        if let Some(folder) = folders.last_mut() {
                            folder.name = Some(value);
                        }
                    },
                    ("name" | "description", Some("Placemark")) => {
                        if let Some(current) = placemark.as_mut() {
                            current.properties.insert(name.clone(), Value::String(value));
                        }
                    },
                    ("value", Some("Data")) | ("SimpleData", _) => {
                        if let (Some(current), Some(key)) = (placemark.as_mut(), data_name.clone()) {
                            current.properties.insert(key, Value::String(value));
                        }
                    },
                    ("coordinates", Some(owner)) => {
                        if let Some(current) = placemark.as_mut() {
                            let coordinates = parse_coordinates(&value);
                            let inside_polygon = path.iter().any(|p| p == "Polygon");
                            match owner {
                                "Point" => {
                                    if let Some(first) = coordinates.first() {
                                        current.parts.push(Geometry::Point(*first));
                                    }
                                },
                                "LinearRing" if inside_polygon => current.rings.push(coordinates),
                                "LineString" | "LinearRing" => {
                                    current.parts.push(Geometry::LineString(coordinates));
                                },
                                _ => {},
                            }
                        }
                    },
                    ("Polygon", _) => {
                        if let Some(current) = placemark.as_mut() {
                            let rings = std::mem::take(&mut current.rings);
                            if !rings.is_empty() {
                                current.parts.push(Geometry::Polygon(rings));
                            }
                        }
                    },
                    _ => {},
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    let mut layers = Vec::new();
    if !document.geometries.is_empty() {
        layers.push(document.into_layer(document_layer)?);
    }
    for folder in finished {
        if !folder.geometries.is_empty() {
            layers.push(folder.into_layer(document_layer)?);
        }
    }
    debug!("Parsed {} KML layers for '{document_layer}'", layers.len());
    Ok(layers)
}

fn write_coordinates(out: &mut String, coordinates: &[Coordinate]) {
    out.push_str("<coordinates>");
    let tuples: Vec<String> = coordinates
        .iter()
        .map(|c| match c.z {
            Some(z) => format!("{},{},{z}", c.x, c.y),
            None => format!("{},{}", c.x, c.y),
        })
        .collect();
    out.push_str(&tuples.join(" "));
    out.push_str("</coordinates>");
}

fn write_polygon(out: &mut String, rings: &[Vec<Coordinate>]) {
    out.push_str("<Polygon>");
    for (i, ring) in rings.iter().enumerate() {
        let boundary = if i == 0 { "outerBoundaryIs" } else { "innerBoundaryIs" };
        out.push_str(&format!("<{boundary}><LinearRing>"));
        write_coordinates(out, ring);
        out.push_str(&format!("</LinearRing></{boundary}>"));
    }
    out.push_str("</Polygon>");
}

fn write_geometry(out: &mut String, geometry: &Geometry) {
    match geometry {
        Geometry::Point(c) => {
            out.push_str("<Point>");
            write_coordinates(out, std::slice::from_ref(c));
            out.push_str("</Point>");
        },
        Geometry::LineString(line) => {
            out.push_str("<LineString>");
            write_coordinates(out, line);
            out.push_str("</LineString>");
        },
        Geometry::Polygon(rings) => write_polygon(out, rings),
        Geometry::MultiPoint(points) => {
            out.push_str("<MultiGeometry>");
            for point in points {
                write_geometry(out, &Geometry::Point(*point));
            }
            out.push_str("</MultiGeometry>");
        },
        Geometry::MultiLineString(lines) => {
            out.push_str("<MultiGeometry>");
            for line in lines {
                write_geometry(out, &Geometry::LineString(line.clone()));
            }
            out.push_str("</MultiGeometry>");
        },
        Geometry::MultiPolygon(polygons) => {
            out.push_str("<MultiGeometry>");
            for rings in polygons {
                write_polygon(out, rings);
            }
            out.push_str("</MultiGeometry>");
        },
    }
}

/// Renders a table as KML text, one `Folder` per layer. Coordinates are
/// written as they are; callers reproject to longitude/latitude first.
///
/// # Errors
///
/// Fails when the attributes cannot be converted to properties.
pub fn to_kml(table: &GeoTable) -> Result<String> {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<kml xmlns=\"http://www.opengis.net/kml/2.2\"><Document>",
    );
    for (name, layer) in table.split_by_layer()? {
        out.push_str(&format!("<Folder><name>{}</name>", escape(name.as_str())));
        let rows = batch_to_properties(layer.attributes())?;
        for (properties, geometry) in rows.iter().zip(layer.geometries()) {
            out.push_str("<Placemark>");
            for key in ["name", "description"] {
                if let Some(text) = properties.get(key).and_then(value_to_text) {
                    out.push_str(&format!("<{key}>{}</{key}>", escape(text.as_str())));
                }
            }
            let data: Vec<(&String, String)> = properties
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "name" | "description"))
                .filter_map(|(key, value)| value_to_text(value).map(|text| (key, text)))
                .collect();
            if !data.is_empty() {
                out.push_str("<ExtendedData>");
                for (key, text) in data {
                    out.push_str(&format!(
                        "<Data name=\"{}\"><value>{}</value></Data>",
                        escape(key.as_str()),
                        escape(text.as_str())
                    ));
                }
                out.push_str("</ExtendedData>");
            }
            write_geometry(&mut out, geometry);
            out.push_str("</Placemark>");
        }
        out.push_str("</Folder>");
    }
    out.push_str("</Document></kml>\n");
    Ok(out)
}

/// Writes a `.kml` file.
///
/// # Errors
///
/// Fails when the file cannot be written.
pub fn write_kml(table: &GeoTable, path: &Path) -> Result<()> {
    let text = to_kml(table)?;
    fs::write(path, text).with_write_context("KML", path)?;
    debug!("Wrote {} placemarks to {}", table.len(), path.display());
    Ok(())
}

/// Writes a `.kmz` archive holding a single `doc.kml`.
///
/// # Errors
///
/// Fails when the archive cannot be written.
pub fn write_kmz(table: &GeoTable, path: &Path) -> Result<()> {
    let text = to_kml(table)?;
    let file = File::create(path).with_write_context("KMZ", path)?;
    let mut archive = zip::ZipWriter::new(file);
    archive
        .start_file(KMZ_DOCUMENT, SimpleFileOptions::default())
        .with_write_context("KMZ", path)?;
    archive
        .write_all(text.as_bytes())
        .with_write_context("KMZ", path)?;
    archive.finish().with_write_context("KMZ", path)?;
    debug!("Wrote {} placemarks to {}", table.len(), path.display());
    Ok(())
}
