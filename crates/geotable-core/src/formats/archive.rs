//! Zip archives of shapefiles, delimited text, GeoJSON or KML.
//!
//! The archive is extracted into a temporary directory that is removed when
//! reading finishes, whether it succeeds or not.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::TempDir;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

use crate::drivers::{self, driver_for_path};
use crate::error::{FormatError, IoErrorExt, Result};
use crate::formats::{CsvReadOptions, SourceLayer, csv, geojson, kmz, shapefile};

/// Reads every supported file inside a zip archive, in path order.
///
/// # Errors
///
/// Fails when the archive cannot be extracted, holds nothing readable, or a
/// member cannot be read.
pub fn read(path: &Path, csv_options: &CsvReadOptions) -> Result<Vec<SourceLayer>> {
    let dir = TempDir::new().with_read_context("ZIP", path)?;
    let file = File::open(path).with_read_context("ZIP", path)?;
    let mut archive = ZipArchive::new(file).with_read_context("ZIP", path)?;
    archive.extract(dir.path()).with_read_context("ZIP", path)?;
    debug!("Extracted {} entries from {}", archive.len(), path.display());

    let members = list_files(dir.path())?;
    let mut layers = Vec::new();
    for member in &members {
        let Some(driver) = driver_for_path(member) else {
            continue;
        };
        match driver.short_name {
            drivers::CSV => layers.push(csv::read(member, csv_options)?),
            drivers::GEOJSON | drivers::GEOJSON_SEQ => layers.push(geojson::read(member)?),
            drivers::SHAPEFILE if !crate::formats::is_zip(member) => layers.push(shapefile::read(member)?),
            drivers::KML => layers.extend(kmz::read_kml(member)?),
            drivers::KMZ => layers.extend(kmz::read_kmz(member)?),
            _ => {},
        }
    }
    if layers.is_empty() {
        return Err(FormatError::EmptySource {
            path: path.to_path_buf(),
        }
        .into());
    }
    info!("Read {} layers from archive {}", layers.len(), path.display());
    Ok(layers)
}

/// Every regular file below `root`, sorted by path.
fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).with_read_context("ZIP", &dir)? {
            let entry_path = entry.with_read_context("ZIP", &dir)?.path();
            if entry_path.is_dir() {
                pending.push(entry_path);
            } else {
                files.push(entry_path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Zips every file directly inside `dir` into `path`.
///
/// # Errors
///
/// Fails when a member cannot be read or the archive cannot be written.
pub fn write_directory(dir: &Path, path: &Path) -> Result<()> {
    let file = File::create(path).with_write_context("ZIP", path)?;
    let mut archive = zip::ZipWriter::new(file);
    for member in list_files(dir)? {
        let Some(name) = member.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let bytes = fs::read(&member).with_read_context("ZIP", &member)?;
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        archive.start_file(name, options).with_write_context("ZIP", path)?;
        archive.write_all(&bytes).with_write_context("ZIP", path)?;
    }
    archive.finish().with_write_context("ZIP", path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_of(dir: &Path, members: &[(&str, &str)]) -> PathBuf {
        let staging = dir.join("staging");
        fs::create_dir(&staging).unwrap();
        for (name, text) in members {
            fs::write(staging.join(name), text).unwrap();
        }
        let path = dir.join("bundle.zip");
        write_directory(&staging, &path).unwrap();
        path
    }

    #[test]
    fn test_csv_collection_is_one_layer_per_file() {
        let dir = TempDir::new().unwrap();
        let path = zip_of(
            dir.path(),
            &[
                ("b.csv", "wkt,name\nPOINT (1 1),x\n"),
                ("a.csv", "lat,lon\n1,2\n3,4\n"),
                ("a.proj4", "+proj=utm +zone=17\n"),
                ("notes.md", "ignored"),
            ],
        );
        let layers = read(&path, &CsvReadOptions::default()).unwrap();
        let names: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(layers[0].num_rows(), 2);
        assert_eq!(layers[0].native_proj4.as_deref(), Some("+proj=utm +zone=17"));
    }

    #[test]
    fn test_archive_without_readable_members_fails() {
        let dir = TempDir::new().unwrap();
        let path = zip_of(dir.path(), &[("readme.txt.bak", "nothing")]);
        assert!(read(&path, &CsvReadOptions::default()).is_err());
    }
}
