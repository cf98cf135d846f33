use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use approx::assert_relative_eq;
use geotable_core::detect::{DecodingPlan, detect};
use geotable_core::error::{GeoTableError, GeometryError, ProjectionError};
use geotable_core::operations::{LoadOptions, SaveOptions, convert, load, load_utm_proj4, save};
use geotable_core::projection::{LONGITUDE_LATITUDE_PROJ4, SPHERICAL_MERCATOR_PROJ4, normalize_proj4, resolve_utm};
use geotable_core::transform::transform;
use geotable_core::{BoundingBox, Coordinate, Geometry, GeometryKind, ProjectionReference};
use tempfile::TempDir;

const UTM_31: &str = "+proj=utm +zone=31 +datum=WGS84 +units=m +no_defs";

fn fixture(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

fn shapes_csv(dir: &TempDir) -> PathBuf {
    fixture(
        dir,
        "shapes.csv",
        "name,wkt\n\
         stop,POINT (-73.98 40.75)\n\
         route,\"LINESTRING (-74 40.7, -73.9 40.8, -73.8 40.75)\"\n\
         park,\"POLYGON ((-73.97 40.76, -73.95 40.8, -73.93 40.79, -73.97 40.76))\"\n",
    )
}

#[test]
fn test_detect_priority_prefers_wkt() {
    let plan = detect(&["lat", "lon", "wkt", "name"]).unwrap();
    assert_eq!(
        plan,
        DecodingPlan::WellKnownText {
            column: "wkt".to_string(),
            swap_xy: false,
        }
    );
    let plan = detect(&["latitude", "longitude", "lat", "lon"]).unwrap();
    assert_eq!(
        plan,
        DecodingPlan::LatLonPair {
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
        }
    );
}

#[test]
fn test_bounding_box_keeps_two_of_three() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "points.csv", "wkt\nPOINT (0 0)\nPOINT (5 5)\nPOINT (20 20)\n");
    let table = load(
        &path,
        &LoadOptions::new().with_bounding_box(BoundingBox::new(-1.0, -1.0, 10.0, 10.0)),
    )?;
    assert_eq!(
        table.geometries(),
        &[Geometry::point(0.0, 0.0), Geometry::point(5.0, 5.0)]
    );
    Ok(())
}

#[test]
fn test_drop_z() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "points.csv", "wkt\nPOINT Z (1 2 3)\n");
    let kept = load(&path, &LoadOptions::default())?;
    assert_eq!(kept.geometries()[0], Geometry::Point(Coordinate::xyz(1.0, 2.0, 3.0)));
    let dropped = load(&path, &LoadOptions::new().with_drop_z(true))?;
    assert_eq!(dropped.geometries()[0], Geometry::point(1.0, 2.0));
    Ok(())
}

#[test]
fn test_malformed_rows_are_skipped_unless_all_fail() -> Result<()> {
    let dir = TempDir::new()?;
    let mut text = String::from("id,wkt\n");
    for i in 0..9 {
        text.push_str(&format!("{i},POINT ({i} {i})\n"));
    }
    text.push_str("9,POINT (oops)\n");
    let path = fixture(&dir, "mostly_good.csv", &text);
    assert_eq!(load(&path, &LoadOptions::default())?.len(), 9);

    let bad: String = std::iter::once("id,wkt\n".to_string())
        .chain((0..10).map(|i| format!("{i},not wkt\n")))
        .collect();
    let path = fixture(&dir, "all_bad.csv", &bad);
    let err = load(&path, &LoadOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        GeoTableError::Geometry(GeometryError::NoValidGeometry { skipped: 10, .. })
    ));
    Ok(())
}

#[test]
fn test_reprojection_identity_is_exact() -> Result<()> {
    let geometry = Geometry::from_wkt("LINESTRING Z (0.1 0.2 3, 1.000000001 2.3 4)")?;
    assert_eq!(transform(&geometry, UTM_31, UTM_31)?, geometry);
    assert_eq!(
        transform(&geometry, LONGITUDE_LATITUDE_PROJ4, LONGITUDE_LATITUDE_PROJ4)?,
        geometry
    );
    Ok(())
}

#[test]
fn test_utm_zones() -> Result<()> {
    let new_york = resolve_utm(-74.0, 40.7)?;
    assert!(new_york.contains("+zone=18"));
    assert!(!new_york.contains("+south"));
    let sydney = resolve_utm(151.2, -33.9)?;
    assert!(sydney.contains("+zone=56"));
    assert!(sydney.contains("+south"));
    Ok(())
}

#[test]
fn test_load_utm_proj4_uses_centroid() -> Result<()> {
    let dir = TempDir::new()?;
    let path = shapes_csv(&dir);
    let proj4 = load_utm_proj4(&path)?;
    assert!(proj4.starts_with("+proj=utm +zone=18 "));
    Ok(())
}

#[test]
fn test_load_with_target_reprojects_every_row() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "point.csv", "wkt\nPOINT (-36.508 -54.2815)\n");
    let table = load(
        &path,
        &LoadOptions::new().with_target_proj4("mercator".parse()?),
    )?;
    assert_eq!(table.proj4s()[0], normalize_proj4(SPHERICAL_MERCATOR_PROJ4));
    let Geometry::Point(c) = &table.geometries()[0] else {
        panic!("expected a point");
    };
    assert_relative_eq!(c.x, -4_064_052.0, epsilon = 1.0);
    assert_relative_eq!(c.y, -7_223_650.5, epsilon = 1.0);
    Ok(())
}

#[test]
fn test_spatial_filter_applies_before_reprojection() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "utm.csv", "wkt\nPOINT (500000 0)\nPOINT (600000 100000)\n");
    fixture(&dir, "utm.proj4", UTM_31);

    let table = load(
        &path,
        &LoadOptions::new()
            .with_bounding_box(BoundingBox::new(400_000.0, -1.0, 550_000.0, 1.0))
            .with_target_proj4(ProjectionReference::Named(
                geotable_core::projection::WellKnownProjection::LongitudeLatitude,
            )),
    )?;
    assert_eq!(table.len(), 1);
    assert!(table.has_standard_proj4());
    let Geometry::Point(c) = &table.geometries()[0] else {
        panic!("expected a point");
    };
    assert_relative_eq!(c.x, 3.0, epsilon = 1e-6);
    assert_relative_eq!(c.y, 0.0, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_explicit_source_projection_beats_sidecar() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(&dir, "utm.csv", "wkt\nPOINT (500000 0)\n");
    fixture(&dir, "utm.proj4", "+proj=utm +zone=17 +datum=WGS84 +units=m +no_defs");

    let table = load(&path, &LoadOptions::new().with_source_proj4(UTM_31.parse()?))?;
    assert_eq!(table.proj4s()[0], UTM_31);
    let table = load(&path, &LoadOptions::default())?;
    assert_eq!(table.proj4s()[0], "+proj=utm +zone=17 +datum=WGS84 +units=m +no_defs");
    Ok(())
}

#[test]
fn test_csv_and_geojson_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let original = load(shapes_csv(&dir), &LoadOptions::default())?;

    for name in ["copy.csv", "copy.geojson"] {
        let path = dir.path().join(name);
        save(&original, &path, &SaveOptions::default())?;
        let reloaded = load(&path, &LoadOptions::default())?;
        assert_eq!(reloaded.geometries(), original.geometries(), "{name}");
        assert_eq!(reloaded.len(), 3);
    }
    Ok(())
}

#[test]
fn test_shapefile_archive_round_trip_splits_layers() -> Result<()> {
    let dir = TempDir::new()?;
    let path = fixture(
        &dir,
        "mixed.csv",
        "name,wkt,geometry_layer\n\
         a,POINT (1 2),stops\n\
         b,\"LINESTRING (0 0, 1 1)\",routes\n\
         c,POINT (3 4),stops\n",
    );
    let archive = dir.path().join("mixed.zip");
    let rows = convert(&path, &archive, &LoadOptions::default(), &SaveOptions::default())?;
    assert_eq!(rows, 3);

    let reloaded = load(&archive, &LoadOptions::default())?;
    assert_eq!(reloaded.layer_names(), vec!["routes", "stops"]);
    let stops = reloaded.select_layers(&["stops"])?;
    assert_eq!(
        stops.geometries(),
        &[Geometry::point(1.0, 2.0), Geometry::point(3.0, 4.0)]
    );
    let routes = reloaded.select_layers(&["routes"])?;
    assert_eq!(routes.geometries()[0].kind(), GeometryKind::LineString);
    Ok(())
}

#[test]
fn test_kmz_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let original = load(shapes_csv(&dir), &LoadOptions::default())?;
    let path = dir.path().join("shapes.kmz");
    save(&original, &path, &SaveOptions::default())?;

    let reloaded = load(&path, &LoadOptions::default())?;
    assert_eq!(reloaded.layer_names(), vec!["shapes"]);
    assert_eq!(reloaded.geometries(), original.geometries());
    assert!(reloaded.has_standard_proj4());
    Ok(())
}

#[test]
fn test_save_reprojects_to_target() -> Result<()> {
    let dir = TempDir::new()?;
    let original = load(shapes_csv(&dir), &LoadOptions::default())?;
    let path = dir.path().join("utm.csv");
    save(&original, &path, &SaveOptions::new().with_target_proj4("utm".parse()?))?;

    let text = fs::read_to_string(&path)?;
    assert!(text.lines().next().unwrap_or_default().ends_with("geometry_proj4"));
    let reloaded = load(&path, &LoadOptions::default())?;
    assert!(reloaded.proj4s()[0].contains("+zone=18"));
    let back = reloaded.reproject(LONGITUDE_LATITUDE_PROJ4)?;
    let Geometry::Point(c) = &back.geometries()[0] else {
        panic!("expected a point");
    };
    assert_relative_eq!(c.x, -73.98, epsilon = 1e-6);
    assert_relative_eq!(c.y, 40.75, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_unparseable_target_projection_fails_without_output() -> Result<()> {
    let dir = TempDir::new()?;
    let path = shapes_csv(&dir);
    let nonsense = ProjectionReference::Explicit("+proj=nonsense +zone=x".to_string());

    let err = load(&path, &LoadOptions::new().with_target_proj4(nonsense.clone())).unwrap_err();
    assert!(matches!(
        err,
        GeoTableError::Projection(ProjectionError::UnsupportedProjection { .. })
    ));

    let table = load(&path, &LoadOptions::default())?;
    let output = dir.path().join("out.geojson");
    let err = save(&table, &output, &SaveOptions::new().with_target_proj4(nonsense)).unwrap_err();
    assert!(matches!(
        err,
        GeoTableError::Projection(ProjectionError::UnsupportedProjection { .. })
    ));
    assert!(!output.exists());
    Ok(())
}

#[test]
fn test_utm_rejects_out_of_range_coordinates() -> Result<()> {
    assert!(matches!(
        resolve_utm(181.0, 0.0).unwrap_err(),
        GeoTableError::Projection(ProjectionError::InvalidCoordinate { .. })
    ));
    assert!(matches!(
        resolve_utm(0.0, -91.0).unwrap_err(),
        GeoTableError::Projection(ProjectionError::InvalidCoordinate { .. })
    ));

    let dir = TempDir::new()?;
    let path = fixture(&dir, "polar.csv", "wkt\nPOINT (10 95)\nPOINT (20 105)\n");
    let err = load_utm_proj4(&path).unwrap_err();
    let GeoTableError::Projection(ProjectionError::InvalidCoordinate { longitude, latitude }) = err
    else {
        panic!("expected an invalid coordinate, got {err:?}");
    };
    assert_relative_eq!(longitude, 15.0, epsilon = 1e-9);
    assert_relative_eq!(latitude, 100.0, epsilon = 1e-9);
    Ok(())
}
