//! Geometry documents on disk: every supported format, and every way a document can be
//! rejected.

use std::path::Path;

use tempfile::TempDir;

use occupancy_kernel::{DocumentFormat, GeometryError, GeometryStore, Point, RegionMaskCache};

const YAML_LOT: &str = "\
frame_dimensions:
  width: 640
  height: 480
spots:
  - id: 1
    coordinates: [[10, 20], [110, 20], [110, 220], [10, 220]]
  - id: 2
    coordinates: [[130, 20], [230, 25], [225, 220], [125, 215]]
";

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write geometry");
    path
}

fn parse_err(json: &str) -> GeometryError {
    GeometryStore::parse(json, DocumentFormat::Json).expect_err("document must be rejected")
}

#[test]
fn yaml_document_loads_with_integer_coordinates() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(&dir, "coordinates.yml", YAML_LOT);

    let store = GeometryStore::load(&path).expect("load yaml");
    assert_eq!(store.len(), 2);
    assert_eq!(store.dimensions().width, 640);
    assert_eq!(store.spaces()[1].polygon[1], Point { x: 230, y: 25 });
    assert_eq!(store.spaces()[0].area(), 100.0 * 200.0);
}

#[test]
fn documents_survive_conversion_between_formats() {
    let dir = TempDir::new().expect("tempdir");
    let source = GeometryStore::load(&write(&dir, "lot.yaml", YAML_LOT)).expect("load yaml");

    for name in ["lot.json", "lot.toml", "copy.yml"] {
        let path = dir.path().join(name);
        source.save(&path).expect("save");
        let reloaded = GeometryStore::load(&path).expect("reload");
        assert_eq!(reloaded, source, "{name} did not reload identically");
        assert_eq!(reloaded.fingerprint(), source.fingerprint());
    }
}

#[test]
fn unsupported_extension_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(&dir, "lot.csv", "1,2,3");
    let err = GeometryStore::load(&path).expect_err("csv is not a geometry format");
    assert!(matches!(
        err.downcast_ref::<GeometryError>(),
        Some(GeometryError::UnsupportedFormat(_))
    ));
    assert!(DocumentFormat::from_path(Path::new("no_extension")).is_err());
}

#[test]
fn missing_file_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    assert!(GeometryStore::load(&dir.path().join("absent.json")).is_err());
}

#[test]
fn malformed_documents_are_rejected() {
    assert!(matches!(
        parse_err(r#"{"frame_dimensions": {"width": 10}}"#),
        GeometryError::Parse { format: "json", .. }
    ));
    assert!(GeometryStore::parse("spots: [", DocumentFormat::Yaml).is_err());
    assert!(GeometryStore::parse("spots = 3", DocumentFormat::Toml).is_err());
}

#[test]
fn structural_violations_are_rejected() {
    assert!(matches!(
        parse_err(r#"{"frame_dimensions": {"width": 0, "height": 10}, "spots": []}"#),
        GeometryError::InvalidDimensions { .. }
    ));
    assert!(matches!(
        parse_err(
            r#"{"frame_dimensions": {"width": 50, "height": 50},
                "spots": [{"id": 1, "coordinates": [[0,0],[10,0],[10,10]]}]}"#
        ),
        GeometryError::WrongPointCount { id: 1, found: 3 }
    ));
    assert!(matches!(
        parse_err(
            r#"{"frame_dimensions": {"width": 50, "height": 50},
                "spots": [{"id": 4, "coordinates": [[0,0],[50,0],[50,10],[0,10]]}]}"#
        ),
        GeometryError::OutOfFrame { id: 4, .. }
    ));
    assert!(matches!(
        parse_err(
            r#"{"frame_dimensions": {"width": 50, "height": 50},
                "spots": [
                    {"id": 2, "coordinates": [[0,0],[10,0],[10,10],[0,10]]},
                    {"id": 2, "coordinates": [[20,0],[30,0],[30,10],[20,10]]}
                ]}"#
        ),
        GeometryError::DuplicateId(2)
    ));
    assert!(matches!(
        parse_err(
            r#"{"frame_dimensions": {"width": 50, "height": 50},
                "spots": [{"id": 3, "coordinates": [[0,0],[10,10],[10,0],[0,10]]}]}"#
        ),
        GeometryError::SelfIntersecting { id: 3 }
    ));
}

#[test]
fn polygons_that_fold_or_touch_themselves_are_rejected() {
    for coordinates in [
        "[[0,0],[10,0],[5,0],[5,10]]",
        "[[0,0],[20,0],[10,0],[0,20]]",
        "[[0,0],[30,0],[30,30],[15,0]]",
    ] {
        let doc = format!(
            r#"{{"frame_dimensions": {{"width": 50, "height": 50}},
                "spots": [{{"id": 5, "coordinates": {coordinates}}}]}}"#
        );
        assert_eq!(
            parse_err(&doc),
            GeometryError::SelfIntersecting { id: 5 },
            "{coordinates} was accepted"
        );
    }
}

#[test]
fn zero_area_spaces_load_and_are_flagged_degenerate() {
    let store = GeometryStore::parse(
        r#"{"frame_dimensions": {"width": 50, "height": 50},
            "spots": [
                {"id": 1, "coordinates": [[0,0],[10,0],[10,10],[0,10]]},
                {"id": 2, "coordinates": [[5,20],[15,20],[25,20],[35,20]]}
            ]}"#,
        DocumentFormat::Json,
    )
    .expect("degenerate spaces are not load errors");

    let masks = RegionMaskCache::from_geometry(&store);
    assert_eq!(masks.degenerate_count(), 1);
    assert!(!masks.masks()[0].degenerate);
    assert!(masks.masks()[1].degenerate);
    assert_eq!(masks.masks()[0].interior_pixels(), 11 * 11);
}

#[test]
fn mask_rasterization_follows_the_polygon() {
    let store = GeometryStore::parse(
        r#"{"frame_dimensions": {"width": 40, "height": 40},
            "spots": [{"id": 1, "coordinates": [[10,0],[20,10],[10,20],[0,10]]}]}"#,
        DocumentFormat::Json,
    )
    .expect("diamond");
    let masks = RegionMaskCache::from_geometry(&store);
    let mask = &masks.masks()[0];

    assert_eq!((mask.rect.w, mask.rect.h), (21, 21));
    assert_eq!(mask.area, 200.0);
    assert!(mask.contains(10, 10));
    assert!(mask.contains(10, 0));
    assert!(!mask.contains(0, 0));
    assert!(!mask.contains(20, 20));
    assert!(mask.interior_pixels() < 21 * 21);
}
