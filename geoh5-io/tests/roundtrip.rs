use std::fs;

use geoh5_core::data::{DataSpec, DataValues};
use geoh5_core::drillhole::{MergeOptions, Survey};
use geoh5_core::geometry::Point3;
use geoh5_core::object::{Grid2D, ObjectSpec};
use geoh5_core::types::ReferenceMap;
use geoh5_core::workspace::{EntityRecord, Workspace};
use geoh5_io::{
    Geoh5Store, IoError, JsonFacade, StoreOptions, WorkspaceLoader, WorkspaceSaver,
};
use tempfile::tempdir;

fn awkward_values() -> Vec<f64> {
    vec![0.1 + 0.2, 1.0 / 3.0, std::f64::consts::PI, 1e-300, -2.5e17]
}

fn sample_workspace() -> Workspace {
    let mut ws = Workspace::new();
    let group = ws.create_group("Survey", None).unwrap();
    let vertices: Vec<Point3> = awkward_values()
        .into_iter()
        .map(|value| Point3::new(value, value * 2.0, -value))
        .collect();
    let curve = ws
        .create_object(
            ObjectSpec::curve("line", vertices)
                .with_parts(vec![0, 0, 0, 1, 1])
                .with_parent(group),
        )
        .unwrap();
    ws.add_data(
        curve,
        vec![
            DataSpec::new("tmi", DataValues::Float(awkward_values())),
            DataSpec::new(
                "lith",
                DataValues::Referenced(vec![1, 2, 0]),
            )
            .with_value_map(ReferenceMap::assign(["Sand", "Clay"]).unwrap()),
        ],
    )
    .unwrap();
    ws.add_data_to_group(curve, &["tmi"], "mag").unwrap();

    let grid = Grid2D::new(Point3::new(0.0, 0.0, 10.0), [3, 2], [5.0, 5.0], 15.0).unwrap();
    let grid_id = ws.create_object(ObjectSpec::grid2d("grid", grid)).unwrap();
    ws.add_data(
        grid_id,
        vec![DataSpec::new("flags", DataValues::Boolean(vec![true, false, true, true, false, false]))],
    )
    .unwrap();

    let hole = ws
        .create_object(ObjectSpec::drillhole("DH1", Point3::new(100.0, 200.0, 50.0)))
        .unwrap();
    ws.add_surveys(hole, &[Survey::new(0.0, 45.0, -80.0), Survey::new(60.0, 50.0, -75.0)])
        .unwrap();
    let options = MergeOptions::default();
    ws.add_point_log(hole, "au", &[(1.5, 0.25), (12.0, 1.75)], &options)
        .unwrap();
    ws.add_interval_log(hole, "lith", &[(0.0, 10.0, 1.0), (10.0, 22.5, 2.0)], &options)
        .unwrap();
    ws
}

#[test]
fn save_and_load_preserves_entities_bit_exact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("survey.geoh5rs");
    let ws = sample_workspace();

    let facade = JsonFacade::new();
    facade.save(&ws, &path).expect("save workspace");
    let loaded = facade.load(&path).expect("load workspace");

    assert_eq!(loaded.root(), ws.root());
    assert_eq!(loaded.walk(), ws.walk());
    for object in ws.objects() {
        let reloaded = loaded.object(object.id).expect("object survives");
        assert_eq!(reloaded, object);
        for (a, b) in reloaded.vertices().iter().zip(object.vertices()) {
            assert_eq!(a.x().to_bits(), b.x().to_bits());
            assert_eq!(a.y().to_bits(), b.y().to_bits());
            assert_eq!(a.z().to_bits(), b.z().to_bits());
        }
    }
    for data in ws.all_data() {
        assert_eq!(loaded.data(data.id), Some(data));
    }
    let line = loaded.find_object("line").unwrap();
    let tmi = loaded.data_by_name(line.id, "tmi").unwrap();
    let bits: Vec<u64> = tmi.values.as_float().unwrap().iter().map(|v| v.to_bits()).collect();
    let expected: Vec<u64> = awkward_values().iter().map(|v| v.to_bits()).collect();
    assert_eq!(bits, expected);
    assert_eq!(loaded.data_types().count(), ws.data_types().count());
    assert!(!loaded.is_modified());
}

#[test]
fn no_data_values_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nodata.geoh5rs");
    let mut ws = Workspace::new();
    let points = ws
        .create_object(ObjectSpec::points(
            "pts",
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)],
        ))
        .unwrap();
    let data_id = ws
        .add_data(
            points,
            vec![DataSpec::new(
                "grade",
                DataValues::Float(vec![1.0, f64::NAN, f64::INFINITY]),
            )],
        )
        .unwrap()[0];
    let hole = ws
        .create_object(ObjectSpec::drillhole("DH", Point3::new(0.0, 0.0, 0.0)))
        .unwrap();
    let options = MergeOptions::default();
    ws.add_point_log(hole, "au", &[(1.0, f64::NAN), (2.0, 0.5)], &options)
        .unwrap();

    let facade = JsonFacade::new();
    facade.save(&ws, &path).expect("save workspace with NaN");
    let mut loaded = facade.load(&path).expect("reopen workspace with NaN");

    let values = loaded.data(data_id).unwrap().values.as_float().unwrap();
    assert_eq!(values[0], 1.0);
    assert!(values[1].is_nan());
    assert_eq!(values[2], f64::INFINITY);

    let log = loaded
        .object(hole)
        .unwrap()
        .drillhole()
        .unwrap()
        .point_log()
        .unwrap();
    let au = log.column("au").unwrap();
    assert!(au[0].is_some_and(f64::is_nan));
    assert_eq!(au[1], Some(0.5));
    assert!(loaded.add_point_log(hole, "au", &[(1.0, 3.0)], &options).is_err());
}

#[test]
fn flush_leaves_no_temp_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ws.geoh5rs");
    JsonFacade::new().save(&sample_workspace(), &path).unwrap();

    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["ws.geoh5rs".to_string()]);
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("GEOH5RS 1\nsha256:"));
}

#[test]
fn tampered_body_fails_checksum() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ws.geoh5rs");
    JsonFacade::new().save(&sample_workspace(), &path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, text.replace("\"DH1\"", "\"DH2\"")).unwrap();

    let err = JsonFacade::new().load(&path).unwrap_err();
    assert!(matches!(err, IoError::ChecksumMismatch { .. }));

    let relaxed = JsonFacade::with_options(StoreOptions {
        verify_checksum: false,
    });
    let ws = relaxed.load(&path).expect("load without verification");
    assert!(ws.find_object("DH2").is_some());
}

#[test]
fn garbage_file_is_invalid_format() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("junk.geoh5rs");
    fs::write(&path, "HDF5 not really\n").unwrap();
    assert!(matches!(
        Geoh5Store::open(&path),
        Err(IoError::InvalidFormat(_))
    ));
    assert!(matches!(
        JsonFacade::new().load(&dir.path().join("missing.geoh5rs")),
        Err(IoError::ReadError { .. })
    ));
}

#[test]
fn store_reads_and_writes_single_entities() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.geoh5rs");
    let ws = sample_workspace();

    let mut store = Geoh5Store::open(&path).unwrap();
    assert!(store.is_empty());
    store.replace_with(&ws);
    store.flush().unwrap();
    assert!(!store.is_dirty());

    let mut reopened = Geoh5Store::open(&path).unwrap();
    let hole = ws.find_object("DH1").unwrap();
    let Some(EntityRecord::Object(record)) = reopened.read_entity(hole.id).cloned() else {
        panic!("drillhole record missing");
    };
    assert_eq!(&record, hole);

    let mut renamed = record.clone();
    renamed.name = "DH1-b".to_string();
    reopened.write_entity(EntityRecord::Object(renamed));
    assert!(reopened.is_dirty());
    reopened.flush().unwrap();

    let rebuilt = Geoh5Store::open(&path).unwrap().to_workspace().unwrap();
    assert_eq!(rebuilt.object(hole.id).unwrap().name, "DH1-b");
    assert_eq!(
        rebuilt.object(hole.id).unwrap().drillhole(),
        hole.drillhole()
    );
}
