use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn geoh5(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("geoh5-app").expect("binary exists");
    cmd.current_dir(dir).env_remove("GEOH5_CONFIG");
    cmd
}

fn uuid_of(summary: &str, needle: &str) -> String {
    let line = summary
        .lines()
        .find(|line| line.contains(needle))
        .expect("entity listed in summary");
    let start = line.find('[').expect("id opens") + 1;
    let end = line.find(']').expect("id closes");
    line[start..end].to_string()
}

#[test]
fn demo_writes_workspace_and_inspect_reads_it() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo.geoh5rs");

    geoh5(dir.path())
        .args(["demo", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("objects: 5"));
    assert!(output.exists());

    geoh5(dir.path())
        .arg("inspect")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("drillhole `DH-01`"))
        .stdout(predicate::str::contains("potential_electrode `Potentials`"))
        .stdout(predicate::str::contains("data `ab_cell_id`"));
}

#[test]
fn exec_rename_persists() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo.geoh5rs");
    let assert = geoh5(dir.path())
        .args(["demo", "--output"])
        .arg(&output)
        .assert()
        .success();
    let summary = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let surface = uuid_of(&summary, "surface `Topography`");

    geoh5(dir.path())
        .arg("exec")
        .arg(&output)
        .args(["rename", &surface, "DEM"])
        .assert()
        .success();

    geoh5(dir.path())
        .arg("inspect")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("surface `DEM`"))
        .stdout(predicate::str::contains("Topography").not());
}

#[test]
fn exec_reports_failed_commands() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo.geoh5rs");
    geoh5(dir.path())
        .args(["demo", "--output"])
        .arg(&output)
        .assert()
        .success();

    geoh5(dir.path())
        .arg("exec")
        .arg(&output)
        .args(["remove", "not-a-uuid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("remove"));
}

#[test]
fn inspect_rejects_missing_and_tampered_files() {
    let dir = tempdir().unwrap();
    geoh5(dir.path())
        .args(["inspect", "nowhere.geoh5rs"])
        .assert()
        .failure();

    let output = dir.path().join("demo.geoh5rs");
    geoh5(dir.path())
        .args(["demo", "--output"])
        .arg(&output)
        .assert()
        .success();
    let text = fs::read_to_string(&output).unwrap();
    fs::write(&output, text.replace("\"Tutorial\"", "\"Tampered\"")).unwrap();

    geoh5(dir.path())
        .arg("inspect")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("checksum"));
}

#[test]
fn config_can_disable_checksum_verification() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo.geoh5rs");
    geoh5(dir.path())
        .args(["demo", "--output"])
        .arg(&output)
        .assert()
        .success();
    let text = fs::read_to_string(&output).unwrap();
    fs::write(&output, text.replace("\"Tutorial\"", "\"Tampered\"")).unwrap();

    let config = dir.path().join("relaxed.toml");
    fs::write(&config, "[storage]\nverify_checksum = false\n").unwrap();
    geoh5(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("inspect")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("group `Tampered`"));
}

#[test]
fn demo_uses_configured_workspace_path() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config").join("default.toml"),
        "[storage]\nworkspace_path = \"from_config.geoh5rs\"\n",
    )
    .unwrap();

    geoh5(dir.path()).arg("demo").assert().success();
    assert!(dir.path().join("from_config.geoh5rs").exists());
}
