//! Integration tests for fleetfile loading and change detection

use std::fs;

use fleet_meta::{DataSourceSpec, Fleetfile, Identifier, Manifest, PackageType, find_manifest};
use fleet_test_utils::package::write_package;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const INITIAL: &str = r#"
requires:
  - git: https://github.com/acme/klipper-macros.git
    options:
      camera: true
  - internal: mainsail
    enabled: false
mcus:
  toolhead:
    preset: ebb36
    can-id: 0d3f2b1a9c44
"#;

#[test]
fn loads_requires_and_mcus() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.yml");
    fs::write(&path, INITIAL).unwrap();

    let file = Fleetfile::load(&path).unwrap();
    assert_eq!(file.requires().len(), 2);
    assert_eq!(file.requires()[0].options["camera"], serde_json::json!(true));
    assert!(!file.requires()[1].enabled);
    assert_eq!(file.mcus()[0].name, "toolhead");
    assert_eq!(Fleetfile::find_in(dir.path()).unwrap(), path);
}

#[test]
fn update_reports_added_and_removed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fleet.yml");
    fs::write(&path, INITIAL).unwrap();
    let mut file = Fleetfile::load(&path).unwrap();

    fs::write(
        &path,
        r#"
requires:
  - git: https://github.com/acme/klipper-macros.git
  - local: /home/pi/custom
mcus: {}
"#,
    )
    .unwrap();

    let changes = file.update().unwrap();
    assert_eq!(
        changes.added.packages.iter().map(|d| d.identifier()).collect::<Vec<_>>(),
        vec![Identifier::new("local", "/home/pi/custom")]
    );
    assert_eq!(
        changes.removed.packages.iter().map(|d| d.identifier()).collect::<Vec<_>>(),
        vec![Identifier::new("internal", "mainsail")]
    );
    assert_eq!(changes.removed.mcus.len(), 1);
    assert!(changes.added.mcus.is_empty());
    assert!(file.requires()[0].options.is_empty());

    assert!(file.update().unwrap().added.is_empty());
}

#[test]
fn manifest_is_found_in_package_directory() {
    let dir = TempDir::new().unwrap();
    let pkg = write_package(
        &dir.path().join("pkg"),
        "name: moonraker-timelapse\ntype: extension\ndata-source:\n  zip: https://github.com/acme/timelapse\n",
        &[],
    );

    assert_eq!(find_manifest(&pkg).unwrap(), pkg.join("fleet.yml"));
    let manifest = Manifest::load(&pkg).unwrap();
    assert_eq!(manifest.kind, PackageType::Extension);
    assert_eq!(
        manifest.data_source,
        Some(DataSourceSpec::Zip {
            url: "https://github.com/acme/timelapse".into()
        })
    );
    assert!(find_manifest(dir.path()).is_err());
}
