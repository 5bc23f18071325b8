//! Setup-document loader tests.
//!
//! Tests for `SetupConfig::load`: required-field enforcement, duplicate
//! detection (bus / name / address), diagnostic-flag consistency, pdo
//! requiredness, and the configuration-file path resolution rule
//! (absolute / `~`-expanded / relative-to-document).

use ecat_common::config::{ConfigError, DeviceType, PdoVariant, SetupConfig};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write a device configuration file and return its file name.
fn write_device_config(dir: &Path, file_name: &str) {
    fs::write(dir.join(file_name), "# device configuration\n").unwrap();
}

/// A well-formed single-master, two-device setup document.
fn write_valid_setup(dir: &Path) {
    write_device_config(dir, "drive1.toml");
    write_device_config(dir, "sensor1.toml");
    fs::write(
        dir.join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "joint_drive"
name = "drive1"
configuration_file = "drive1.toml"
ethercat_address = 5
ethercat_bus = "eth0"
ethercat_pdo_type = "A"

[[devices]]
type = "force_sensor"
name = "sensor1"
configuration_file = "sensor1.toml"
ethercat_address = 6
ethercat_bus = "eth0"
"#,
    )
    .unwrap();
}

// ─── Happy path ─────────────────────────────────────────────────────

#[test]
fn load_valid_setup() {
    let tmp = TempDir::new().unwrap();
    write_valid_setup(tmp.path());

    let config = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap();
    assert_eq!(config.masters.len(), 1);
    assert_eq!(config.devices.len(), 2);
    assert_eq!(config.masters[0].bus, "eth0");
    assert_eq!(config.devices[0].device_type, DeviceType::JointDrive);
    assert_eq!(config.devices[0].ethercat_pdo_type, Some(PdoVariant::A));
    // Relative paths are resolved against the document's directory.
    assert_eq!(
        config.devices[0].configuration_file,
        tmp.path().join("drive1.toml")
    );
}

#[test]
fn load_missing_document_fails() {
    let tmp = TempDir::new().unwrap();
    let err = SetupConfig::load(&tmp.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

// ─── Required fields ────────────────────────────────────────────────

#[test]
fn load_rejects_missing_required_master_field() {
    let tmp = TempDir::new().unwrap();
    write_device_config(tmp.path(), "drive1.toml");
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "servo_drive"
name = "drive1"
configuration_file = "drive1.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let err = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap_err();
    match err {
        ConfigError::Parse { message, .. } => {
            assert!(message.contains("update_rate_warn_threshold"), "{message}");
        }
        other => panic!("expected Parse error, got {other:?}"),
    }
}

#[test]
fn load_rejects_unknown_type_tag() {
    let tmp = TempDir::new().unwrap();
    write_device_config(tmp.path(), "drive1.toml");
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "teleporter"
name = "drive1"
configuration_file = "drive1.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let err = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "{err:?}");
}

#[test]
fn load_rejects_unknown_keys() {
    let tmp = TempDir::new().unwrap();
    write_device_config(tmp.path(), "drive1.toml");
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false
frobnication_level = 9

[[devices]]
type = "servo_drive"
name = "drive1"
configuration_file = "drive1.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let err = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "{err:?}");
}

// ─── Cross-entry validation ─────────────────────────────────────────

#[test]
fn load_rejects_duplicate_bus_identifier() {
    let tmp = TempDir::new().unwrap();
    write_device_config(tmp.path(), "drive1.toml");
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.002
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "servo_drive"
name = "drive1"
configuration_file = "drive1.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let err = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap_err();
    assert!(
        err.to_string().contains("duplicate bus identifier 'eth0'"),
        "{err}"
    );
}

#[test]
fn load_rejects_log_error_counters_without_bus_diagnosis() {
    let tmp = TempDir::new().unwrap();
    write_device_config(tmp.path(), "drive1.toml");
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = true

[[devices]]
type = "servo_drive"
name = "drive1"
configuration_file = "drive1.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let err = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap_err();
    assert!(err.to_string().contains("requires bus_diagnosis"), "{err}");
}

#[test]
fn load_rejects_missing_pdo_variant_for_joint_drive() {
    let tmp = TempDir::new().unwrap();
    write_device_config(tmp.path(), "drive1.toml");
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "joint_drive"
name = "drive1"
configuration_file = "drive1.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let err = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap_err();
    assert!(err.to_string().contains("ethercat_pdo_type"), "{err}");
}

// ─── Path resolution ────────────────────────────────────────────────

#[test]
fn load_rejects_nonexistent_configuration_file() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "servo_drive"
name = "drive1"
configuration_file = "missing.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let err = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap_err();
    match err {
        ConfigError::MissingDeviceConfig { device, .. } => assert_eq!(device, "drive1"),
        other => panic!("expected MissingDeviceConfig, got {other:?}"),
    }
}

#[test]
fn load_resolves_absolute_paths_as_is() {
    let tmp = TempDir::new().unwrap();
    let abs_dir = TempDir::new().unwrap();
    write_device_config(abs_dir.path(), "drive1.toml");
    let abs_path = abs_dir.path().join("drive1.toml");

    fs::write(
        tmp.path().join("setup.toml"),
        format!(
            r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "servo_drive"
name = "drive1"
configuration_file = "{}"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
            abs_path.display()
        ),
    )
    .unwrap();

    let config = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap();
    assert_eq!(config.devices[0].configuration_file, abs_path);
}

#[test]
fn load_expands_home_prefixed_paths() {
    let tmp = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();
    fs::create_dir(home.path().join("devices")).unwrap();
    write_device_config(&home.path().join("devices"), "drive1.toml");

    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "servo_drive"
name = "drive1"
configuration_file = "~/devices/drive1.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let config =
        SetupConfig::load_with_home(&tmp.path().join("setup.toml"), Some(home.path())).unwrap();
    assert_eq!(
        config.devices[0].configuration_file,
        home.path().join("devices/drive1.toml")
    );
}

#[test]
fn load_fails_on_home_prefix_without_home() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "servo_drive"
name = "drive1"
configuration_file = "~/devices/drive1.toml"
ethercat_address = 1
ethercat_bus = "eth0"
"#,
    )
    .unwrap();

    let err = SetupConfig::load_with_home(&tmp.path().join("setup.toml"), None).unwrap_err();
    match err {
        ConfigError::HomeUnset { device, .. } => assert_eq!(device, "drive1"),
        other => panic!("expected HomeUnset, got {other:?}"),
    }
}

// ─── Emptiness ──────────────────────────────────────────────────────

#[test]
fn load_rejects_document_without_devices() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 10.0
update_rate_warn_threshold = 20
bus_diagnosis = false
log_error_counters = false
"#,
    )
    .unwrap();

    let err = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap_err();
    assert!(err.to_string().contains("no devices"), "{err}");
}
