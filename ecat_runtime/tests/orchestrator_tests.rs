//! Orchestrator lifecycle tests.
//!
//! Full startup → activate → cycle → shutdown runs over real fixture
//! documents and the simulated link, plus the startup-failure policies
//! and the startup abort handle.

use ecat_bus::pacing::UpdateMode;
use ecat_bus::registry::DeviceRegistry;
use ecat_bus::sim_link::SimBusLink;
use ecat_bus::topology::TopologyBuilder;
use ecat_bus::{DeviceDirectory, MasterState};
use ecat_common::config::SetupConfig;
use ecat_common::device::{Command, CommandSink, Device, DriveState, ReadingSource};
use ecat_runtime::orchestrator::{
    CycleErrorPolicy, Orchestrator, OrchestratorError, RuntimeOptions, StartupPolicy,
};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn write_device_configs(dir: &Path) {
    fs::write(
        dir.join("joint.toml"),
        "max_joint_velocity = 5.0\nmax_joint_torque = 40.0\ngear_ratio = 100.0\n",
    )
    .unwrap();
    fs::write(
        dir.join("sensor.toml"),
        "force_scale = 1.0\ntorque_scale = 1.0\nfilter_cutoff_hz = 50.0\nzero_on_startup = true\n",
    )
    .unwrap();
}

fn single_bus_directory(dir: &Path) -> DeviceDirectory {
    write_device_configs(dir);
    fs::write(
        dir.join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 5.0
update_rate_warn_threshold = 50
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "joint_drive"
name = "drive1"
configuration_file = "joint.toml"
ethercat_address = 5
ethercat_bus = "eth0"
ethercat_pdo_type = "A"

[[devices]]
type = "force_sensor"
name = "sensor1"
configuration_file = "sensor.toml"
ethercat_address = 6
ethercat_bus = "eth0"
"#,
    )
    .unwrap();
    let setup = SetupConfig::load(&dir.join("setup.toml")).unwrap();
    TopologyBuilder::new(DeviceRegistry::with_builtins())
        .build(setup)
        .unwrap()
}

fn two_bus_setup(dir: &Path) -> SetupConfig {
    write_device_configs(dir);
    fs::write(
        dir.join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 5.0
update_rate_warn_threshold = 50
bus_diagnosis = false
log_error_counters = false

[[masters]]
bus = "eth1"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 5.0
update_rate_warn_threshold = 50
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "joint_drive"
name = "drive1"
configuration_file = "joint.toml"
ethercat_address = 5
ethercat_bus = "eth0"
ethercat_pdo_type = "A"

[[devices]]
type = "force_sensor"
name = "sensor1"
configuration_file = "sensor.toml"
ethercat_address = 6
ethercat_bus = "eth1"
"#,
    )
    .unwrap();
    SetupConfig::load(&dir.join("setup.toml")).unwrap()
}

fn options(mode: UpdateMode) -> RuntimeOptions {
    RuntimeOptions {
        update_mode: mode,
        startup_policy: StartupPolicy::FailFast,
        cycle_error_policy: CycleErrorPolicy::KeepRunning,
        rt_priority: None,
    }
}

/// Wait (bounded) until `probe` returns true.
fn wait_until(bound: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + bound;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn full_lifecycle_drives_a_device() {
    let tmp = TempDir::new().unwrap();
    let directory = single_bus_directory(tmp.path());
    let mut orchestrator = Orchestrator::new(directory, options(UpdateMode::EnforceRate));
    let directory = orchestrator.directory();

    orchestrator.startup().unwrap();
    orchestrator.activate().unwrap();

    let drive = directory.device("drive1").unwrap();
    let sink = drive.as_command_sink().expect("joint drive stages commands");
    sink.request_drive_state(DriveState::OperationEnabled).unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            sink.drive_state() == DriveState::OperationEnabled
        }),
        "drive did not reach OperationEnabled"
    );

    sink.stage_command(Command::velocity(1.0)).unwrap();
    let source = drive.as_reading_source().unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            source.reading().joint_velocity().unwrap_or(0.0) > 0.5
        }),
        "drive did not pick up the staged velocity"
    );

    let reports = orchestrator.shutdown();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.outcome.is_ok());
    assert!(report.cycles > 10, "cycles = {}", report.cycles);

    for master in directory.masters() {
        assert_eq!(master.state(), MasterState::Shutdown);
    }
    // The directory stays queryable after shutdown.
    assert!(directory.device("drive1").is_ok());
}

#[test]
fn two_masters_cycle_independently() {
    let tmp = TempDir::new().unwrap();
    let setup = two_bus_setup(tmp.path());
    let directory = TopologyBuilder::new(DeviceRegistry::with_builtins())
        .build(setup)
        .unwrap();
    let mut orchestrator = Orchestrator::new(directory, options(UpdateMode::EnforceStep));
    let directory = orchestrator.directory();

    orchestrator.startup().unwrap();
    orchestrator.activate().unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            directory
                .masters()
                .iter()
                .all(|m| m.stats().cycles > 5)
        }),
        "not every master made progress"
    );

    let reports = orchestrator.shutdown();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.outcome.is_ok()));
    for master in directory.masters() {
        assert_eq!(master.state(), MasterState::Shutdown);
    }
}

#[test]
fn fail_fast_aborts_on_one_bad_master() {
    let tmp = TempDir::new().unwrap();
    let setup = two_bus_setup(tmp.path());
    let directory = TopologyBuilder::new(DeviceRegistry::with_builtins())
        .link_factory(|config| {
            if config.bus == "eth1" {
                Box::new(SimBusLink::failing(&config.bus))
            } else {
                Box::new(SimBusLink::new(&config.bus))
            }
        })
        .build(setup)
        .unwrap();

    let mut orchestrator = Orchestrator::new(directory, options(UpdateMode::EnforceRate));
    let err = orchestrator.startup().unwrap_err();
    match err {
        OrchestratorError::Startup { bus, .. } => assert_eq!(bus, "eth1"),
        other => panic!("expected Startup, got {other:?}"),
    }
}

#[test]
fn degraded_startup_excludes_the_failed_master() {
    let tmp = TempDir::new().unwrap();
    let setup = two_bus_setup(tmp.path());
    let directory = TopologyBuilder::new(DeviceRegistry::with_builtins())
        .link_factory(|config| {
            if config.bus == "eth1" {
                Box::new(SimBusLink::failing(&config.bus))
            } else {
                Box::new(SimBusLink::new(&config.bus))
            }
        })
        .build(setup)
        .unwrap();

    let mut opts = options(UpdateMode::EnforceRate);
    opts.startup_policy = StartupPolicy::ContinueDegraded;
    let mut orchestrator = Orchestrator::new(directory, opts);
    let directory = orchestrator.directory();

    orchestrator.startup().unwrap();
    orchestrator.activate().unwrap();

    let healthy = directory.master_of("drive1").unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || healthy.stats().cycles > 5),
        "healthy master made no progress"
    );

    let reports = orchestrator.shutdown();
    // Only the healthy master ran a cycle loop.
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].bus, "eth0");
    // Both masters end up terminal regardless.
    for master in directory.masters() {
        assert_eq!(master.state(), MasterState::Shutdown);
    }
}

#[test]
fn abort_handle_breaks_a_blocking_startup() {
    let tmp = TempDir::new().unwrap();
    write_device_configs(tmp.path());
    fs::write(
        tmp.path().join("setup.toml"),
        r#"
[[masters]]
bus = "eth0"
cyclic_period_seconds = 0.001
state_change_timeout_seconds = 30.0
update_rate_warn_threshold = 50
bus_diagnosis = false
log_error_counters = false

[[devices]]
type = "joint_drive"
name = "drive1"
configuration_file = "joint.toml"
ethercat_address = 5
ethercat_bus = "eth0"
ethercat_pdo_type = "A"
"#,
    )
    .unwrap();
    let setup = SetupConfig::load(&tmp.path().join("setup.toml")).unwrap();
    let directory = TopologyBuilder::new(DeviceRegistry::with_builtins())
        .link_factory(|config| Box::new(SimBusLink::with_ready_polls(&config.bus, u32::MAX)))
        .build(setup)
        .unwrap();

    let mut orchestrator = Orchestrator::new(directory, options(UpdateMode::EnforceRate));
    let abort = orchestrator.abort_handle();
    abort.store(true, std::sync::atomic::Ordering::SeqCst);

    let start = Instant::now();
    let err = orchestrator.startup().unwrap_err();
    assert!(matches!(err, OrchestratorError::Startup { .. }));
    // Far below the 30 s readiness bound: the abort flag cut the wait.
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn activate_requires_startup_first() {
    let tmp = TempDir::new().unwrap();
    let directory = single_bus_directory(tmp.path());
    let mut orchestrator = Orchestrator::new(directory, options(UpdateMode::EnforceRate));
    let err = orchestrator.activate().unwrap_err();
    assert!(matches!(err, OrchestratorError::NotStarted));
}
