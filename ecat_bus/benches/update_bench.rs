//! Cyclic update hot-path benchmark.
//!
//! Measures one master update (link exchange + device passes) with a
//! near-zero period so the pacing sleep does not dominate the figure.

use criterion::{Criterion, criterion_group, criterion_main};
use ecat_bus::master::Master;
use ecat_bus::pacing::UpdateMode;
use ecat_bus::sim_link::SimBusLink;
use ecat_common::config::{MasterConfig, PdoVariant};
use ecat_common::device::{Command, CommandSink, Device, DriveState};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

#[cfg(feature = "joint-drive")]
use ecat_bus::devices::joint_drive::{JointDrive, JointDriveConfig};

fn bench_config() -> MasterConfig {
    MasterConfig {
        name: None,
        bus: "bench0".to_string(),
        cyclic_period_seconds: 1e-9,
        state_change_timeout_seconds: 1.0,
        update_rate_warn_threshold: u32::MAX,
        bus_diagnosis: false,
        log_error_counters: false,
    }
}

#[cfg(feature = "joint-drive")]
fn bench_update(c: &mut Criterion) {
    let master = Master::new(bench_config(), Box::new(SimBusLink::new("bench0")));
    for i in 0..8 {
        let drive = JointDrive::new(
            &format!("joint{i}"),
            i,
            PdoVariant::A,
            JointDriveConfig {
                max_joint_velocity: 5.0,
                max_joint_torque: 40.0,
                gear_ratio: 100.0,
                state_change_cycles: 1,
            },
        );
        master.attach(Arc::new(drive)).unwrap();
    }
    master.startup(&AtomicBool::new(false)).unwrap();
    master.activate().unwrap();

    // Put the drives to work so the pass exercises command tracking.
    for device in master.devices() {
        let sink = device.as_command_sink().unwrap();
        sink.request_drive_state(DriveState::OperationEnabled).unwrap();
        sink.stage_command(Command::velocity(1.0)).unwrap();
    }
    master.update(UpdateMode::EnforceStep).unwrap();

    c.bench_function("master_update_8_joints", |b| {
        b.iter(|| master.update(UpdateMode::EnforceStep).unwrap());
    });
}

#[cfg(not(feature = "joint-drive"))]
fn bench_update(_c: &mut Criterion) {}

criterion_group!(benches, bench_update);
criterion_main!(benches);
