//! Device type registry.
//!
//! Maps a [`DeviceType`] tag to a constructor producing a device handle
//! from a validated setup entry. Constructed at startup and passed to the
//! topology builder by value; no global state.

use ecat_common::config::{DeviceEntry, DeviceType};
use ecat_common::device::Device;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Error type for factory dispatch and device construction.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The type tag is known but its support was not compiled into this
    /// build (cargo feature disabled).
    #[error("device '{device}': support for type '{tag}' is not compiled into this build")]
    SupportNotBuiltIn {
        /// Name of the device entry being constructed.
        device: String,
        /// The type tag.
        tag: &'static str,
    },

    /// No constructor has been registered for this type tag.
    #[error("no constructor registered for device type '{tag}'")]
    NotRegistered {
        /// The type tag.
        tag: &'static str,
    },

    /// The registered constructor failed.
    #[error("device '{device}': construction failed: {reason}")]
    Construction {
        /// Name of the device entry being constructed.
        device: String,
        /// Failure detail, typically a configuration-file error.
        reason: String,
    },
}

/// Factory function type producing a device handle from a setup entry.
///
/// The entry's `configuration_file` is already resolved and known to exist
/// when a factory runs.
pub type DeviceFactory = fn(&DeviceEntry) -> Result<Arc<dyn Device>, RegistryError>;

/// Registry of available device constructors.
pub struct DeviceRegistry {
    factories: HashMap<DeviceType, DeviceFactory>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every compiled-in device type registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "joint-drive")]
        registry.register(DeviceType::JointDrive, build_joint_drive);
        #[cfg(feature = "servo-drive")]
        registry.register(DeviceType::ServoDrive, build_servo_drive);
        #[cfg(feature = "force-sensor")]
        registry.register(DeviceType::ForceSensor, build_force_sensor);
        debug!(types = ?registry.registered_types(), "device registry populated");
        registry
    }

    /// Register a constructor for a type tag.
    ///
    /// # Panics
    /// Panics if a constructor for the same type is already registered.
    pub fn register(&mut self, device_type: DeviceType, factory: DeviceFactory) {
        if self.factories.contains_key(&device_type) {
            panic!("constructor for '{device_type}' is already registered");
        }
        self.factories.insert(device_type, factory);
    }

    /// Construct a device handle for a setup entry.
    pub fn create(&self, entry: &DeviceEntry) -> Result<Arc<dyn Device>, RegistryError> {
        match self.factories.get(&entry.device_type) {
            Some(factory) => factory(entry),
            None if !support_compiled(entry.device_type) => Err(RegistryError::SupportNotBuiltIn {
                device: entry.name.clone(),
                tag: entry.device_type.tag(),
            }),
            None => Err(RegistryError::NotRegistered {
                tag: entry.device_type.tag(),
            }),
        }
    }

    /// All type tags with a registered constructor.
    pub fn registered_types(&self) -> Vec<DeviceType> {
        self.factories.keys().copied().collect()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Whether support for a type tag was compiled into this build.
fn support_compiled(device_type: DeviceType) -> bool {
    match device_type {
        DeviceType::JointDrive => cfg!(feature = "joint-drive"),
        DeviceType::ServoDrive => cfg!(feature = "servo-drive"),
        DeviceType::ForceSensor => cfg!(feature = "force-sensor"),
    }
}

#[cfg(feature = "joint-drive")]
fn build_joint_drive(entry: &DeviceEntry) -> Result<Arc<dyn Device>, RegistryError> {
    use crate::devices::joint_drive::JointDrive;

    // The loader guarantees variant-carrying types have a pdo selector.
    let pdo = entry
        .ethercat_pdo_type
        .ok_or_else(|| RegistryError::Construction {
            device: entry.name.clone(),
            reason: "missing ethercat_pdo_type".to_string(),
        })?;
    let drive = JointDrive::from_config_file(
        &entry.name,
        entry.ethercat_address,
        pdo,
        &entry.configuration_file,
    )
    .map_err(|e| RegistryError::Construction {
        device: entry.name.clone(),
        reason: e.to_string(),
    })?;
    Ok(Arc::new(drive))
}

#[cfg(feature = "servo-drive")]
fn build_servo_drive(entry: &DeviceEntry) -> Result<Arc<dyn Device>, RegistryError> {
    use crate::devices::servo_drive::ServoDrive;

    let drive =
        ServoDrive::from_config_file(&entry.name, entry.ethercat_address, &entry.configuration_file)
            .map_err(|e| RegistryError::Construction {
                device: entry.name.clone(),
                reason: e.to_string(),
            })?;
    Ok(Arc::new(drive))
}

#[cfg(feature = "force-sensor")]
fn build_force_sensor(entry: &DeviceEntry) -> Result<Arc<dyn Device>, RegistryError> {
    use crate::devices::force_sensor::ForceSensor;

    let sensor = ForceSensor::from_config_file(
        &entry.name,
        entry.ethercat_address,
        &entry.configuration_file,
    )
    .map_err(|e| RegistryError::Construction {
        device: entry.name.clone(),
        reason: e.to_string(),
    })?;
    Ok(Arc::new(sensor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecat_common::config::PdoVariant;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn entry(device_type: DeviceType, config_file: PathBuf) -> DeviceEntry {
        DeviceEntry {
            device_type,
            name: "dev1".to_string(),
            configuration_file: config_file,
            ethercat_address: 4,
            ethercat_bus: "eth0".to_string(),
            ethercat_pdo_type: Some(PdoVariant::A),
        }
    }

    #[test]
    fn builtins_cover_all_enabled_types() {
        let registry = DeviceRegistry::with_builtins();
        let mut types = registry.registered_types();
        types.sort_by_key(|t| t.tag());
        assert_eq!(
            types,
            vec![
                DeviceType::ForceSensor,
                DeviceType::JointDrive,
                DeviceType::ServoDrive
            ]
        );
    }

    #[test]
    fn create_servo_drive_from_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("servo.toml");
        fs::write(
            &path,
            "rated_current_a = 4.0\nmax_current_a = 12.0\nvelocity_limit = 10.0\n",
        )
        .unwrap();

        let registry = DeviceRegistry::with_builtins();
        let device = registry.create(&entry(DeviceType::ServoDrive, path)).unwrap();
        assert_eq!(device.name(), "dev1");
        assert_eq!(device.device_type(), DeviceType::ServoDrive);
        assert!(device.as_command_sink().is_some());
    }

    #[test]
    fn create_reports_broken_config_with_device_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("servo.toml");
        fs::write(&path, "rated_current_a = -1.0\n").unwrap();

        let registry = DeviceRegistry::with_builtins();
        let err = registry
            .create(&entry(DeviceType::ServoDrive, path))
            .unwrap_err();
        match err {
            RegistryError::Construction { device, .. } => assert_eq!(device, "dev1"),
            other => panic!("expected Construction, got {other:?}"),
        }
    }

    #[test]
    fn empty_registry_reports_not_registered() {
        let registry = DeviceRegistry::new();
        let err = registry
            .create(&entry(DeviceType::ServoDrive, PathBuf::from("unused.toml")))
            .unwrap_err();
        // With the feature compiled in but nothing registered this is a
        // registration problem, not a build problem.
        assert!(matches!(err, RegistryError::NotRegistered { .. }));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut registry = DeviceRegistry::with_builtins();
        registry.register(DeviceType::ServoDrive, build_servo_drive);
    }
}
