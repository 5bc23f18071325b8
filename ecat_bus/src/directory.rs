//! Device directory: the read-only post-build view of the topology.
//!
//! Owns every constructed device together with its originating setup entry
//! and owning master. The associations never change after the build;
//! enumeration methods hand out snapshot collections.

use crate::master::Master;
use ecat_common::config::{DeviceEntry, DeviceType};
use ecat_common::device::Device;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error type for directory lookups.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    /// No device with the requested name exists.
    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    /// The single-master accessor was called with no master configured.
    #[error("no master configured")]
    NoMaster,

    /// The single-master accessor was called with several masters
    /// configured; the call is inherently ambiguous.
    #[error("{count} masters configured, the single-master accessor is ambiguous")]
    AmbiguousMaster {
        /// How many masters exist.
        count: usize,
    },
}

struct DeviceRecord {
    device: Arc<dyn Device>,
    entry: DeviceEntry,
    master: Arc<Master>,
}

/// Read-only set of (master, device, entry) associations.
pub struct DeviceDirectory {
    masters: Vec<Arc<Master>>,
    records: Vec<DeviceRecord>,
    by_name: HashMap<String, usize>,
}

impl fmt::Debug for DeviceDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDirectory")
            .field("masters", &self.masters.len())
            .field("devices", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl DeviceDirectory {
    pub(crate) fn new(
        masters: Vec<Arc<Master>>,
        records: Vec<(Arc<dyn Device>, DeviceEntry, Arc<Master>)>,
    ) -> Self {
        let records: Vec<DeviceRecord> = records
            .into_iter()
            .map(|(device, entry, master)| DeviceRecord {
                device,
                entry,
                master,
            })
            .collect();
        let by_name = records
            .iter()
            .enumerate()
            .map(|(index, record)| (record.entry.name.clone(), index))
            .collect();
        Self {
            masters,
            records,
            by_name,
        }
    }

    /// Number of devices in the directory.
    pub fn device_count(&self) -> usize {
        self.records.len()
    }

    /// Number of masters in the directory.
    pub fn master_count(&self) -> usize {
        self.masters.len()
    }

    /// Look up a device by its unique name.
    pub fn device(&self, name: &str) -> Result<Arc<dyn Device>, DirectoryError> {
        self.by_name
            .get(name)
            .map(|&index| Arc::clone(&self.records[index].device))
            .ok_or_else(|| DirectoryError::DeviceNotFound(name.to_string()))
    }

    /// Snapshot of all devices, in declaration order.
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.records
            .iter()
            .map(|r| Arc::clone(&r.device))
            .collect()
    }

    /// Snapshot of all devices of one type.
    pub fn devices_of_type(&self, device_type: DeviceType) -> Vec<Arc<dyn Device>> {
        self.records
            .iter()
            .filter(|r| r.entry.device_type == device_type)
            .map(|r| Arc::clone(&r.device))
            .collect()
    }

    /// The setup entry a device handle was constructed from.
    pub fn entry_for(&self, device: &Arc<dyn Device>) -> Option<&DeviceEntry> {
        self.records
            .iter()
            .find(|r| Arc::ptr_eq(&r.device, device))
            .map(|r| &r.entry)
    }

    /// The setup entry of a named device.
    pub fn entry_of(&self, name: &str) -> Option<&DeviceEntry> {
        self.by_name.get(name).map(|&index| &self.records[index].entry)
    }

    /// The master a named device is attached to.
    pub fn master_of(&self, name: &str) -> Option<Arc<Master>> {
        self.by_name
            .get(name)
            .map(|&index| Arc::clone(&self.records[index].master))
    }

    /// Snapshot of all masters, in declaration order.
    pub fn masters(&self) -> Vec<Arc<Master>> {
        self.masters.clone()
    }

    /// The single master, when exactly one is configured.
    ///
    /// # Errors
    /// [`DirectoryError::NoMaster`] with zero masters,
    /// [`DirectoryError::AmbiguousMaster`] with more than one; use
    /// [`masters`](Self::masters) in that case.
    pub fn master(&self) -> Result<Arc<Master>, DirectoryError> {
        match self.masters.len() {
            0 => Err(DirectoryError::NoMaster),
            1 => Ok(Arc::clone(&self.masters[0])),
            count => Err(DirectoryError::AmbiguousMaster { count }),
        }
    }

    /// Masters with no attached devices; permitted, but worth surfacing.
    pub fn masters_without_devices(&self) -> Vec<Arc<Master>> {
        self.masters
            .iter()
            .filter(|m| m.devices().is_empty())
            .cloned()
            .collect()
    }
}
