//! Topology builder: from a validated setup document to a device directory.
//!
//! Construction order is fixed: every device is built through the registry
//! first, then one master is created per declared definition, then every
//! device is attached to the master whose bus identity matches its entry.
//! A device whose bus matches no declared master is a fatal error before
//! any master is started; nothing is ever silently dropped.

use crate::directory::DeviceDirectory;
use crate::master::{Master, MasterError};
use crate::registry::{DeviceRegistry, RegistryError};
use crate::sim_link::SimBusLink;
use ecat_common::config::{MasterConfig, SetupConfig};
use ecat_common::link::BusLink;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for topology building.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Device construction failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A device references a bus no master is declared for.
    #[error("device '{device}': references bus '{bus}' but no master is declared for it")]
    UnmatchedBus {
        /// Name of the unattachable device.
        device: String,
        /// The undeclared bus it referenced.
        bus: String,
    },

    /// A master operation failed during the build (attach, eager startup).
    #[error("master '{bus}': {source}")]
    Master {
        /// Bus identifier of the failing master.
        bus: String,
        /// The underlying master error.
        source: MasterError,
    },
}

/// Factory producing the link a new master is bound to.
pub type LinkFactory = Box<dyn Fn(&MasterConfig) -> Box<dyn BusLink>>;

/// Builds a [`DeviceDirectory`] from a validated [`SetupConfig`].
pub struct TopologyBuilder {
    registry: DeviceRegistry,
    link_factory: LinkFactory,
    eager_startup: bool,
}

impl TopologyBuilder {
    /// A builder using the given registry and the simulated link.
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            registry,
            link_factory: Box::new(|config| Box::new(SimBusLink::new(&config.bus))),
            eager_startup: false,
        }
    }

    /// Replace the link factory (production links, failure injection).
    pub fn link_factory(
        mut self,
        factory: impl Fn(&MasterConfig) -> Box<dyn BusLink> + 'static,
    ) -> Self {
        self.link_factory = Box::new(factory);
        self
    }

    /// Transition every master Created -> Started as part of the build.
    /// Any startup failure aborts the whole build.
    pub fn eager_startup(mut self, eager: bool) -> Self {
        self.eager_startup = eager;
        self
    }

    /// Build the directory.
    ///
    /// # Errors
    /// Configuration and topology defects abort the whole build; no
    /// partial directory is ever returned.
    pub fn build(&self, setup: SetupConfig) -> Result<DeviceDirectory, TopologyError> {
        // 1. Construct every device, keeping its originating entry.
        let mut constructed = Vec::with_capacity(setup.devices.len());
        for entry in &setup.devices {
            debug!(device = %entry.name, device_type = %entry.device_type, "creating device");
            let device = self.registry.create(entry)?;
            constructed.push((device, entry.clone()));
        }

        // 2. One master per declared definition.
        let masters: Vec<Arc<Master>> = setup
            .masters
            .iter()
            .map(|config| {
                let link = (self.link_factory)(config);
                Arc::new(Master::new(config.clone(), link))
            })
            .collect();

        // 3. Attach each device to the master owning its bus.
        let mut records = Vec::with_capacity(constructed.len());
        for (device, entry) in constructed {
            let master = masters
                .iter()
                .find(|m| m.bus_name() == entry.ethercat_bus)
                .ok_or_else(|| TopologyError::UnmatchedBus {
                    device: entry.name.clone(),
                    bus: entry.ethercat_bus.clone(),
                })?;
            master
                .attach(device.clone())
                .map_err(|e| TopologyError::Master {
                    bus: master.bus_name().to_string(),
                    source: e,
                })?;
            records.push((device, entry, Arc::clone(master)));
        }

        for master in &masters {
            if master.devices().is_empty() {
                warn!(bus = %master.bus_name(), "master has no attached devices");
            }
        }

        if self.eager_startup {
            let abort = AtomicBool::new(false);
            for master in &masters {
                master.startup(&abort).map_err(|e| TopologyError::Master {
                    bus: master.bus_name().to_string(),
                    source: e,
                })?;
            }
        }

        let directory = DeviceDirectory::new(masters, records);
        info!(
            devices = directory.device_count(),
            masters = directory.master_count(),
            "topology built"
        );
        Ok(directory)
    }
}
