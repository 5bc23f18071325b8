//! # ECAT Bus Library
//!
//! The bus layer of the EtherCAT runtime workspace: masters with their
//! lifecycle state machine and cyclic update engine, the device
//! implementations and their type registry, the topology builder and the
//! resulting device directory.
//!
//! # Module Structure
//!
//! - [`master`] - Master lifecycle state machine and cyclic update
//! - [`pacing`] - Deadline clock for the two update disciplines
//! - [`registry`] - Device type registry / factory dispatch
//! - [`devices`] - Device implementations (feature-gated)
//! - [`topology`] - Topology builder
//! - [`directory`] - Read-only post-build device directory
//! - [`sim_link`] - Simulated bus link
//!
//! # Architecture
//!
//! ```text
//! SetupConfig ──► TopologyBuilder ──► DeviceDirectory
//!                      │                   │
//!                DeviceRegistry       Arc<Master> ──► Box<dyn BusLink>
//!                      │                   │
//!                Arc<dyn Device> ◄─────────┘  (attached per bus identity)
//! ```

pub mod devices;
pub mod directory;
pub mod master;
pub mod pacing;
pub mod registry;
pub mod sim_link;
pub mod topology;

// Re-export key types for convenience
pub use crate::directory::{DeviceDirectory, DirectoryError};
pub use crate::master::{Master, MasterError, MasterState, UpdateStats};
pub use crate::pacing::UpdateMode;
pub use crate::registry::{DeviceFactory, DeviceRegistry, RegistryError};
pub use crate::sim_link::SimBusLink;
pub use crate::topology::{TopologyBuilder, TopologyError};
