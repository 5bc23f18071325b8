//! ECAT Common Library
//!
//! Shared vocabulary for the EtherCAT runtime workspace: the setup-document
//! model and loader, the device handle and capability traits, and the bus
//! link seam behind which the wire-level protocol lives.
//!
//! # Module Structure
//!
//! - [`config`] - Setup document model, loader and validation
//! - [`device`] - Device handle trait and capability traits
//! - [`link`] - Bus link trait (wire-protocol seam) and error counters
//! - [`consts`] - Shared timing and scheduling constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use ecat_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod device;
pub mod link;
pub mod prelude;
