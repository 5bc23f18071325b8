//! Bus link trait: the seam behind which the wire protocol lives.
//!
//! Everything protocol-level (discovery, topology scan, PDO/SDO exchange,
//! slave state machines) happens behind [`BusLink`]. The masters in this
//! workspace only ever open a link, wait for it to become ready, activate
//! cyclic exchange, exchange, and close.

use std::sync::atomic::AtomicBool;
use std::time::Duration;
use thiserror::Error;

/// Error type for link operations.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// The link could not be opened.
    #[error("bus '{bus}': failed to open link: {reason}")]
    OpenFailed {
        /// Bus identifier.
        bus: String,
        /// Failure detail.
        reason: String,
    },

    /// The bus did not become communication-ready within the bound.
    #[error("bus '{bus}': not ready after {waited:?}")]
    ReadyTimeout {
        /// Bus identifier.
        bus: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The readiness wait was aborted via the caller's abort flag.
    #[error("bus '{bus}': readiness wait aborted")]
    Aborted {
        /// Bus identifier.
        bus: String,
    },

    /// A cyclic process-data exchange failed.
    #[error("bus '{bus}': process-data exchange failed: {reason}")]
    ExchangeFailed {
        /// Bus identifier.
        bus: String,
        /// Failure detail.
        reason: String,
    },

    /// Operation attempted on a link that is not in the required phase.
    #[error("bus '{bus}': link is {phase}, cannot {operation}")]
    WrongPhase {
        /// Bus identifier.
        bus: String,
        /// Current link phase, for the message.
        phase: &'static str,
        /// Attempted operation.
        operation: &'static str,
    },
}

/// Link-level error counters, sampled for bus diagnosis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    /// Receive-side errors.
    pub rx_errors: u64,
    /// Transmit-side errors.
    pub tx_errors: u64,
    /// Frames lost on the wire.
    pub lost_frames: u64,
}

impl ErrorCounters {
    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        self.rx_errors + self.tx_errors + self.lost_frames
    }
}

/// A blocking link to one bus.
///
/// Phase contract: `open` → `wait_for_ready` → `activate` → `exchange`
/// (repeatedly) → `close`. Implementations report out-of-order calls as
/// [`LinkError::WrongPhase`] rather than panicking.
pub trait BusLink: Send {
    /// The bus identifier this link is bound to.
    fn bus_name(&self) -> &str;

    /// Open the link (interface binding, slave enumeration).
    fn open(&mut self) -> Result<(), LinkError>;

    /// Block until the bus is communication-ready, polling `abort` between
    /// waits. Bounded by `timeout`.
    fn wait_for_ready(&mut self, timeout: Duration, abort: &AtomicBool) -> Result<(), LinkError>;

    /// Enable cyclic process-data exchange.
    fn activate(&mut self) -> Result<(), LinkError>;

    /// Perform one cyclic process-data exchange.
    fn exchange(&mut self) -> Result<(), LinkError>;

    /// Current error counters.
    fn error_counters(&self) -> ErrorCounters;

    /// Halt all communication. Terminal; further calls are phase errors.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_counter_total() {
        let counters = ErrorCounters {
            rx_errors: 1,
            tx_errors: 2,
            lost_frames: 3,
        };
        assert_eq!(counters.total(), 6);
    }
}
