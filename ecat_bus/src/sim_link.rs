//! Simulated bus link.
//!
//! Stands in for the wire-level protocol stack so the whole configuration
//! and runtime path can run without hardware: deterministic readiness
//! latency, per-exchange bookkeeping, and a switchable open failure for
//! exercising startup error paths.

use ecat_common::consts::READY_POLL_INTERVAL;
use ecat_common::link::{BusLink, ErrorCounters, LinkError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Readiness polls a freshly opened simulated bus consumes before it
/// reports communication-ready.
const DEFAULT_READY_POLLS: u32 = 4;

/// Exchanges between simulated lost-frame events.
const LOST_FRAME_INTERVAL: u64 = 25_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Idle,
    Open,
    Operational,
    Closed,
}

/// In-process [`BusLink`] implementation.
#[derive(Debug)]
pub struct SimBusLink {
    bus: String,
    phase: LinkPhase,
    ready_polls_left: u32,
    exchanges: u64,
    counters: ErrorCounters,
    fail_open: bool,
}

impl SimBusLink {
    /// A link that opens successfully and becomes ready after a handful of
    /// polls.
    pub fn new(bus: &str) -> Self {
        Self::with_ready_polls(bus, DEFAULT_READY_POLLS)
    }

    /// A link that needs `polls` readiness polls before it reports ready.
    pub fn with_ready_polls(bus: &str, polls: u32) -> Self {
        Self {
            bus: bus.to_string(),
            phase: LinkPhase::Idle,
            ready_polls_left: polls,
            exchanges: 0,
            counters: ErrorCounters::default(),
            fail_open: false,
        }
    }

    /// A link whose `open` fails, for exercising startup error paths.
    pub fn failing(bus: &str) -> Self {
        let mut link = Self::new(bus);
        link.fail_open = true;
        link
    }

    /// Number of exchanges performed so far.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    fn phase_name(&self) -> &'static str {
        match self.phase {
            LinkPhase::Idle => "idle",
            LinkPhase::Open => "open",
            LinkPhase::Operational => "operational",
            LinkPhase::Closed => "closed",
        }
    }

    fn wrong_phase(&self, operation: &'static str) -> LinkError {
        LinkError::WrongPhase {
            bus: self.bus.clone(),
            phase: self.phase_name(),
            operation,
        }
    }
}

impl BusLink for SimBusLink {
    fn bus_name(&self) -> &str {
        &self.bus
    }

    fn open(&mut self) -> Result<(), LinkError> {
        if self.phase != LinkPhase::Idle {
            return Err(self.wrong_phase("open"));
        }
        if self.fail_open {
            return Err(LinkError::OpenFailed {
                bus: self.bus.clone(),
                reason: "no such interface".to_string(),
            });
        }
        self.phase = LinkPhase::Open;
        Ok(())
    }

    fn wait_for_ready(&mut self, timeout: Duration, abort: &AtomicBool) -> Result<(), LinkError> {
        if self.phase != LinkPhase::Open {
            return Err(self.wrong_phase("wait for readiness"));
        }
        let start = Instant::now();
        loop {
            if self.ready_polls_left == 0 {
                return Ok(());
            }
            if abort.load(Ordering::SeqCst) {
                return Err(LinkError::Aborted {
                    bus: self.bus.clone(),
                });
            }
            if start.elapsed() >= timeout {
                return Err(LinkError::ReadyTimeout {
                    bus: self.bus.clone(),
                    waited: start.elapsed(),
                });
            }
            std::thread::sleep(READY_POLL_INTERVAL);
            self.ready_polls_left -= 1;
        }
    }

    fn activate(&mut self) -> Result<(), LinkError> {
        if self.phase != LinkPhase::Open {
            return Err(self.wrong_phase("activate"));
        }
        self.phase = LinkPhase::Operational;
        Ok(())
    }

    fn exchange(&mut self) -> Result<(), LinkError> {
        if self.phase != LinkPhase::Operational {
            return Err(self.wrong_phase("exchange"));
        }
        self.exchanges += 1;
        // Stand-in for occasional wire noise.
        if self.exchanges % LOST_FRAME_INTERVAL == 0 {
            self.counters.lost_frames += 1;
        }
        Ok(())
    }

    fn error_counters(&self) -> ErrorCounters {
        self.counters
    }

    fn close(&mut self) {
        self.phase = LinkPhase::Closed;
    }
}
