//! Cycle pacing for the two update disciplines.
//!
//! [`UpdateMode::EnforceRate`] keeps a fixed deadline grid: a late cycle is
//! followed by shorter sleeps until the grid is back on schedule, so the
//! long-run average period stays on target. [`UpdateMode::EnforceStep`]
//! anchors every deadline to the actual wake time: one unit of work per
//! cycle, missed time is never caught up.
//!
//! With the `rt` feature the clock sleeps on absolute `CLOCK_MONOTONIC`
//! deadlines via `clock_nanosleep(TIMER_ABSTIME)` for drift-free pacing;
//! without it, portable `std::thread::sleep` against `Instant` deadlines.

/// Timing discipline for cyclic updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Fixed deadline grid with catch-up; holds the long-run average rate.
    EnforceRate,
    /// One update per cycle, deadlines anchored to actual wake times,
    /// no catch-up.
    EnforceStep,
}

/// Whole periods the rate grid may fall behind before it is re-anchored to
/// the present instead of catching up. Bounds the burst of back-to-back
/// cycles after a long stall.
const MAX_CATCH_UP_PERIODS: u32 = 10;

#[cfg(not(feature = "rt"))]
mod clock {
    use super::{MAX_CATCH_UP_PERIODS, UpdateMode};
    use std::time::{Duration, Instant};

    /// Absolute-deadline pacing clock (portable flavor).
    #[derive(Debug)]
    pub struct DeadlineClock {
        next: Instant,
        period: Duration,
    }

    impl DeadlineClock {
        /// Start a clock whose first deadline is one period from now.
        pub fn new(period: Duration) -> Result<Self, String> {
            Ok(Self {
                next: Instant::now() + period,
                period,
            })
        }

        /// Sleep out the current deadline and arm the next one.
        ///
        /// Returns true when the rate grid had fallen so far behind that it
        /// was re-anchored to the present.
        pub fn pace(&mut self, mode: UpdateMode) -> bool {
            let now = Instant::now();
            if self.next > now {
                std::thread::sleep(self.next - now);
            }
            match mode {
                UpdateMode::EnforceRate => {
                    self.next += self.period;
                    let now = Instant::now();
                    if now > self.next + self.period * MAX_CATCH_UP_PERIODS {
                        self.next = now + self.period;
                        return true;
                    }
                    false
                }
                UpdateMode::EnforceStep => {
                    self.next = Instant::now() + self.period;
                    false
                }
            }
        }
    }
}

#[cfg(feature = "rt")]
mod clock {
    use super::{MAX_CATCH_UP_PERIODS, UpdateMode};
    use nix::sys::time::TimeSpec;
    use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};
    use std::time::Duration;

    /// Absolute-deadline pacing clock (`CLOCK_MONOTONIC` flavor).
    #[derive(Debug)]
    pub struct DeadlineClock {
        next: TimeSpec,
        period_ns: i64,
    }

    impl DeadlineClock {
        /// Start a clock whose first deadline is one period from now.
        pub fn new(period: Duration) -> Result<Self, String> {
            let now = clock_gettime(ClockId::CLOCK_MONOTONIC)
                .map_err(|e| format!("clock_gettime: {e}"))?;
            let period_ns = period.as_nanos() as i64;
            Ok(Self {
                next: add_ns(now, period_ns),
                period_ns,
            })
        }

        /// Sleep out the current deadline and arm the next one.
        ///
        /// Returns true when the rate grid had fallen so far behind that it
        /// was re-anchored to the present.
        pub fn pace(&mut self, mode: UpdateMode) -> bool {
            let _ = clock_nanosleep(
                ClockId::CLOCK_MONOTONIC,
                ClockNanosleepFlags::TIMER_ABSTIME,
                &self.next,
            );
            let now = match clock_gettime(ClockId::CLOCK_MONOTONIC) {
                Ok(now) => now,
                Err(_) => return false,
            };
            match mode {
                UpdateMode::EnforceRate => {
                    self.next = add_ns(self.next, self.period_ns);
                    let lag_limit = self.period_ns * MAX_CATCH_UP_PERIODS as i64;
                    if diff_ns(&now, &self.next) > lag_limit {
                        self.next = add_ns(now, self.period_ns);
                        return true;
                    }
                    false
                }
                UpdateMode::EnforceStep => {
                    self.next = add_ns(now, self.period_ns);
                    false
                }
            }
        }
    }

    /// Add nanoseconds to a TimeSpec.
    fn add_ns(ts: TimeSpec, ns: i64) -> TimeSpec {
        let mut secs = ts.tv_sec();
        let mut nanos = ts.tv_nsec() + ns;
        while nanos >= 1_000_000_000 {
            secs += 1;
            nanos -= 1_000_000_000;
        }
        while nanos < 0 {
            secs -= 1;
            nanos += 1_000_000_000;
        }
        TimeSpec::new(secs, nanos)
    }

    /// Difference (a - b) in nanoseconds.
    fn diff_ns(a: &TimeSpec, b: &TimeSpec) -> i64 {
        (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
    }
}

pub use clock::DeadlineClock;
