//! Monotonic clock and hybrid high-resolution sleep
//!
//! OS sleep primitives routinely overshoot by 1-15 ms, which is far too
//! coarse for MIDI clock pulses. `sleep_until_us` therefore sleeps in
//! coarse steps until ~100 ms before the deadline and busy-waits the
//! rest, re-reading the clock every iteration. An optional idle callback
//! is invoked during the wait so long as at least 1 ms remains, giving
//! the talkie address-discovery poll its run time.

use std::thread;
use std::time::{Duration, Instant};

/// Remaining time below which the wait stops sleeping and spins.
const BUSY_WAIT_US: u64 = 100_000;

/// Coarse sleep step while an idle callback needs servicing.
const COARSE_STEP_US: u64 = 500;

/// Minimum spacing between idle callback invocations.
const IDLE_PERIOD: Duration = Duration::from_micros(100);

/// Remaining time below which the idle callback is no longer invoked.
const IDLE_CUTOFF_US: u64 = 1_000;

/// Monotonic microsecond clock anchored at playback start.
#[derive(Debug)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Start the clock; all timestamps are offsets from this instant.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Microseconds elapsed since the clock started.
    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Sleep until `deadline_us` on this clock.
    ///
    /// Returns immediately if the deadline has already passed. The
    /// `idle` callback, when present, is invoked no more often than
    /// every 100 µs and never within the final millisecond; it must
    /// complete well under 1 ms per call.
    pub fn sleep_until_us(&self, deadline_us: u64, mut idle: Option<&mut dyn FnMut()>) {
        let mut last_idle: Option<Instant> = None;
        loop {
            let now_us = self.now_us();
            if now_us >= deadline_us {
                return;
            }
            let remaining_us = deadline_us - now_us;

            if remaining_us >= IDLE_CUTOFF_US {
                if let Some(cb) = idle.as_mut() {
                    let due = last_idle.map_or(true, |t| t.elapsed() >= IDLE_PERIOD);
                    if due {
                        (**cb)();
                        last_idle = Some(Instant::now());
                    }
                }
            }

            if remaining_us > BUSY_WAIT_US {
                let coarse_us = remaining_us - BUSY_WAIT_US;
                // With a callback to service, sleep in short steps;
                // otherwise one coarse sleep up to the busy window.
                let step_us = if idle.is_some() {
                    coarse_us.min(COARSE_STEP_US)
                } else {
                    coarse_us
                };
                thread::sleep(Duration::from_micros(step_us));
            } else {
                // Never trust the coarse sleep to wake precisely.
                std::hint::spin_loop();
            }
        }
    }
}
