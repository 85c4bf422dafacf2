// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Cycle counter and the cycle → wall-clock conversion.
//!
//! Flow entries stamp `used` in raw cycles on the hit path; the conversion
//! to monotonic milliseconds happens once, when a reply is built.  The CPU
//! frequency is measured a single time at startup by sampling the counter
//! across a one-second sleep, rounded to MHz.

use std::time::Duration;

use tracing::info;

/// Calibrated cycle clock.
#[derive(Debug, Clone)]
pub struct CycleClock {
    hz: u64,
}

impl CycleClock {
    /// Measure the cycle frequency across a one-second sleep.  Done once at
    /// init, before workers launch.
    #[must_use]
    pub fn calibrate() -> CycleClock {
        let begin = Self::now_cycles();
        std::thread::sleep(Duration::from_secs(1));
        let end = Self::now_cycles();
        let hz = ((end - begin + 500_000) / 1_000_000) * 1_000_000;
        let clock = CycleClock { hz: hz.max(1) };
        info!("cycle counter frequency is {} MHz", clock.hz / 1_000_000);
        clock
    }

    /// A clock with a known frequency, for tests.
    #[must_use]
    pub fn with_hz(hz: u64) -> CycleClock {
        CycleClock { hz: hz.max(1) }
    }

    /// The measured frequency in Hz.
    #[must_use]
    pub fn hz(&self) -> u64 {
        self.hz
    }

    /// Current cycle stamp.
    #[must_use]
    pub fn now_cycles() -> u64 {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: rdtsc has no memory effects.
        unsafe {
            core::arch::x86_64::_rdtsc()
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            use std::sync::OnceLock;
            use std::time::Instant;
            static EPOCH: OnceLock<Instant> = OnceLock::new();
            let epoch = EPOCH.get_or_init(Instant::now);
            u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
        }
    }

    /// Current monotonic wall clock, in milliseconds.
    #[must_use]
    pub fn now_wall_ms() -> u64 {
        let mut tp = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: clock_gettime writes the timespec we point it at.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &raw mut tp) };
        debug_assert_eq!(rc, 0);
        #[allow(clippy::cast_sign_loss)] // monotonic time is non-negative
        {
            tp.tv_sec as u64 * 1000 + tp.tv_nsec as u64 / 1_000_000
        }
    }

    /// Translate a flow's `used` cycle stamp into monotonic milliseconds.
    ///
    /// A `used` of zero means "never hit" and always maps to zero, never to
    /// the current wall clock.  Cycle-counter overflow is ignored: it is
    /// years away and only yields one spurious reading.
    #[must_use]
    pub fn flow_used_time_ms(&self, now_cycles: u64, used_cycles: u64) -> u64 {
        if used_cycles == 0 {
            return 0;
        }
        let idle_cycles = now_cycles.wrapping_sub(used_cycles);
        let idle_ms = u128::from(idle_cycles) * 1000 / u128::from(self.hz);
        let idle_ms = u64::try_from(idle_ms).unwrap_or(u64::MAX);
        Self::now_wall_ms().saturating_sub(idle_ms)
    }
}
