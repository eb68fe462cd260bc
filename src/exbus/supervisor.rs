//! # Failsafe Supervisor
//!
//! Runs from a fixed-rate tick, independent of byte arrival.
//!
//! Two timers count ticks:
//! - `rx_timer` restarts whenever bytes arrive. Reaching the stall
//!   threshold abandons any partially assembled frame.
//! - `failsafe_timer` restarts on every parsed channel frame. Reaching the
//!   failsafe threshold forces every channel to the failsafe value, and
//!   keeps forcing it on each tick until channel frames return.
//!
//! Thresholds are in ticks of the supervisor rate, derived from the
//! configured millisecond timeouts.

use tracing::{info, warn};

/// Default supervisor tick rate
pub const DEFAULT_TICK_RATE_HZ: u32 = 625;

/// Default silence before a partial frame is dropped
pub const DEFAULT_STALL_TIMEOUT_MS: u32 = 8;

/// Default loss of channel frames before failsafe
pub const DEFAULT_FAILSAFE_TIMEOUT_MS: u32 = 120;

/// Supervisor thresholds in ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorThresholds {
    pub stall_ticks: u32,
    pub failsafe_ticks: u32,
}

impl Default for SupervisorThresholds {
    fn default() -> Self {
        Self::from_timeouts(
            DEFAULT_TICK_RATE_HZ,
            DEFAULT_STALL_TIMEOUT_MS,
            DEFAULT_FAILSAFE_TIMEOUT_MS,
        )
    }
}

impl SupervisorThresholds {
    /// Convert millisecond timeouts into ticks at the given rate
    ///
    /// Partial ticks round up, and every threshold is at least one tick.
    ///
    /// # Examples
    ///
    /// ```
    /// use exbus_rx::exbus::supervisor::SupervisorThresholds;
    ///
    /// let thresholds = SupervisorThresholds::from_timeouts(625, 8, 120);
    /// assert_eq!(thresholds.stall_ticks, 5);
    /// assert_eq!(thresholds.failsafe_ticks, 75);
    /// ```
    pub fn from_timeouts(tick_rate_hz: u32, stall_timeout_ms: u32, failsafe_timeout_ms: u32) -> Self {
        Self {
            stall_ticks: ms_to_ticks(stall_timeout_ms, tick_rate_hz),
            failsafe_ticks: ms_to_ticks(failsafe_timeout_ms, tick_rate_hz),
        }
    }
}

fn ms_to_ticks(ms: u32, tick_rate_hz: u32) -> u32 {
    let ticks = (ms as u64 * tick_rate_hz as u64).div_ceil(1000);
    ticks.clamp(1, u32::MAX as u64) as u32
}

/// Corrective actions requested by one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickActions {
    /// Drop the partially received frame
    pub abandon_frame: bool,
    /// Force all channels to the failsafe value
    pub force_failsafe: bool,
}

/// Stall and link-loss timers
#[derive(Debug)]
pub struct Supervisor {
    thresholds: SupervisorThresholds,
    rx_timer: u32,
    failsafe_timer: u32,
    failsafe_active: bool,
}

impl Supervisor {
    pub fn new(thresholds: SupervisorThresholds) -> Self {
        Self {
            thresholds,
            rx_timer: 0,
            failsafe_timer: 0,
            failsafe_active: false,
        }
    }

    pub fn thresholds(&self) -> SupervisorThresholds {
        self.thresholds
    }

    pub fn rx_timer(&self) -> u32 {
        self.rx_timer
    }

    pub fn failsafe_timer(&self) -> u32 {
        self.failsafe_timer
    }

    pub fn is_failsafe(&self) -> bool {
        self.failsafe_active
    }

    /// Bytes arrived from the receiver
    pub fn bytes_received(&mut self) {
        self.rx_timer = 0;
    }

    /// A channel frame was parsed
    pub fn channels_received(&mut self) {
        self.failsafe_timer = 0;

        if self.failsafe_active {
            self.failsafe_active = false;
            info!("EX Bus link restored, leaving failsafe");
        }
    }

    /// Advance both timers by one tick
    pub fn tick(&mut self) -> TickActions {
        self.rx_timer = self.rx_timer.saturating_add(1);
        self.failsafe_timer = self.failsafe_timer.saturating_add(1);

        let force_failsafe = self.failsafe_timer >= self.thresholds.failsafe_ticks;
        if force_failsafe && !self.failsafe_active {
            self.failsafe_active = true;
            warn!(
                "No EX Bus channel frames for {} ticks, entering failsafe",
                self.failsafe_timer
            );
        }

        TickActions {
            abandon_frame: self.rx_timer >= self.thresholds.stall_ticks,
            force_failsafe,
        }
    }
}
