//! Timing constants and configuration bundles for calibration and the sweep.
//!
//! The raw constants keep the names the rig has always used on the bench; the
//! structs below group them so tests and the emulator can shrink the numbers
//! without touching the state machine.

use core::time::Duration;

/// Crash-detection deadline measured from the glitch pulse.
pub const TIMEOUT_US: u64 = 1_000_000;

/// Width of the hard-reset power cut. Long enough to drain the target's rails.
pub const RESET_US: u64 = 300_000;

/// Starting calibration pulse, long enough to crash the target.
pub const TUNE_DURATION_MAX: u32 = 800;

/// Initial (downward) calibration step.
pub const TUNE_INITIAL_STEP: u32 = TUNE_DURATION_MAX / 10;

/// Expected trigger count one second after boot.
pub const TUNE_TRIGGERS_PER_SECOND: u32 = 6;

/// Power cuts issued per calibration trial.
pub const TUNE_TRIAL_CYCLES: u32 = 1_000;

/// Pause after each calibration cut.
pub const TUNE_SETTLE_US: u64 = 1_000;

/// Offset increment applied on every surviving cycle.
pub const OFFSET_STEP_NS: u64 = 100;

/// Parameters for the offset sweep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SweepConfig {
    timeout: Duration,
    reset: Duration,
    offset_step: Duration,
}

impl SweepConfig {
    pub const fn new(timeout: Duration, reset: Duration, offset_step: Duration) -> Self {
        Self {
            timeout,
            reset,
            offset_step,
        }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub const fn reset(&self) -> Duration {
        self.reset
    }

    pub const fn offset_step(&self) -> Duration {
        self.offset_step
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_micros(TIMEOUT_US),
            Duration::from_micros(RESET_US),
            Duration::from_nanos(OFFSET_STEP_NS),
        )
    }
}

/// Parameters for pulse-width calibration. Durations are whole microseconds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TuningConfig {
    pub duration_max_us: u32,
    pub initial_step_us: u32,
    pub triggers_per_second: u32,
    pub trial_cycles: u32,
    pub settle: Duration,
}

impl TuningConfig {
    pub const fn new(duration_max_us: u32, initial_step_us: u32, triggers_per_second: u32) -> Self {
        Self {
            duration_max_us,
            initial_step_us,
            triggers_per_second,
            trial_cycles: TUNE_TRIAL_CYCLES,
            settle: Duration::from_micros(TUNE_SETTLE_US),
        }
    }

    /// Survival count at which the search stops shrinking and creeps upward.
    pub const fn flip_threshold(&self) -> u32 {
        self.triggers_per_second.saturating_sub(1)
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self::new(
            TUNE_DURATION_MAX,
            TUNE_INITIAL_STEP,
            TUNE_TRIGGERS_PER_SECOND,
        )
    }
}

/// Complete controller configuration.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GlitchConfig {
    pub sweep: SweepConfig,
    pub tuning: TuningConfig,
}

/// Which edge of an input counts as "active".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum EdgePolarity {
    #[default]
    Rising,
    Falling,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bench_constants() {
        let config = GlitchConfig::default();

        assert_eq!(config.sweep.timeout(), Duration::from_secs(1));
        assert_eq!(config.sweep.reset(), Duration::from_millis(300));
        assert_eq!(config.sweep.offset_step(), Duration::from_nanos(100));
        assert_eq!(config.tuning.initial_step_us, 80);
        assert_eq!(config.tuning.flip_threshold(), 5);
        assert!(config.sweep.reset() > Duration::from_micros(u64::from(TUNE_DURATION_MAX)));
    }

    #[test]
    fn flip_threshold_saturates() {
        let config = TuningConfig::new(100, 10, 0);
        assert_eq!(config.flip_threshold(), 0);
    }
}
