//! Pulse-width calibration.
//!
//! Starting from a width that is known to crash the target, the tuner shrinks
//! the pulse until the target keeps producing triggers at its normal rate,
//! then creeps back up in small steps until survival regresses. The widest
//! pulse that still survived is the width used for the sweep.
//!
//! The tuner only does bookkeeping. Whoever owns the hardware asks it for the
//! next trial width, runs the trial, and reports the trigger count back:
//!
//! ```
//! use core::time::Duration;
//! use glitch_core::config::TuningConfig;
//! use glitch_core::tuning::calibrate;
//!
//! let config = TuningConfig::new(800, 80, 6);
//! let result = calibrate(config, |width: Duration| if width.as_micros() < 500 { 6 } else { 0 });
//! assert!(result.duration < Duration::from_micros(500));
//! ```

use core::time::Duration;

use heapless::{HistoryBuf, OldestOrdered};

use crate::config::TuningConfig;

/// Number of recent trials kept for diagnostics.
pub const TRIAL_HISTORY: usize = 32;

/// Outcome of a single calibration trial.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrialRecord {
    pub duration_us: u32,
    pub count: u32,
}

/// Width chosen by calibration, with the survival count that justified it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TuningResult {
    pub duration: Duration,
    pub count: u32,
}

/// Direction of the search.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SearchPhase {
    Shrinking,
    Creeping,
    Finished,
}

/// What the caller should do after reporting a trial.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TunerStep {
    /// Run another trial at this width.
    Trial(Duration),
    Finished(TuningResult),
}

pub struct DurationTuner {
    config: TuningConfig,
    duration_us: u32,
    step_us: u32,
    phase: SearchPhase,
    best: Option<TrialRecord>,
    history: HistoryBuf<TrialRecord, TRIAL_HISTORY>,
}

impl DurationTuner {
    pub fn new(config: TuningConfig) -> Self {
        let phase = if config.duration_max_us == 0 {
            SearchPhase::Finished
        } else {
            SearchPhase::Shrinking
        };

        Self {
            config,
            duration_us: config.duration_max_us,
            step_us: config.initial_step_us.max(1),
            phase,
            best: None,
            history: HistoryBuf::new(),
        }
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    /// Width of the next trial, or `None` once the search has ended.
    pub fn next_trial(&self) -> Option<Duration> {
        match self.phase {
            SearchPhase::Finished => None,
            _ => Some(Duration::from_micros(u64::from(self.duration_us))),
        }
    }

    /// Records the trigger count of the trial returned by
    /// [`next_trial`](Self::next_trial) and advances the search.
    pub fn record(&mut self, count: u32) -> TunerStep {
        if self.phase == SearchPhase::Finished {
            return TunerStep::Finished(self.result());
        }

        let trial = TrialRecord {
            duration_us: self.duration_us,
            count,
        };
        self.history.write(trial);

        let best_count = self.best.map_or(0, |best| best.count);
        if count > 0 && count >= best_count {
            self.best = Some(trial);
            // The creep step tracks the width that just survived.
            if count >= self.config.flip_threshold() {
                self.phase = SearchPhase::Creeping;
                self.step_us = (self.duration_us / 20).max(1);
            }
        } else if self.phase == SearchPhase::Creeping {
            self.phase = SearchPhase::Finished;
        }

        self.advance()
    }

    fn advance(&mut self) -> TunerStep {
        match self.phase {
            SearchPhase::Shrinking => match self.duration_us.checked_sub(self.step_us) {
                Some(next) if next > 0 => self.duration_us = next,
                _ => self.phase = SearchPhase::Finished,
            },
            SearchPhase::Creeping => {
                let next = self.duration_us.saturating_add(self.step_us);
                if next > self.config.duration_max_us {
                    self.phase = SearchPhase::Finished;
                } else {
                    self.duration_us = next;
                }
            }
            SearchPhase::Finished => {}
        }

        match self.next_trial() {
            Some(duration) => TunerStep::Trial(duration),
            None => TunerStep::Finished(self.result()),
        }
    }

    /// Best width found so far; zero if no trial ever saw a trigger.
    pub fn result(&self) -> TuningResult {
        self.best.map_or_else(TuningResult::default, |best| TuningResult {
            duration: Duration::from_micros(u64::from(best.duration_us)),
            count: best.count,
        })
    }

    /// Recent trials, oldest first.
    pub fn trials(&self) -> OldestOrdered<'_, TrialRecord> {
        self.history.oldest_ordered()
    }
}

/// Runs a whole calibration synchronously. `trial` performs one trial at the
/// given width and returns the number of triggers it observed.
pub fn calibrate<F>(config: TuningConfig, mut trial: F) -> TuningResult
where
    F: FnMut(Duration) -> u32,
{
    let mut tuner = DurationTuner::new(config);
    while let Some(duration) = tuner.next_trial() {
        let count = trial(duration);
        if let TunerStep::Finished(result) = tuner.record(count) {
            return result;
        }
    }
    tuner.result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_finishes_immediately() {
        let tuner = DurationTuner::new(TuningConfig::new(0, 10, 6));
        assert_eq!(tuner.next_trial(), None);
        assert_eq!(tuner.result(), TuningResult::default());
    }

    #[test]
    fn creep_step_never_stalls() {
        let mut tuner = DurationTuner::new(TuningConfig::new(10, 5, 6));
        tuner.record(0);
        assert_eq!(tuner.next_trial(), Some(Duration::from_micros(5)));

        // 5 / 20 rounds to zero; the search must still move.
        assert_eq!(
            tuner.record(6),
            TunerStep::Trial(Duration::from_micros(6))
        );
        assert_eq!(tuner.phase(), SearchPhase::Creeping);
    }

    #[test]
    fn creep_step_follows_each_surviving_width() {
        let mut tuner = DurationTuner::new(TuningConfig::new(800, 80, 6));
        for _ in 0..2 {
            tuner.record(0);
        }
        assert_eq!(tuner.record(2), TunerStep::Trial(Duration::from_micros(560)));
        assert_eq!(tuner.record(5), TunerStep::Trial(Duration::from_micros(588)));

        // 588 / 20 = 29, not the 28 derived from 560.
        assert_eq!(tuner.record(5), TunerStep::Trial(Duration::from_micros(617)));
        assert_eq!(tuner.phase(), SearchPhase::Creeping);
    }

    #[test]
    fn trial_history_is_oldest_first() {
        let mut tuner = DurationTuner::new(TuningConfig::new(30, 10, 6));
        tuner.record(0);
        tuner.record(1);

        assert!(tuner.trials().map(|trial| trial.duration_us).eq([30, 20]));
    }

    #[test]
    fn creeping_stops_at_configured_maximum() {
        let result = calibrate(TuningConfig::new(40, 20, 2), |_| 6);

        // 40 survives, flips upward, next would exceed the maximum.
        assert_eq!(result.duration, Duration::from_micros(40));
    }

    #[test]
    fn record_after_finish_is_stable() {
        let mut tuner = DurationTuner::new(TuningConfig::new(20, 20, 6));
        assert!(matches!(tuner.record(3), TunerStep::Finished(_)));
        assert_eq!(
            tuner.record(9),
            TunerStep::Finished(TuningResult {
                duration: Duration::from_micros(20),
                count: 3,
            })
        );
    }
}
