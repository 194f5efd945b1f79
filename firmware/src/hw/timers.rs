//! Deadline timers backing [`TimerService`].
//!
//! Each [`TimerId`] gets one [`DeadlineTimer`] signal watched by its own timer
//! task. Arming or cancelling overwrites whatever command is still pending, so
//! the task only ever sees the latest request.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use glitch_core::timers::{Generation, TimerId, TimerService};

use crate::glitch::FirmwareInstant;

#[cfg(target_os = "none")]
type TimerMutex = CriticalSectionRawMutex;
#[cfg(not(target_os = "none"))]
type TimerMutex = NoopRawMutex;

/// Request handed to a timer task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerCommand {
    Arm {
        deadline: FirmwareInstant,
        generation: Generation,
    },
    Cancel,
}

/// Mailbox between the state machine and one timer task.
pub type DeadlineTimer = Signal<TimerMutex, TimerCommand>;

/// [`TimerService`] that forwards requests to the timer tasks.
pub struct FirmwareTimers<'a> {
    glitch: &'a DeadlineTimer,
    timeout: &'a DeadlineTimer,
}

impl<'a> FirmwareTimers<'a> {
    pub fn new(glitch: &'a DeadlineTimer, timeout: &'a DeadlineTimer) -> Self {
        Self { glitch, timeout }
    }

    fn timer(&self, timer: TimerId) -> &'a DeadlineTimer {
        match timer {
            TimerId::Glitch => self.glitch,
            TimerId::Timeout => self.timeout,
        }
    }
}

impl TimerService for FirmwareTimers<'_> {
    type Instant = FirmwareInstant;

    fn arm(&mut self, timer: TimerId, deadline: Self::Instant, generation: Generation) {
        self.timer(timer).signal(TimerCommand::Arm {
            deadline,
            generation,
        });
    }

    fn cancel(&mut self, timer: TimerId) {
        self.timer(timer).signal(TimerCommand::Cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_targets_the_matching_mailbox() {
        let glitch = DeadlineTimer::new();
        let timeout = DeadlineTimer::new();
        let mut timers = FirmwareTimers::new(&glitch, &timeout);

        let deadline = FirmwareInstant::from_micros(42);
        timers.arm(TimerId::Timeout, deadline, Generation::new(3));

        assert_eq!(glitch.try_take(), None);
        assert_eq!(
            timeout.try_take(),
            Some(TimerCommand::Arm {
                deadline,
                generation: Generation::new(3),
            })
        );
    }

    #[test]
    fn latest_command_wins() {
        let glitch = DeadlineTimer::new();
        let timeout = DeadlineTimer::new();
        let mut timers = FirmwareTimers::new(&glitch, &timeout);

        timers.arm(
            TimerId::Glitch,
            FirmwareInstant::from_micros(1),
            Generation::new(1),
        );
        timers.cancel(TimerId::Glitch);
        assert_eq!(glitch.try_take(), Some(TimerCommand::Cancel));

        timers.cancel(TimerId::Glitch);
        timers.arm(
            TimerId::Glitch,
            FirmwareInstant::from_micros(9),
            Generation::new(2),
        );
        assert_eq!(
            glitch.try_take(),
            Some(TimerCommand::Arm {
                deadline: FirmwareInstant::from_micros(9),
                generation: Generation::new(2),
            })
        );
        assert_eq!(glitch.try_take(), None);
    }
}
