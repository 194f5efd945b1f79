//! Event records exchanged between producers and the state machine.
//!
//! Edge watchers and deadline timers never touch controller state. They push a
//! [`GlitchEvent`] into a bounded queue and a single consumer applies it. The
//! producer trait lets firmware channels and host queues share that contract.

use core::time::Duration;

use crate::timers::{Generation, TimerId};

/// Something the state machine has to react to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GlitchEvent<TInstant = u64> {
    /// Active edge on the trigger input, captured at `at`.
    Trigger { at: TInstant },
    /// Active edge on the success input.
    Success { at: TInstant },
    /// A deadline elapsed.
    TimerFired {
        timer: TimerId,
        generation: Generation,
        at: TInstant,
    },
    /// Calibration is about to run.
    TuningStarted,
    /// Calibration finished with the given pulse width.
    TuningComplete { duration: Duration },
}

/// Error surfaced when an event cannot be enqueued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventEnqueueError {
    /// Queue has reached its maximum capacity; the event was dropped.
    QueueFull,
}

/// Trait implemented by anything that pushes events toward the state machine.
///
/// Implementations must be callable from interrupt-like contexts: no
/// blocking, no waiting for space.
pub trait EventQueueProducer {
    /// Monotonic timestamp type attached to events.
    type Instant: Copy;

    /// Attempts to enqueue an event without blocking.
    fn try_enqueue(&mut self, event: GlitchEvent<Self::Instant>) -> Result<(), EventEnqueueError>;
}
