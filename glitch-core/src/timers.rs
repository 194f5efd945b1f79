//! Deadline timer abstractions.
//!
//! The rig needs two one-shot deadlines: the glitch delay (armed on a trigger
//! edge) and the crash timeout (armed after a pulse). Fires reach the state
//! machine as queued events, so a fire can already be in flight when its timer
//! is cancelled or re-armed. [`TimerBank`] stamps every arming with a
//! [`Generation`] and only accepts the fire that matches the live arming.

use core::fmt;

/// Identifies one of the two deadline timers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerId {
    Glitch,
    Timeout,
}

impl TimerId {
    pub const fn as_index(self) -> usize {
        match self {
            TimerId::Glitch => 0,
            TimerId::Timeout => 1,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            TimerId::Glitch => "glitch",
            TimerId::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Arming counter attached to a scheduled deadline and echoed back on fire.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Generation(u32);

impl Generation {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Hardware side of the timers.
///
/// `arm` replaces any pending deadline for `timer`; `cancel` is a no-op on an
/// idle timer. When the deadline passes the service delivers a fire event
/// carrying `generation` back to the state machine.
///
/// Adding a `Duration` to `Instant` is expected to saturate at the end of the
/// clock's range rather than panic.
pub trait TimerService {
    /// Monotonic timestamp type used for deadlines.
    type Instant: Copy;

    fn arm(&mut self, timer: TimerId, deadline: Self::Instant, generation: Generation);

    fn cancel(&mut self, timer: TimerId);
}

#[derive(Copy, Clone, Debug, Default)]
struct Slot {
    last: Generation,
    armed: Option<Generation>,
}

/// Book-keeping for which arming of each timer is live.
#[derive(Clone, Debug, Default)]
pub struct TimerBank {
    slots: [Slot; 2],
}

impl TimerBank {
    pub const fn new() -> Self {
        Self {
            slots: [
                Slot {
                    last: Generation(0),
                    armed: None,
                },
                Slot {
                    last: Generation(0),
                    armed: None,
                },
            ],
        }
    }

    /// Starts a new arming of `timer`, superseding any previous one.
    pub fn arm(&mut self, timer: TimerId) -> Generation {
        let slot = &mut self.slots[timer.as_index()];
        let generation = slot.last.next();
        slot.last = generation;
        slot.armed = Some(generation);
        generation
    }

    /// Disarms `timer`. Returns `true` if it was armed.
    pub fn cancel(&mut self, timer: TimerId) -> bool {
        self.slots[timer.as_index()].armed.take().is_some()
    }

    /// Consumes a fire event. Returns `true` only for the live arming, which
    /// is disarmed as a result; stale or duplicate fires return `false`.
    pub fn accept_fire(&mut self, timer: TimerId, generation: Generation) -> bool {
        let slot = &mut self.slots[timer.as_index()];
        if slot.armed == Some(generation) {
            slot.armed = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self, timer: TimerId) -> bool {
        self.slots[timer.as_index()].armed.is_some()
    }

    /// Number of timers currently armed.
    pub fn armed_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.armed.is_some()).count()
    }
}
