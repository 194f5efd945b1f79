#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! The glitch task publishes its state after every processed event. Lock-free
//! atomics let the heartbeat task and the panic handler read a
//! [`StatusSnapshot`] without reaching into the state machine.

use core::time::Duration;

use glitch_core::glitch::{GlitchParameters, GlitchState};
use portable_atomic::{AtomicU8, AtomicU32, Ordering};

/// Current [`GlitchState`] encoded with [`GlitchState::as_u8`].
static STATE: AtomicU8 = AtomicU8::new(0);
/// Glitch offset in nanoseconds, saturated at `u32::MAX`.
static OFFSET_NS: AtomicU32 = AtomicU32::new(0);
/// Tuned pulse width in microseconds.
static DURATION_US: AtomicU32 = AtomicU32::new(0);
/// Glitch cycles armed so far.
static CYCLES: AtomicU32 = AtomicU32::new(0);

/// Point-in-time copy of the published status.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusSnapshot {
    pub state: GlitchState,
    pub offset: Duration,
    pub duration: Duration,
    pub cycles: u32,
}

fn saturate_u32(value: u128) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Publishes the controller's current view.
pub fn publish(state: GlitchState, params: GlitchParameters, cycles: u32) {
    STATE.store(state.as_u8(), Ordering::Relaxed);
    OFFSET_NS.store(saturate_u32(params.offset.as_nanos()), Ordering::Relaxed);
    DURATION_US.store(saturate_u32(params.duration.as_micros()), Ordering::Relaxed);
    CYCLES.store(cycles, Ordering::Relaxed);
}

/// Reads back the most recently published status.
pub fn snapshot() -> StatusSnapshot {
    let state = GlitchState::from_u8(STATE.load(Ordering::Relaxed)).unwrap_or_default();
    StatusSnapshot {
        state,
        offset: Duration::from_nanos(u64::from(OFFSET_NS.load(Ordering::Relaxed))),
        duration: Duration::from_micros(u64::from(DURATION_US.load(Ordering::Relaxed))),
        cycles: CYCLES.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_round_trips_and_saturates() {
        publish(
            GlitchState::WaitGlitch,
            GlitchParameters {
                offset: Duration::from_nanos(12_300),
                duration: Duration::from_micros(588),
            },
            123,
        );

        let status = snapshot();
        assert_eq!(status.state, GlitchState::WaitGlitch);
        assert_eq!(status.offset, Duration::from_nanos(12_300));
        assert_eq!(status.duration, Duration::from_micros(588));
        assert_eq!(status.cycles, 123);

        publish(
            GlitchState::WaitTrigger,
            GlitchParameters {
                offset: Duration::from_secs(10),
                duration: Duration::ZERO,
            },
            124,
        );
        assert_eq!(
            snapshot().offset,
            Duration::from_nanos(u64::from(u32::MAX))
        );
    }
}
