//! Glitch control surface bridging firmware tasks with `glitch-core`.
//!
//! Edge watchers and deadline timers push [`FirmwareEvent`]s into one bounded
//! Embassy channel; the glitch task is its only consumer. This module owns the
//! channel types, the timestamp wrapper the core state machine is generic over,
//! and the log helpers that narrate each transition.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::ops::Add;

#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use embassy_time::{Duration, Instant};
use glitch_core::events::{EventEnqueueError, EventQueueProducer, GlitchEvent};
use glitch_core::glitch::Transition;
use glitch_core::tuning::{TrialRecord, TuningResult};

use crate::status::StatusSnapshot;

/// Depth of the event queue shared between producers and the glitch task.
pub const EVENT_QUEUE_DEPTH: usize = 16;

#[cfg(target_os = "none")]
type EventMutex = CriticalSectionRawMutex;
#[cfg(not(target_os = "none"))]
type EventMutex = NoopRawMutex;

/// Embassy monotonic instant usable as the core state machine's clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    #[cfg(target_os = "none")]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    pub const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(value: Instant) -> Self {
        Self(value)
    }
}

impl From<FirmwareInstant> for Instant {
    fn from(value: FirmwareInstant) -> Self {
        value.0
    }
}

impl Add<core::time::Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: core::time::Duration) -> Self::Output {
        Self(
            self.0
                .checked_add(core_duration_to_embassy(rhs))
                .unwrap_or(Instant::MAX),
        )
    }
}

/// Converts at nanosecond precision; Embassy rounds up to the next tick.
pub fn core_duration_to_embassy(duration: core::time::Duration) -> Duration {
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(nanos)
}

/// Event record bound to the firmware clock.
pub type FirmwareEvent = GlitchEvent<FirmwareInstant>;

/// Queue carrying events from watchers and timers to the glitch task.
pub type EventQueue = Channel<EventMutex, FirmwareEvent, EVENT_QUEUE_DEPTH>;

pub type EventSender<'a> = Sender<'a, EventMutex, FirmwareEvent, EVENT_QUEUE_DEPTH>;

pub type EventReceiver<'a> = Receiver<'a, EventMutex, FirmwareEvent, EVENT_QUEUE_DEPTH>;

/// Adapter that exposes the Embassy channel sender as a `glitch-core` producer.
pub struct EventProducer<'a> {
    sender: EventSender<'a>,
}

impl<'a> EventProducer<'a> {
    pub fn new(sender: EventSender<'a>) -> Self {
        Self { sender }
    }
}

impl EventQueueProducer for EventProducer<'_> {
    type Instant = FirmwareInstant;

    fn try_enqueue(&mut self, event: FirmwareEvent) -> Result<(), EventEnqueueError> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EventEnqueueError::QueueFull),
        }
    }
}

/// Which watched input produced an edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeSource {
    Trigger,
    Success,
}

impl EdgeSource {
    pub const fn event(self, at: FirmwareInstant) -> FirmwareEvent {
        match self {
            EdgeSource::Trigger => GlitchEvent::Trigger { at },
            EdgeSource::Success => GlitchEvent::Success { at },
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            EdgeSource::Trigger => "trigger",
            EdgeSource::Success => "success",
        }
    }
}

fn nanos(duration: core::time::Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn micros(duration: core::time::Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(target_os = "none")]
pub fn log_transition(transition: &Transition) {
    match *transition {
        // Out-of-state edges stay quiet; the trigger line is too busy to log.
        Transition::Ignored | Transition::TuningTrigger { .. } => {}
        Transition::TuningStarted => defmt::info!("tune: calibration started"),
        Transition::SweepReady { duration } => defmt::info!(
            "sweep: target reset, duration={=u64}us, waiting for first trigger",
            micros(duration)
        ),
        Transition::TargetAlive => defmt::info!("sweep: target alive, glitching from next trigger"),
        Transition::GlitchArmed { cycle, offset } => defmt::debug!(
            "sweep: cycle={=u32} offset={=u64}ns armed",
            cycle,
            nanos(offset)
        ),
        Transition::Glitched(params) => defmt::debug!(
            "sweep: pulse offset={=u64}ns duration={=u64}us",
            nanos(params.offset),
            micros(params.duration)
        ),
        Transition::CrashReset { offset } => defmt::warn!(
            "sweep: no trigger after glitch at offset={=u64}ns, hard reset",
            nanos(offset)
        ),
        Transition::Stopped(report) => defmt::info!(
            "SUCCESS offset={=u64}ns duration={=u64}us after {=u32} cycles",
            nanos(report.params.offset),
            micros(report.params.duration),
            report.cycles
        ),
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_transition(transition: &Transition) {
    match *transition {
        Transition::Ignored | Transition::TuningTrigger { .. } => {}
        Transition::TuningStarted => println!("tune: calibration started"),
        Transition::SweepReady { duration } => println!(
            "sweep: target reset, duration={}us, waiting for first trigger",
            micros(duration)
        ),
        Transition::TargetAlive => println!("sweep: target alive, glitching from next trigger"),
        Transition::GlitchArmed { cycle, offset } => {
            println!("sweep: cycle={cycle} offset={}ns armed", nanos(offset));
        }
        Transition::Glitched(params) => println!(
            "sweep: pulse offset={}ns duration={}us",
            nanos(params.offset),
            micros(params.duration)
        ),
        Transition::CrashReset { offset } => println!(
            "sweep: no trigger after glitch at offset={}ns, hard reset",
            nanos(offset)
        ),
        Transition::Stopped(report) => println!(
            "SUCCESS offset={}ns duration={}us after {} cycles",
            nanos(report.params.offset),
            micros(report.params.duration),
            report.cycles
        ),
    }
}

#[cfg(target_os = "none")]
pub fn log_trial(duration: core::time::Duration, count: u32) {
    defmt::info!("tune: trial duration={=u64}us triggers={=u32}", micros(duration), count);
}

#[cfg(not(target_os = "none"))]
pub fn log_trial(duration: core::time::Duration, count: u32) {
    println!("tune: trial duration={}us triggers={count}", micros(duration));
}

#[cfg(target_os = "none")]
pub fn log_trial_history<'a>(trials: impl Iterator<Item = &'a TrialRecord>) {
    for (index, trial) in trials.enumerate() {
        defmt::info!(
            "tune: history[{=usize}] duration={=u32}us triggers={=u32}",
            index,
            trial.duration_us,
            trial.count
        );
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_trial_history<'a>(trials: impl Iterator<Item = &'a TrialRecord>) {
    for (index, trial) in trials.enumerate() {
        println!(
            "tune: history[{index}] duration={}us triggers={}",
            trial.duration_us, trial.count
        );
    }
}

#[cfg(target_os = "none")]
pub fn log_tuning_result(result: &TuningResult) {
    if result.count == 0 {
        defmt::warn!("tune: target never triggered, sweeping with a zero-width pulse");
    } else {
        defmt::info!(
            "tune: best duration={=u64}us ({=u32} triggers)",
            micros(result.duration),
            result.count
        );
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_tuning_result(result: &TuningResult) {
    if result.count == 0 {
        println!("tune: target never triggered, sweeping with a zero-width pulse");
    } else {
        println!(
            "tune: best duration={}us ({} triggers)",
            micros(result.duration),
            result.count
        );
    }
}

#[cfg(target_os = "none")]
pub fn log_dropped_edge(label: &'static str) {
    defmt::warn!("events: queue full, dropped {} event", label);
}

#[cfg(not(target_os = "none"))]
pub fn log_dropped_edge(label: &'static str) {
    println!("events: queue full, dropped {label} event");
}

#[cfg(target_os = "none")]
pub fn log_status(status: &StatusSnapshot) {
    defmt::info!(
        "status: {} offset={=u64}ns duration={=u64}us cycles={=u32}",
        status.state.label(),
        nanos(status.offset),
        micros(status.duration),
        status.cycles
    );
}

#[cfg(not(target_os = "none"))]
pub fn log_status(status: &StatusSnapshot) {
    println!(
        "status: {} offset={}ns duration={}us cycles={}",
        status.state,
        nanos(status.offset),
        micros(status.duration),
        status.cycles
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::channel::TryReceiveError;

    #[test]
    fn producer_reports_full_queue() {
        let queue = EventQueue::new();
        let mut producer = EventProducer::new(queue.sender());
        let at = FirmwareInstant::from_micros(5);

        for _ in 0..EVENT_QUEUE_DEPTH {
            producer
                .try_enqueue(EdgeSource::Trigger.event(at))
                .expect("queue has room");
        }

        assert_eq!(
            producer.try_enqueue(EdgeSource::Success.event(at)),
            Err(EventEnqueueError::QueueFull)
        );
    }

    #[test]
    fn events_arrive_in_fifo_order() {
        let queue = EventQueue::new();
        let mut producer = EventProducer::new(queue.sender());
        let receiver = queue.receiver();

        producer
            .try_enqueue(EdgeSource::Trigger.event(FirmwareInstant::from_micros(1)))
            .expect("enqueue trigger");
        producer
            .try_enqueue(EdgeSource::Success.event(FirmwareInstant::from_micros(2)))
            .expect("enqueue success");

        assert_eq!(
            receiver.try_receive(),
            Ok(GlitchEvent::Trigger {
                at: FirmwareInstant::from_micros(1)
            })
        );
        assert_eq!(
            receiver.try_receive(),
            Ok(GlitchEvent::Success {
                at: FirmwareInstant::from_micros(2)
            })
        );
        assert_eq!(receiver.try_receive(), Err(TryReceiveError::Empty));
    }

    #[test]
    fn instant_addition_keeps_sub_microsecond_offsets() {
        let base = FirmwareInstant::from_micros(10);
        let later = base + core::time::Duration::from_nanos(100);

        assert!(later > base);
        assert!(
            later.into_embassy() - base.into_embassy() <= Duration::from_micros(1),
            "100ns offset must not round up to whole microseconds"
        );
    }

    #[test]
    fn instant_addition_saturates() {
        let base = FirmwareInstant::from_micros(10);

        assert_eq!(
            (base + core::time::Duration::MAX).into_embassy(),
            Instant::MAX
        );
        assert_eq!(
            FirmwareInstant::from(Instant::MAX) + core::time::Duration::from_secs(1),
            FirmwareInstant::from(Instant::MAX)
        );
    }
}
