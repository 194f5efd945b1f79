//! Glitch state machine.
//!
//! The machine owns the power actuator and the timer service and is the only
//! place controller state changes. Callers feed it [`GlitchEvent`]s one at a
//! time from a single consumer and log the returned [`Transition`].
//!
//! | state          | event          | action                                         | next           |
//! |----------------|----------------|------------------------------------------------|----------------|
//! | `Idle`         | tuning started | reset tuning counter                           | `TuneGlitch`   |
//! | `TuneGlitch`   | trigger        | count the edge                                 | `TuneGlitch`   |
//! | `Idle`/`Tune…` | tuning complete| fix duration, hard reset                       | `Start`        |
//! | `Start`        | trigger        | -                                              | `WaitTrigger`  |
//! | `WaitTrigger`  | trigger        | cancel timeout, advance offset, arm glitch     | `WaitGlitch`   |
//! | `WaitGlitch`   | glitch fired   | cut `duration`, arm timeout                    | `WaitTrigger`  |
//! | `WaitTrigger`  | timeout fired  | cut reset width, offset unchanged              | `WaitTrigger`  |
//! | any            | success        | cancel both timers, report                     | `Idle`         |
//!
//! Every other pair is ignored without side effects.

use core::{fmt, ops::Add, time::Duration};

use crate::config::SweepConfig;
use crate::events::GlitchEvent;
use crate::power::PowerActuator;
use crate::timers::{Generation, TimerBank, TimerId, TimerService};

/// Controller phase. Exactly one holds at any time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GlitchState {
    #[default]
    Idle,
    Start,
    TuneGlitch,
    WaitTrigger,
    WaitGlitch,
    Glitching,
}

impl GlitchState {
    pub const ALL: [GlitchState; 6] = [
        GlitchState::Idle,
        GlitchState::Start,
        GlitchState::TuneGlitch,
        GlitchState::WaitTrigger,
        GlitchState::WaitGlitch,
        GlitchState::Glitching,
    ];

    pub const fn as_u8(self) -> u8 {
        match self {
            GlitchState::Idle => 0,
            GlitchState::Start => 1,
            GlitchState::TuneGlitch => 2,
            GlitchState::WaitTrigger => 3,
            GlitchState::WaitGlitch => 4,
            GlitchState::Glitching => 5,
        }
    }

    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(GlitchState::Idle),
            1 => Some(GlitchState::Start),
            2 => Some(GlitchState::TuneGlitch),
            3 => Some(GlitchState::WaitTrigger),
            4 => Some(GlitchState::WaitGlitch),
            5 => Some(GlitchState::Glitching),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            GlitchState::Idle => "idle",
            GlitchState::Start => "start",
            GlitchState::TuneGlitch => "tune-glitch",
            GlitchState::WaitTrigger => "wait-trigger",
            GlitchState::WaitGlitch => "wait-glitch",
            GlitchState::Glitching => "glitching",
        }
    }
}

impl fmt::Display for GlitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Timing of one glitch relative to its trigger edge.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GlitchParameters {
    /// Delay from trigger edge to pulse start (nanosecond resolution).
    pub offset: Duration,
    /// Pulse width (microsecond resolution).
    pub duration: Duration,
}

/// Final parameters reported when the target signals success.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SweepReport {
    pub params: GlitchParameters,
    /// Glitch cycles armed before success.
    pub cycles: u32,
}

/// What a handled event did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transition {
    /// Event did not apply in the current state.
    Ignored,
    TuningStarted,
    /// Trigger counted during calibration.
    TuningTrigger { count: u32 },
    /// Duration fixed and target hard-reset; waiting for its first trigger.
    SweepReady { duration: Duration },
    /// First trigger after the reset; the next one starts glitching.
    TargetAlive,
    /// Glitch timer armed for `offset` after the trigger.
    GlitchArmed { cycle: u32, offset: Duration },
    /// Pulse delivered; crash timeout armed.
    Glitched(GlitchParameters),
    /// No trigger within the timeout; target power-cycled.
    CrashReset { offset: Duration },
    /// Success edge observed; everything stopped.
    Stopped(SweepReport),
}

/// The controller: state, parameters, and the hardware it drives.
pub struct GlitchStateMachine<A, T>
where
    T: TimerService,
{
    actuator: A,
    timers: T,
    bank: TimerBank,
    config: SweepConfig,
    state: GlitchState,
    params: GlitchParameters,
    duration_locked: bool,
    tuning_count: u32,
    cycles: u32,
    report: Option<SweepReport>,
}

impl<A, T> GlitchStateMachine<A, T>
where
    A: PowerActuator,
    T: TimerService,
    T::Instant: Add<Duration, Output = T::Instant>,
{
    /// Creates an idle machine with a zero offset.
    pub fn new(actuator: A, timers: T, config: SweepConfig) -> Self {
        Self {
            actuator,
            timers,
            bank: TimerBank::new(),
            config,
            state: GlitchState::Idle,
            params: GlitchParameters {
                offset: Duration::ZERO,
                duration: Duration::ZERO,
            },
            duration_locked: false,
            tuning_count: 0,
            cycles: 0,
            report: None,
        }
    }

    pub fn state(&self) -> GlitchState {
        self.state
    }

    pub fn params(&self) -> GlitchParameters {
        self.params
    }

    /// Number of glitch cycles armed so far.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Report captured when success was observed.
    pub fn report(&self) -> Option<SweepReport> {
        self.report
    }

    pub fn is_finished(&self) -> bool {
        self.report.is_some()
    }

    /// Trigger edges counted since the last [`reset_tuning_counter`](Self::reset_tuning_counter).
    pub fn tuning_count(&self) -> u32 {
        self.tuning_count
    }

    pub fn reset_tuning_counter(&mut self) {
        self.tuning_count = 0;
    }

    pub fn timer_armed(&self, timer: TimerId) -> bool {
        self.bank.is_armed(timer)
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Calibration drives the rail directly between events.
    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    /// Applies one event.
    pub fn handle(&mut self, event: GlitchEvent<T::Instant>) -> Transition {
        if self.report.is_some() {
            return Transition::Ignored;
        }

        match (self.state, event) {
            (_, GlitchEvent::Success { .. }) => self.stop(),
            (GlitchState::Idle, GlitchEvent::TuningStarted) => {
                self.tuning_count = 0;
                self.state = GlitchState::TuneGlitch;
                Transition::TuningStarted
            }
            (GlitchState::TuneGlitch, GlitchEvent::Trigger { .. }) => {
                self.tuning_count = self.tuning_count.saturating_add(1);
                Transition::TuningTrigger {
                    count: self.tuning_count,
                }
            }
            (
                GlitchState::Idle | GlitchState::TuneGlitch,
                GlitchEvent::TuningComplete { duration },
            ) => self.begin_sweep(duration),
            (GlitchState::Start, GlitchEvent::Trigger { .. }) => {
                self.state = GlitchState::WaitTrigger;
                Transition::TargetAlive
            }
            (GlitchState::WaitTrigger, GlitchEvent::Trigger { at }) => self.arm_glitch(at),
            (
                state,
                GlitchEvent::TimerFired {
                    timer,
                    generation,
                    at,
                },
            ) => self.on_timer(state, timer, generation, at),
            _ => Transition::Ignored,
        }
    }

    fn begin_sweep(&mut self, duration: Duration) -> Transition {
        if !self.duration_locked {
            self.params.duration = duration;
            self.duration_locked = true;
        }

        self.actuator.cut(self.config.reset());
        self.state = GlitchState::Start;
        Transition::SweepReady {
            duration: self.params.duration,
        }
    }

    fn arm_glitch(&mut self, trigger_at: T::Instant) -> Transition {
        self.cancel_timer(TimerId::Timeout);

        self.params.offset = self.params.offset.saturating_add(self.config.offset_step());
        self.cycles = self.cycles.saturating_add(1);
        self.arm_timer(TimerId::Glitch, trigger_at + self.params.offset);

        self.state = GlitchState::WaitGlitch;
        Transition::GlitchArmed {
            cycle: self.cycles,
            offset: self.params.offset,
        }
    }

    fn on_timer(
        &mut self,
        state: GlitchState,
        timer: TimerId,
        generation: Generation,
        at: T::Instant,
    ) -> Transition {
        if !self.bank.accept_fire(timer, generation) {
            return Transition::Ignored;
        }

        match (state, timer) {
            (GlitchState::WaitGlitch, TimerId::Glitch) => {
                debug_assert!(!self.bank.is_armed(TimerId::Glitch));
                self.state = GlitchState::Glitching;
                self.actuator.cut(self.params.duration);
                self.arm_timer(TimerId::Timeout, at + self.config.timeout());
                self.state = GlitchState::WaitTrigger;
                Transition::Glitched(self.params)
            }
            (GlitchState::WaitTrigger, TimerId::Timeout) => {
                self.actuator.cut(self.config.reset());
                Transition::CrashReset {
                    offset: self.params.offset,
                }
            }
            _ => Transition::Ignored,
        }
    }

    fn stop(&mut self) -> Transition {
        self.cancel_timer(TimerId::Glitch);
        self.cancel_timer(TimerId::Timeout);
        self.state = GlitchState::Idle;

        let report = SweepReport {
            params: self.params,
            cycles: self.cycles,
        };
        self.report = Some(report);
        Transition::Stopped(report)
    }

    fn arm_timer(&mut self, timer: TimerId, deadline: T::Instant) {
        let generation = self.bank.arm(timer);
        self.timers.arm(timer, deadline, generation);
    }

    fn cancel_timer(&mut self, timer: TimerId) {
        if self.bank.cancel(timer) {
            self.timers.cancel(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    struct MockInstant(u64);

    impl Add<Duration> for MockInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            let nanos = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
            Self(self.0.saturating_add(nanos))
        }
    }

    #[derive(Default)]
    struct CountingRail {
        cuts: Vec<Duration, 8>,
    }

    impl PowerActuator for CountingRail {
        fn set(&mut self, _: bool) {}

        fn cut(&mut self, duration: Duration) {
            self.cuts.push(duration).expect("cut log full");
        }
    }

    #[derive(Default)]
    struct LastArm {
        armed: Option<(TimerId, MockInstant, Generation)>,
        cancels: u8,
    }

    impl TimerService for LastArm {
        type Instant = MockInstant;

        fn arm(&mut self, timer: TimerId, deadline: MockInstant, generation: Generation) {
            self.armed = Some((timer, deadline, generation));
        }

        fn cancel(&mut self, _: TimerId) {
            self.cancels += 1;
        }
    }

    fn machine() -> GlitchStateMachine<CountingRail, LastArm> {
        GlitchStateMachine::new(
            CountingRail::default(),
            LastArm::default(),
            SweepConfig::new(
                Duration::from_nanos(1_000),
                Duration::from_nanos(5_000),
                Duration::from_nanos(10),
            ),
        )
    }

    #[test]
    fn state_codes_round_trip() {
        for state in GlitchState::ALL {
            assert_eq!(GlitchState::from_u8(state.as_u8()), Some(state));
        }
        assert_eq!(GlitchState::from_u8(6), None);
    }

    #[test]
    fn duration_is_fixed_by_first_tuning_result() {
        let mut machine = machine();
        machine.handle(GlitchEvent::TuningComplete {
            duration: Duration::from_micros(7),
        });
        machine.handle(GlitchEvent::TuningComplete {
            duration: Duration::from_micros(9),
        });

        assert_eq!(machine.params().duration, Duration::from_micros(7));
    }

    #[test]
    fn cancel_skips_idle_timer() {
        let mut machine = machine();
        machine.handle(GlitchEvent::TuningComplete {
            duration: Duration::from_micros(1),
        });
        machine.handle(GlitchEvent::Trigger { at: MockInstant(0) });
        machine.handle(GlitchEvent::Trigger { at: MockInstant(10) });

        assert_eq!(machine.timers().cancels, 0);
        assert_eq!(
            machine.timers().armed.map(|(timer, deadline, _)| (timer, deadline)),
            Some((TimerId::Glitch, MockInstant(20)))
        );
    }

    #[test]
    fn glitching_is_transient() {
        let mut machine = machine();
        machine.handle(GlitchEvent::TuningComplete {
            duration: Duration::from_micros(1),
        });
        machine.handle(GlitchEvent::Trigger { at: MockInstant(0) });
        machine.handle(GlitchEvent::Trigger { at: MockInstant(100) });
        let (_, deadline, generation) = machine.timers().armed.expect("glitch armed");

        let transition = machine.handle(GlitchEvent::TimerFired {
            timer: TimerId::Glitch,
            generation,
            at: deadline,
        });

        assert!(matches!(transition, Transition::Glitched(_)));
        assert_eq!(machine.state(), GlitchState::WaitTrigger);
        assert!(!machine.timer_armed(TimerId::Glitch));
        assert!(machine.timer_armed(TimerId::Timeout));
    }

    #[test]
    fn offset_saturates_instead_of_overflowing() {
        let mut machine = GlitchStateMachine::new(
            CountingRail::default(),
            LastArm::default(),
            SweepConfig::new(
                Duration::from_nanos(1_000),
                Duration::from_nanos(5_000),
                Duration::MAX,
            ),
        );
        machine.handle(GlitchEvent::TuningComplete {
            duration: Duration::from_micros(1),
        });
        machine.handle(GlitchEvent::Trigger { at: MockInstant(0) });
        machine.handle(GlitchEvent::Trigger { at: MockInstant(10) });
        let (_, deadline, generation) = machine.timers().armed.expect("glitch armed");
        assert_eq!(deadline, MockInstant(u64::MAX));

        machine.handle(GlitchEvent::TimerFired {
            timer: TimerId::Glitch,
            generation,
            at: deadline,
        });
        let transition = machine.handle(GlitchEvent::Trigger { at: MockInstant(20) });

        assert_eq!(
            transition,
            Transition::GlitchArmed {
                cycle: 2,
                offset: Duration::MAX,
            }
        );
    }
}
