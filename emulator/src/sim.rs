//! Discrete-event model of a glitch target wired to the real state machine.
//!
//! Time is virtual and measured in nanoseconds. The simulated target emits its
//! trigger on a fixed period, browns out when a pulse is too wide, and reacts
//! to pulses that land inside configured offset windows. The rig side is the
//! unmodified `glitch-core` machine and tuner, driven the same way the
//! firmware's glitch task drives them.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Add, Range};
use std::rc::Rc;
use std::time::Duration;

use glitch_core::config::{GlitchConfig, TuningConfig};
use glitch_core::events::{EventEnqueueError, EventQueueProducer, GlitchEvent};
use glitch_core::glitch::{GlitchState, GlitchStateMachine, SweepReport, Transition};
use glitch_core::power::PowerActuator;
use glitch_core::timers::{Generation, TimerId, TimerService};
use glitch_core::tuning::{DurationTuner, TunerStep, TuningResult};

const EVENT_QUEUE_DEPTH: usize = 16;

/// Time from a pin edge or timer deadline until the rig task acts on it.
///
/// An edge is timestamped this late, and a glitch fire cuts this late again,
/// so the pulse lands `offset + 2 * DISPATCH_LATENCY` after the real edge.
pub const DISPATCH_LATENCY: Duration = Duration::from_micros(1);

/// Virtual timestamp in nanoseconds since power-up of the rig.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(u64);

impl SimInstant {
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn duration_since(self, earlier: SimInstant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let nanos = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

impl fmt::Display for SimInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4}.{:06}s",
            self.0 / 1_000_000_000,
            (self.0 % 1_000_000_000) / 1_000
        )
    }
}

/// Electrical behaviour of the simulated target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetProfile {
    pub name: &'static str,
    /// `None` models a target that never toggles its trigger line.
    pub trigger_period: Option<Duration>,
    /// Time from power-up to the first trigger.
    pub boot_delay: Duration,
    /// Pulses narrower than this leave no trace.
    pub marginal_width: Duration,
    /// Pulses at least this wide always reboot the target.
    pub brownout_width: Duration,
    /// Accumulated width above `marginal_width` that forces a reboot.
    pub stress_budget: Duration,
    /// Offsets after a trigger where a pulse skips the protected check.
    pub success_window: Option<Range<Duration>>,
    /// Offsets after a trigger where a pulse wedges the target until reset.
    pub hang_band: Option<Range<Duration>>,
    pub success_latency: Duration,
}

impl TargetProfile {
    pub fn standard() -> Self {
        Self {
            name: "standard",
            trigger_period: Some(Duration::from_micros(166_667)),
            boot_delay: Duration::from_millis(200),
            marginal_width: Duration::from_micros(300),
            brownout_width: Duration::from_micros(500),
            stress_budget: Duration::from_millis(100),
            success_window: Some(Duration::from_nanos(4_000)..Duration::from_nanos(4_200)),
            hang_band: None,
            success_latency: Duration::from_micros(20),
        }
    }

    /// Like [`standard`](Self::standard) but with a hang band ahead of the
    /// success window.
    pub fn hanging() -> Self {
        Self {
            name: "hang",
            success_window: Some(Duration::from_nanos(4_500)..Duration::from_nanos(4_600)),
            hang_band: Some(Duration::from_nanos(3_500)..Duration::from_nanos(3_800)),
            ..Self::standard()
        }
    }

    pub fn silent() -> Self {
        Self {
            name: "silent",
            trigger_period: None,
            ..Self::standard()
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("standard") {
            Ok(Self::standard())
        } else if tag.eq_ignore_ascii_case("hang") {
            Ok(Self::hanging())
        } else if tag.eq_ignore_ascii_case("silent") {
            Ok(Self::silent())
        } else {
            Err(format!("Unknown target profile `{tag}`"))
        }
    }
}

struct Target {
    profile: TargetProfile,
    powered: bool,
    hung: bool,
    // Calibration cuts land on the idle loop, not on the guarded check.
    glitchable: bool,
    stress: Duration,
    next_trigger: Option<SimInstant>,
    last_trigger: Option<SimInstant>,
    pending_success: Option<SimInstant>,
    boots: u32,
}

impl Target {
    fn new(profile: TargetProfile) -> Self {
        Self {
            profile,
            powered: false,
            hung: false,
            glitchable: false,
            stress: Duration::ZERO,
            next_trigger: None,
            last_trigger: None,
            pending_success: None,
            boots: 0,
        }
    }

    fn set_power(&mut self, on: bool, now: SimInstant) {
        if on == self.powered {
            return;
        }
        self.powered = on;
        if on {
            self.boot(now);
        } else {
            self.next_trigger = None;
            self.last_trigger = None;
        }
    }

    fn boot(&mut self, now: SimInstant) {
        self.boots += 1;
        self.hung = false;
        self.stress = Duration::ZERO;
        self.last_trigger = None;
        self.next_trigger = self
            .profile
            .trigger_period
            .map(|_| now + self.profile.boot_delay);
    }

    fn cut(&mut self, start: SimInstant, width: Duration, end: SimInstant) {
        if !self.powered {
            return;
        }
        if width >= self.profile.brownout_width {
            self.boot(end);
            return;
        }

        if self.glitchable && !self.hung {
            if let Some(offset) = self.last_trigger.map(|at| start.duration_since(at)) {
                let in_window = |band: &Option<Range<Duration>>| {
                    band.as_ref().is_some_and(|band| band.contains(&offset))
                };
                if width >= self.profile.marginal_width && in_window(&self.profile.success_window)
                {
                    self.pending_success = Some(end + self.profile.success_latency);
                    return;
                }
                if in_window(&self.profile.hang_band) {
                    self.hung = true;
                    self.next_trigger = None;
                    return;
                }
            }
        }

        if width > self.profile.marginal_width {
            self.stress += width - self.profile.marginal_width;
            if self.stress >= self.profile.stress_budget {
                self.boot(end);
            }
        }
    }

    fn take_trigger(&mut self, at: SimInstant) {
        self.last_trigger = Some(at);
        self.next_trigger = self.profile.trigger_period.map(|period| at + period);
    }
}

/// Bounded FIFO standing in for the firmware's event channel.
struct HostQueue {
    capacity: usize,
    events: VecDeque<GlitchEvent<SimInstant>>,
}

impl HostQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    fn pop_front(&mut self) -> Option<GlitchEvent<SimInstant>> {
        self.events.pop_front()
    }
}

impl EventQueueProducer for HostQueue {
    type Instant = SimInstant;

    fn try_enqueue(&mut self, event: GlitchEvent<Self::Instant>) -> Result<(), EventEnqueueError> {
        if self.events.len() >= self.capacity {
            return Err(EventEnqueueError::QueueFull);
        }
        self.events.push_back(event);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Due {
    Trigger,
    Success,
    Timer(TimerId),
}

struct World {
    clock: SimInstant,
    target: Target,
    timers: [Option<(SimInstant, Generation)>; 2],
    queue: HostQueue,
    dropped: u32,
    latency: Duration,
}

impl World {
    fn next_due(&self) -> Option<(SimInstant, Due)> {
        let timer = |id: TimerId| self.timers[id.as_index()].map(|(deadline, _)| deadline);
        [
            (self.target.next_trigger, Due::Trigger),
            (self.target.pending_success, Due::Success),
            (timer(TimerId::Glitch), Due::Timer(TimerId::Glitch)),
            (timer(TimerId::Timeout), Due::Timer(TimerId::Timeout)),
        ]
        .into_iter()
        .filter_map(|(at, due)| at.map(|at| (at, due)))
        .min_by_key(|(at, _)| *at)
    }

    /// `at` is when the pin toggled or the deadline passed; the event carries
    /// the later time at which the rig got to it.
    fn fire(&mut self, at: SimInstant, due: Due) {
        self.clock = self.clock.max(at + self.latency);
        let event = match due {
            Due::Trigger => {
                self.target.take_trigger(at);
                GlitchEvent::Trigger { at: self.clock }
            }
            Due::Success => {
                self.target.pending_success = None;
                GlitchEvent::Success { at: self.clock }
            }
            Due::Timer(timer) => {
                let Some((_, generation)) = self.timers[timer.as_index()].take() else {
                    return;
                };
                GlitchEvent::TimerFired {
                    timer,
                    generation,
                    at: self.clock,
                }
            }
        };

        if self.queue.try_enqueue(event).is_err() {
            self.dropped += 1;
        }
    }
}

/// Rail that cuts the simulated target's supply and advances the clock.
pub struct SimRail {
    world: Rc<RefCell<World>>,
}

impl PowerActuator for SimRail {
    fn set(&mut self, on: bool) {
        let mut world = self.world.borrow_mut();
        let now = world.clock;
        world.target.set_power(on, now);
    }

    fn cut(&mut self, duration: Duration) {
        let mut world = self.world.borrow_mut();
        let start = world.clock;
        let end = start + duration;
        world.clock = end;
        world.target.cut(start, duration, end);
    }
}

/// Exact virtual-time deadlines.
pub struct SimTimers {
    world: Rc<RefCell<World>>,
}

impl TimerService for SimTimers {
    type Instant = SimInstant;

    fn arm(&mut self, timer: TimerId, deadline: Self::Instant, generation: Generation) {
        self.world.borrow_mut().timers[timer.as_index()] = Some((deadline, generation));
    }

    fn cancel(&mut self, timer: TimerId) {
        self.world.borrow_mut().timers[timer.as_index()] = None;
    }
}

/// What a finished run produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunSummary {
    pub tuning: TuningResult,
    pub report: Option<SweepReport>,
    pub crash_resets: u32,
    pub target_boots: u32,
    pub dropped_events: u32,
    pub elapsed: SimInstant,
}

pub struct Simulation {
    world: Rc<RefCell<World>>,
    machine: GlitchStateMachine<SimRail, SimTimers>,
    tuning: TuningConfig,
    verbose: bool,
    crash_resets: u32,
    transcript: Vec<String>,
}

impl Simulation {
    pub fn new(profile: TargetProfile, config: GlitchConfig, verbose: bool) -> Self {
        let world = Rc::new(RefCell::new(World {
            clock: SimInstant::default(),
            target: Target::new(profile),
            timers: [None; 2],
            queue: HostQueue::new(EVENT_QUEUE_DEPTH),
            dropped: 0,
            latency: DISPATCH_LATENCY,
        }));
        let machine = GlitchStateMachine::new(
            SimRail {
                world: Rc::clone(&world),
            },
            SimTimers {
                world: Rc::clone(&world),
            },
            config.sweep,
        );

        Self {
            world,
            machine,
            tuning: config.tuning,
            verbose,
            crash_resets: 0,
            transcript: Vec::new(),
        }
    }

    /// Replaces [`DISPATCH_LATENCY`] for this run.
    #[must_use]
    pub fn with_dispatch_latency(self, latency: Duration) -> Self {
        self.world.borrow_mut().latency = latency;
        self
    }

    pub fn now(&self) -> SimInstant {
        self.world.borrow().clock
    }

    pub fn state(&self) -> GlitchState {
        self.machine.state()
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Calibrates, then sweeps until success or until `limit` of virtual time
    /// has passed.
    pub fn run(&mut self, limit: Duration) -> RunSummary {
        let tuning = self.calibrate();
        if tuning.count == 0 {
            self.log("tune: target never triggered, sweeping with a zero-width pulse".to_string());
        } else {
            self.log(format!(
                "tune: best duration={}us ({} triggers)",
                tuning.duration.as_micros(),
                tuning.count
            ));
        }
        self.apply(GlitchEvent::TuningComplete {
            duration: tuning.duration,
        });

        self.run_until(SimInstant::default() + limit);

        let world = self.world.borrow();
        RunSummary {
            tuning,
            report: self.machine.report(),
            crash_resets: self.crash_resets,
            target_boots: world.target.boots,
            dropped_events: world.dropped,
            elapsed: world.clock,
        }
    }

    fn calibrate(&mut self) -> TuningResult {
        self.world.borrow_mut().target.glitchable = false;
        self.machine.actuator_mut().set(true);
        self.apply(GlitchEvent::TuningStarted);

        let mut tuner = DurationTuner::new(self.tuning);
        while let Some(width) = tuner.next_trial() {
            if self.machine.is_finished() {
                break;
            }

            self.machine.reset_tuning_counter();
            for _ in 0..self.tuning.trial_cycles {
                self.machine.actuator_mut().cut(width);
                let settled = self.now() + self.tuning.settle;
                self.run_until(settled);
            }

            let count = self.machine.tuning_count();
            self.log(format!(
                "tune: trial duration={}us triggers={count}",
                width.as_micros()
            ));
            if let TunerStep::Finished(_) = tuner.record(count) {
                break;
            }
        }

        for (index, trial) in tuner.trials().enumerate() {
            self.log(format!(
                "tune: history[{index}] duration={}us triggers={}",
                trial.duration_us, trial.count
            ));
        }

        self.world.borrow_mut().target.glitchable = true;
        tuner.result()
    }

    /// Delivers every event due at or before `deadline`, then parks the clock
    /// there. Stops early once the machine has finished.
    fn run_until(&mut self, deadline: SimInstant) {
        loop {
            self.drain();
            if self.machine.is_finished() {
                return;
            }

            let next = self.world.borrow().next_due();
            match next {
                Some((at, due)) if at <= deadline => self.world.borrow_mut().fire(at, due),
                _ => break,
            }
        }

        let mut world = self.world.borrow_mut();
        world.clock = world.clock.max(deadline);
    }

    fn drain(&mut self) {
        loop {
            let event = self.world.borrow_mut().queue.pop_front();
            let Some(event) = event else {
                break;
            };
            self.apply(event);
        }
    }

    fn apply(&mut self, event: GlitchEvent<SimInstant>) {
        let transition = self.machine.handle(event);
        if let Transition::CrashReset { .. } = transition {
            self.crash_resets += 1;
        }
        if let Some(line) = describe(&transition, self.verbose) {
            self.log(line);
        }
    }

    fn log(&mut self, line: String) {
        let now = self.now();
        self.transcript.push(format!("[{now}] {line}"));
    }
}

fn describe(transition: &Transition, verbose: bool) -> Option<String> {
    let line = match *transition {
        Transition::Ignored | Transition::TuningTrigger { .. } => return None,
        Transition::TuningStarted => "tune: calibration started".to_string(),
        Transition::SweepReady { duration } => format!(
            "sweep: target reset, duration={}us, waiting for first trigger",
            duration.as_micros()
        ),
        Transition::TargetAlive => "sweep: target alive, glitching from next trigger".to_string(),
        Transition::GlitchArmed { cycle, offset } if verbose => {
            format!("sweep: cycle={cycle} offset={}ns armed", offset.as_nanos())
        }
        Transition::Glitched(params) if verbose => format!(
            "sweep: pulse offset={}ns duration={}us",
            params.offset.as_nanos(),
            params.duration.as_micros()
        ),
        Transition::GlitchArmed { .. } | Transition::Glitched(_) => return None,
        Transition::CrashReset { offset } => format!(
            "sweep: no trigger after glitch at offset={}ns, hard reset",
            offset.as_nanos()
        ),
        Transition::Stopped(report) => format!(
            "SUCCESS offset={}ns duration={}us after {} cycles",
            report.params.offset.as_nanos(),
            report.params.duration.as_micros(),
            report.cycles
        ),
    };
    Some(line)
}
