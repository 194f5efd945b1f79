//! Power-rail actuator.
//!
//! One primitive serves both as the glitch pulse and, with a much longer
//! width, as the hard reset: drop the enable line, spin for the requested
//! time, raise it again.

use core::time::Duration;

/// Electrical polarity of the power-enable output.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PowerPolarity {
    #[default]
    ActiveHigh,
    ActiveLow,
}

impl PowerPolarity {
    /// Logic level that powers (`on == true`) or unpowers the target.
    pub const fn level(self, on: bool) -> bool {
        match self {
            PowerPolarity::ActiveHigh => on,
            PowerPolarity::ActiveLow => !on,
        }
    }
}

/// Abstraction over the physical power-enable pin.
pub trait PowerSwitch {
    /// Drives the pin high (`true`) or low.
    fn set_level(&mut self, high: bool);
}

/// Blocking delay that spins the core.
///
/// Implementations must never suspend or yield to another task: the pulse
/// width is exactly the time spent in here.
pub trait BusyWait {
    fn busy_wait(&mut self, duration: Duration);
}

/// Operations the state machine and tuner need from the rail.
pub trait PowerActuator {
    /// Powers the target on or off without waiting.
    fn set(&mut self, on: bool);

    /// Removes power for exactly `duration`, then restores it.
    fn cut(&mut self, duration: Duration);
}

/// [`PowerActuator`] built from a pin and a busy-wait delay.
pub struct PowerRail<S, W> {
    switch: S,
    delay: W,
    polarity: PowerPolarity,
    powered: bool,
}

impl<S, W> PowerRail<S, W>
where
    S: PowerSwitch,
    W: BusyWait,
{
    /// Wraps the pin and drives it to the unpowered level.
    pub fn new(mut switch: S, delay: W, polarity: PowerPolarity) -> Self {
        switch.set_level(polarity.level(false));
        Self {
            switch,
            delay,
            polarity,
            powered: false,
        }
    }

    /// Returns `true` while the target is powered.
    pub const fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn switch(&self) -> &S {
        &self.switch
    }

    pub fn delay(&self) -> &W {
        &self.delay
    }
}

impl<S, W> PowerActuator for PowerRail<S, W>
where
    S: PowerSwitch,
    W: BusyWait,
{
    fn set(&mut self, on: bool) {
        self.switch.set_level(self.polarity.level(on));
        self.powered = on;
    }

    fn cut(&mut self, duration: Duration) {
        self.switch.set_level(self.polarity.level(false));
        self.delay.busy_wait(duration);
        self.switch.set_level(self.polarity.level(true));
        self.powered = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Default)]
    struct RecordingSwitch {
        levels: Vec<bool, 8>,
    }

    impl PowerSwitch for RecordingSwitch {
        fn set_level(&mut self, high: bool) {
            self.levels.push(high).expect("switch log full");
        }
    }

    #[derive(Default)]
    struct RecordingWait {
        waits: Vec<Duration, 4>,
    }

    impl BusyWait for RecordingWait {
        fn busy_wait(&mut self, duration: Duration) {
            self.waits.push(duration).expect("wait log full");
        }
    }

    #[test]
    fn new_rail_starts_unpowered() {
        let rail = PowerRail::new(
            RecordingSwitch::default(),
            RecordingWait::default(),
            PowerPolarity::ActiveHigh,
        );

        assert!(!rail.is_powered());
        assert_eq!(rail.switch().levels.as_slice(), &[false]);
    }

    #[test]
    fn cut_drops_waits_and_restores() {
        let mut rail = PowerRail::new(
            RecordingSwitch::default(),
            RecordingWait::default(),
            PowerPolarity::ActiveHigh,
        );
        rail.set(true);
        rail.cut(Duration::from_micros(42));

        assert!(rail.is_powered());
        assert_eq!(rail.switch().levels.as_slice(), &[false, true, false, true]);
        assert_eq!(rail.delay().waits.as_slice(), &[Duration::from_micros(42)]);
    }

    #[test]
    fn active_low_inverts_levels() {
        let mut rail = PowerRail::new(
            RecordingSwitch::default(),
            RecordingWait::default(),
            PowerPolarity::ActiveLow,
        );
        rail.cut(Duration::from_micros(1));

        assert_eq!(rail.switch().levels.as_slice(), &[true, true, false]);
    }
}
