//! Embassy GPIO backing for the power rail.

use core::time::Duration;

use embassy_stm32::gpio::{Level, Output};
use glitch_core::power::{BusyWait, PowerRail, PowerSwitch};

use crate::glitch::core_duration_to_embassy;

/// Push-pull output driving the rail's enable input.
pub struct OutputSwitch<'d> {
    pin: Output<'d>,
}

impl<'d> OutputSwitch<'d> {
    pub fn new(pin: Output<'d>) -> Self {
        Self { pin }
    }
}

impl PowerSwitch for OutputSwitch<'_> {
    fn set_level(&mut self, high: bool) {
        self.pin.set_level(Level::from(high));
    }
}

/// Spins on the time driver; never yields to the executor.
///
/// Widths are rounded up to the 62.5 ns tick of the 16 MHz timebase.
#[derive(Copy, Clone, Debug, Default)]
pub struct SpinWait;

impl BusyWait for SpinWait {
    fn busy_wait(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        embassy_time::block_for(core_duration_to_embassy(duration));
    }
}

/// The rail as the glitch task drives it.
pub type FirmwareRail<'d> = PowerRail<OutputSwitch<'d>, SpinWait>;
