use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use glitch_core::config::GlitchConfig;
use glitch_core::glitch::GlitchStateMachine;
use glitch_core::power::PowerRail;
use glitch_core::timers::TimerId;

use crate::glitch::{EdgeSource, EventQueue};
use crate::hw::rail::{FirmwareRail, OutputSwitch, SpinWait};
use crate::hw::timers::{DeadlineTimer, FirmwareTimers};
use crate::hw::{POWER_POLARITY, SUCCESS_POLARITY, TRIGGER_POLARITY};

mod glitch_task;
mod heartbeat_task;
mod timer_task;
mod watch_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        cortex_m::interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                cortex_m::interrupt::enable();
            }
        }
    }
}

pub(super) static EVENT_QUEUE: EventQueue = EventQueue::new();
pub(super) static GLITCH_TIMER: DeadlineTimer = DeadlineTimer::new();
pub(super) static TIMEOUT_TIMER: DeadlineTimer = DeadlineTimer::new();

/// Runs the edge, timer and glitch tasks ahead of anything in thread mode.
///
/// Edge timestamps and timer fires still carry the EXTI/timer interrupt entry
/// plus one task poll of latency, a few microseconds. Offsets are
/// relative to when the watch task sees the edge, not to the pin itself.
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

// USART3/4/5/6 and LPUART1 are unused; their vector drives the executor.
#[interrupt]
unsafe fn USART3_4_5_6_LPUART1() {
    unsafe { EXECUTOR_HIGH.on_interrupt() }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let hal::Peripherals {
        PA0,
        PA1,
        PA6,
        EXTI1,
        EXTI6,
        ..
    } = hal::init(hal::Config::default());

    // Hold the target unpowered until calibration starts.
    let enable = Output::new(PA0, Level::from(POWER_POLARITY.level(false)), Speed::VeryHigh);
    let rail: FirmwareRail<'static> =
        PowerRail::new(OutputSwitch::new(enable), SpinWait, POWER_POLARITY);

    let trigger = ExtiInput::new(PA1, EXTI1, Pull::Down);
    let success = ExtiInput::new(PA6, EXTI6, Pull::Down);

    let config = GlitchConfig::default();
    let machine = GlitchStateMachine::new(
        rail,
        FirmwareTimers::new(&GLITCH_TIMER, &TIMEOUT_TIMER),
        config.sweep,
    );

    // Below the TIM1 time driver (P0): calibration cuts busy-wait on it.
    interrupt::USART3_4_5_6_LPUART1.set_priority(Priority::P1);
    let high = EXECUTOR_HIGH.start(interrupt::USART3_4_5_6_LPUART1);

    high
        .spawn(timer_task::run(
            TimerId::Glitch,
            &GLITCH_TIMER,
            EVENT_QUEUE.sender(),
        ))
        .expect("failed to spawn glitch timer task");
    high
        .spawn(timer_task::run(
            TimerId::Timeout,
            &TIMEOUT_TIMER,
            EVENT_QUEUE.sender(),
        ))
        .expect("failed to spawn timeout timer task");

    high
        .spawn(watch_task::run(
            trigger,
            EdgeSource::Trigger,
            TRIGGER_POLARITY,
            EVENT_QUEUE.sender(),
        ))
        .expect("failed to spawn trigger watcher");
    high
        .spawn(watch_task::run(
            success,
            EdgeSource::Success,
            SUCCESS_POLARITY,
            EVENT_QUEUE.sender(),
        ))
        .expect("failed to spawn success watcher");

    spawner
        .spawn(heartbeat_task::run())
        .expect("failed to spawn heartbeat task");

    high
        .spawn(glitch_task::run(machine, config.tuning, EVENT_QUEUE.receiver()))
        .expect("failed to spawn glitch task");

    core::future::pending::<()>().await;
}
