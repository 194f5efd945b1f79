use embassy_futures::select::{Either, select};
use embassy_time::Timer;
use glitch_core::events::{EventQueueProducer, GlitchEvent};
use glitch_core::timers::{Generation, TimerId};

use crate::glitch::{EventProducer, EventSender, FirmwareInstant, log_dropped_edge};
use crate::hw::timers::{DeadlineTimer, TimerCommand};

const fn apply(command: TimerCommand) -> Option<(FirmwareInstant, Generation)> {
    match command {
        TimerCommand::Arm {
            deadline,
            generation,
        } => Some((deadline, generation)),
        TimerCommand::Cancel => None,
    }
}

#[embassy_executor::task(pool_size = 2)]
pub async fn run(
    timer: TimerId,
    mailbox: &'static DeadlineTimer,
    events: EventSender<'static>,
) -> ! {
    let mut producer = EventProducer::new(events);
    let mut pending = None;

    loop {
        let Some((deadline, generation)) = pending else {
            pending = apply(mailbox.wait().await);
            continue;
        };

        match select(Timer::at(deadline.into_embassy()), mailbox.wait()).await {
            Either::First(()) => {
                pending = None;
                let event = GlitchEvent::TimerFired {
                    timer,
                    generation,
                    at: FirmwareInstant::now(),
                };
                if producer.try_enqueue(event).is_err() {
                    log_dropped_edge(timer.label());
                }
            }
            Either::Second(command) => pending = apply(command),
        }
    }
}
