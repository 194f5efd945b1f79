use embassy_stm32::exti::ExtiInput;
use glitch_core::config::EdgePolarity;
use glitch_core::events::EventQueueProducer;

use crate::glitch::{EdgeSource, EventProducer, EventSender, FirmwareInstant, log_dropped_edge};

#[embassy_executor::task(pool_size = 2)]
pub async fn run(
    mut input: ExtiInput<'static>,
    source: EdgeSource,
    polarity: EdgePolarity,
    events: EventSender<'static>,
) -> ! {
    let mut producer = EventProducer::new(events);

    loop {
        match polarity {
            EdgePolarity::Rising => input.wait_for_rising_edge().await,
            EdgePolarity::Falling => input.wait_for_falling_edge().await,
        }

        let at = FirmwareInstant::now();
        if producer.try_enqueue(source.event(at)).is_err() {
            log_dropped_edge(source.label());
        }
    }
}
