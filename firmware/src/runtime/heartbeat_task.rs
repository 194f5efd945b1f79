use embassy_time::{Duration, Ticker};

use crate::glitch::log_status;
use crate::status;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

#[embassy_executor::task]
pub async fn run() -> ! {
    let mut ticker = Ticker::every(HEARTBEAT_PERIOD);
    loop {
        ticker.next().await;
        log_status(&status::snapshot());
    }
}
