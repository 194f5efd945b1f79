use embassy_time::{Instant, with_deadline};
use glitch_core::config::TuningConfig;
use glitch_core::events::GlitchEvent;
use glitch_core::glitch::GlitchStateMachine;
use glitch_core::power::PowerActuator;
use glitch_core::tuning::{DurationTuner, TunerStep};

use crate::glitch::{
    EventReceiver, FirmwareEvent, core_duration_to_embassy, log_transition, log_trial,
    log_trial_history, log_tuning_result,
};
use crate::hw::rail::FirmwareRail;
use crate::hw::timers::FirmwareTimers;
use crate::status;

type Machine = GlitchStateMachine<FirmwareRail<'static>, FirmwareTimers<'static>>;

#[embassy_executor::task]
pub async fn run(
    mut machine: Machine,
    tuning: TuningConfig,
    events: EventReceiver<'static>,
) -> ! {
    machine.actuator_mut().set(true);
    apply(&mut machine, GlitchEvent::TuningStarted);

    let mut tuner = DurationTuner::new(tuning);
    while let Some(width) = tuner.next_trial() {
        if machine.is_finished() {
            break;
        }

        machine.reset_tuning_counter();
        for _ in 0..tuning.trial_cycles {
            machine.actuator_mut().cut(width);
            settle(&mut machine, &events, &tuning).await;
        }

        let count = machine.tuning_count();
        log_trial(width, count);
        if let TunerStep::Finished(_) = tuner.record(count) {
            break;
        }
    }

    let result = tuner.result();
    log_trial_history(tuner.trials());
    log_tuning_result(&result);
    apply(
        &mut machine,
        GlitchEvent::TuningComplete {
            duration: result.duration,
        },
    );

    loop {
        let event = events.receive().await;
        apply(&mut machine, event);
    }
}

/// Processes queued edges until the settle window after a calibration cut closes.
async fn settle(machine: &mut Machine, events: &EventReceiver<'static>, tuning: &TuningConfig) {
    let deadline = Instant::now() + core_duration_to_embassy(tuning.settle);
    while let Ok(event) = with_deadline(deadline, events.receive()).await {
        apply(machine, event);
    }
}

fn apply(machine: &mut Machine, event: FirmwareEvent) {
    let transition = machine.handle(event);
    status::publish(machine.state(), machine.params(), machine.cycles());
    log_transition(&transition);
}
