mod sim;

use std::env;
use std::io::{self, Write};
use std::process;
use std::time::Duration;

use glitch_core::config::GlitchConfig;

use sim::{Simulation, TargetProfile};

const DEFAULT_LIMIT_SECS: u64 = 120;

const USAGE: &str = "Usage: glitch-emulator [--profile <standard|hang|silent>] [--max-seconds <n>] [--verbose]";

struct Options {
    profile: TargetProfile,
    limit: Duration,
    verbose: bool,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    writeln!(
        writer,
        "Glitch rig emulator: target profile `{}`, limit {}s of virtual time.",
        options.profile.name,
        options.limit.as_secs()
    )?;

    let mut simulation = Simulation::new(options.profile, GlitchConfig::default(), options.verbose);
    let summary = simulation.run(options.limit);

    for line in simulation.transcript() {
        writeln!(writer, "{line}")?;
    }

    writeln!(
        writer,
        "Finished at {}: {} crash resets, {} target boots, {} dropped events.",
        summary.elapsed, summary.crash_resets, summary.target_boots, summary.dropped_events
    )?;

    if summary.report.is_none() {
        writeln!(writer, "No success within the time limit.")?;
        writer.flush()?;
        process::exit(1);
    }

    Ok(())
}

fn parse_options<I>(args: I) -> Result<Options, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options {
        profile: TargetProfile::standard(),
        limit: Duration::from_secs(DEFAULT_LIMIT_SECS),
        verbose: false,
    };

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--verbose" || arg == "-v" {
            options.verbose = true;
        } else if let Some(value) = arg.strip_prefix("--profile=") {
            options.profile = TargetProfile::from_tag(value)?;
        } else if arg == "--profile" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --profile".to_string())?;
            options.profile = TargetProfile::from_tag(&value)?;
        } else if let Some(value) = arg.strip_prefix("--max-seconds=") {
            options.limit = parse_seconds(value)?;
        } else if arg == "--max-seconds" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --max-seconds".to_string())?;
            options.limit = parse_seconds(&value)?;
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }

    Ok(options)
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|err| format!("Invalid --max-seconds `{value}`: {err}"))
}
