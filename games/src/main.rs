use std::env;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use livetune::prelude::*;

/// Launches a guest game in a child process and tunes it live
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Guest executable. Defaults to the `guest` binary next to this one.
    #[arg(long)]
    guest: Option<PathBuf>,

    /// Host config (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// How long to run before shutting the guest down
    #[arg(long, default_value_t = 12)]
    seconds: u64,

    /// Skip the scripted edits and only mirror what the guest reports
    #[arg(long)]
    passive: bool,

    /// Extra arguments forwarded to the guest
    #[arg(last = true)]
    guest_args: Vec<String>,
}

#[derive(Debug)]
enum Tweak {
    Set(&'static str, ControlValue),
    RequestState,
    Reset,
}

fn script() -> Vec<(Duration, Tweak)> {
    vec![
        (Duration::from_secs(2), Tweak::Set("gravity", 0.5.into())),
        (Duration::from_secs(3), Tweak::Set("bird_color", "#ff3366".into())),
        (Duration::from_secs(4), Tweak::Set("pipe_speed", 4.0.into())),
        // Rejected locally: out of bounds
        (Duration::from_secs(5), Tweak::Set("gap_size", 200.0.into())),
        (Duration::from_secs(6), Tweak::RequestState),
        (Duration::from_secs(8), Tweak::Reset),
        (Duration::from_secs(9), Tweak::Set("autopilot", false.into())),
    ]
}

fn main() {
    init_logger();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HostConfig::load(path).unwrap_or_else(|err| {
            eprintln!("{}", err);
            std::process::exit(1);
        }),
        None => HostConfig::default(),
    };

    let guest_path = args.guest.clone().unwrap_or_else(sibling_guest);
    let mut command = Command::new(&guest_path);
    command.args(&args.guest_args);

    let (bridge, link) = HostBridge::launch(command).unwrap_or_else(|err| {
        eprintln!("{} ({})", err, guest_path.display());
        std::process::exit(1);
    });
    info!("launched guest pid {}", bridge.pid());

    let mut host = Host::new(link, config);
    host.announce_ready();

    let started = Instant::now();
    let deadline = Duration::from_secs(args.seconds);
    let mut pending = if args.passive { vec![] } else { script() };
    pending.reverse();

    'run: while started.elapsed() < deadline {
        for event in host.poll() {
            if report(&event) {
                break 'run;
            }
        }

        while pending
            .last()
            .is_some_and(|(at, _)| started.elapsed() >= *at)
        {
            if let Some((_, tweak)) = pending.pop() {
                apply(&mut host, tweak);
            }
        }

        thread::sleep(Duration::from_millis(10));
    }

    for (property, value) in host.mirror().controls() {
        info!("{:>14} = {:?}", property.label, value);
    }
    info!(
        "final status {:?}, score {:?}",
        host.mirror().status(),
        host.mirror().score
    );

    drop(bridge);
}

fn sibling_guest() -> PathBuf {
    let name = format!("guest{}", env::consts::EXE_SUFFIX);
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

fn apply(host: &mut Host, tweak: Tweak) {
    info!("-> {:?}", tweak);
    match tweak {
        Tweak::Set(key, value) => {
            if let Err(rejection) = host.set_value(key, value) {
                warn!("edit refused: {}", rejection);
            }
        }
        Tweak::RequestState => host.request_state(),
        Tweak::Reset => host.reset_game(),
    }
}

/// Logs an event, returning true once the guest is gone
fn report(event: &HostEvent) -> bool {
    match event {
        HostEvent::GuestReady(ready) => {
            info!("guest ready: sdk {} {:?}", ready.version, ready.game_id)
        }
        HostEvent::SchemaChanged(schema) => {
            info!("schema {} with {} controls", schema.version, schema.properties.len())
        }
        HostEvent::StatusChanged(status) => info!("status: {:?}", status),
        HostEvent::StateReported(state) => info!("state: {:?}", state),
        HostEvent::ScoreSubmitted(submission) => {
            info!("score submitted: {}", submission.score)
        }
        HostEvent::GameEnded(ended) => info!(
            "game over: {} in {}ms",
            ended.final_score, ended.duration
        ),
        HostEvent::AssetsChanged(assets) => {
            info!("{} asset mapping(s)", assets.len())
        }
        HostEvent::GuestError(message) => error!("guest: {}", message),
        HostEvent::Disconnected => {
            info!("guest disconnected");
            return true;
        }
    }
    false
}
