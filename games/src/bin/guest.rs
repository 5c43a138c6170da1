use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use games::flappy::{self, Flappy};
use livetune::prelude::*;

/// Runs the flappy guest against a host that launched this process
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Schema document (YAML or JSON) to announce instead of the bundled
    /// one. Edits to the file are re-announced while running.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Guest config (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Finished rounds to play before exiting
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// IPC bootstrap name, appended by the host
    server_name: String,
}

fn main() {
    init_logger();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GuestConfig::load(path).unwrap_or_else(|err| {
            eprintln!("{}", err);
            std::process::exit(1);
        }),
        None => GuestConfig::default(),
    }
    .with_env_overrides();

    if config.game_id.is_none() {
        config.game_id = Some(flappy::GAME_ID.to_string());
    }

    let link = connect_to_host(&args.server_name).unwrap_or_else(|err| {
        eprintln!("{}", err);
        std::process::exit(1);
    });

    let mut guest = Guest::new(link, config);
    guest.install_error_hook();

    let schema = match &args.schema {
        Some(path) => GameSchema::load(path),
        None => flappy::schema(),
    }
    .unwrap_or_else(|err| {
        eprintln!("{}", err);
        std::process::exit(1);
    });

    if let Err(err) = guest.define_schema(schema) {
        error!("schema rejected: {}", err);
        std::process::exit(1);
    }

    let watcher = args.schema.clone().and_then(|path| {
        SchemaWatcher::start(path)
            .inspect_err(|err| warn!("not watching schema: {}", err))
            .ok()
    });

    let frame = Duration::from_millis(args.frame_ms);
    let mut game = Flappy::new();
    let mut rounds = 0;

    while guest.is_connected() {
        guest.poll();

        if let Some(result) = watcher.as_ref().and_then(|w| w.reload_if_changed())
        {
            match result.map(|schema| guest.define_schema(schema)) {
                Ok(Ok(())) => info!("schema reloaded"),
                Ok(Err(err)) => warn!("reloaded schema rejected: {}", err),
                Err(err) => warn!("{}", err),
            }
        }

        game.tick(&mut guest);

        if guest.state().status == GameStatus::Finished {
            let score = guest.score().current;
            match guest.send_score(score) {
                Ok(outcome) => {
                    info!("round over, score {} ({:?})", score, outcome)
                }
                Err(err) => warn!("{}", err),
            }

            rounds += 1;
            if rounds >= args.rounds {
                break;
            }

            guest.reset();
        }

        thread::sleep(frame);
    }

    info!(
        "played {} round(s), high score {}",
        rounds,
        guest.score().high
    );
}
