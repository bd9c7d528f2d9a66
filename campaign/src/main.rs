//! Commonware Campaign CLI

use clap::{Arg, ArgAction, Command};
use commonware_campaign::{
    config::Config,
    mission::{self, Engine, Outcome},
    process::Shell,
    spec::generate,
    store::Store,
    transport::{self, Link},
    Error,
};
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::{collections::BTreeMap, path::Path, path::PathBuf, process::ExitCode};
use tracing::{error, info};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

const RUN_CMD: &str = "run";
const GENERATE_CMD: &str = "generate";
const STATUS_CMD: &str = "status";
const RESET_CMD: &str = "reset";

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .required(true)
        .help("Path to YAML config file")
        .value_parser(clap::value_parser!(PathBuf))
}

/// Entrypoint for the Commonware Campaign CLI
#[tokio::main]
async fn main() -> ExitCode {
    // Define application
    let matches = Command::new("campaign")
        .version(crate_version())
        .about("Run combinatorial fuzz campaigns against a simulated vehicle.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(RUN_CMD)
                .about("Run missions until every combination of the campaign has been dispatched.")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(GENERATE_CMD)
                .about("Print every combination of the campaign.")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(STATUS_CMD)
                .about("Summarize executed combinations per context.")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(RESET_CMD)
                .about("Forget every executed combination.")
                .arg(config_arg()),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    let Some((cmd, matches)) = matches.subcommand() else {
        error!("no subcommand provided");
        return ExitCode::FAILURE;
    };
    let Some(path) = matches.get_one::<PathBuf>("config") else {
        error!(cmd, "missing config");
        return ExitCode::FAILURE;
    };
    let result = match cmd {
        RUN_CMD => run(path).await.map(|outcome| {
            info!(?outcome, "campaign finished");
        }),
        GENERATE_CMD => print_combinations(path),
        STATUS_CMD => status(path),
        RESET_CMD => reset(path),
        _ => {
            error!(cmd, "invalid subcommand");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = result {
        error!(error = ?e, cmd, "command failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(path: &Path) -> Result<Outcome, Error> {
    let config = Config::load(path)?;
    let mission = config.mission()?;
    let mut registry = Registry::default();

    // Connect to the broker
    let (link, handle) = Link::new(transport::Config {
        address: config.broker.clone(),
        vehicle: config.spec.drone().to_string(),
        reset_throttle: config.spec.kind().throttle,
        reconnect_delay: config.timing.reconnect_delay(),
        mailbox_size: config.mailbox_size,
    });

    // Start the campaign
    let (engine, mailbox) = Engine::new(
        &mut registry,
        mission::Config {
            runtime: Shell::new(config.runtime.clone()),
            adapter: handle.clone(),
            channel: handle,
            spec: config.spec.clone(),
            mission,
            store: config.store.clone(),
            results: config.results.clone(),
            mission_timeout: config.timing.mission_timeout(),
            publish_delay: config.timing.publish_delay(),
            geofence_radius: config.geofence_radius,
            mailbox_size: config.mailbox_size,
        },
    )?;
    let link = link.start(mailbox.clone());
    let mut engine = engine.start();

    // Stop gracefully on interrupt
    let finished = tokio::select! {
        result = &mut engine => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            info!("interrupted, stopping campaign");
            let mut mailbox = mailbox;
            mailbox.shutdown().await;
            engine.await
        }
    };
    link.abort();

    let mut buffer = String::new();
    if encode(&mut buffer, &registry).is_ok() {
        info!("metrics:\n{buffer}");
    }
    result.map_err(|err| Error::Collaborator(format!("campaign task failed: {err}")))?
}

fn print_combinations(path: &Path) -> Result<(), Error> {
    let config = Config::load(path)?;
    let space = generate(&config.spec);
    for combination in space.iter() {
        println!("{combination}");
    }
    info!(combinations = space.len(), "generated campaign");
    Ok(())
}

fn status(path: &Path) -> Result<(), Error> {
    let config = Config::load(path)?;
    let space = generate(&config.spec);
    let store = Store::load(&config.store, space.kind().scope())?;

    // Count executed and total combinations per context
    let mut contexts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for combination in space.iter() {
        let entry = contexts.entry(combination.context.to_string()).or_default();
        if store.contains(combination) {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
    for (context, (executed, total)) in &contexts {
        println!("{context}: {executed}/{total}");
    }
    info!(
        executed = space.len() - store.remaining(&space),
        total = space.len(),
        exhausted = store.is_exhausted(&space),
        "campaign status"
    );
    Ok(())
}

fn reset(path: &Path) -> Result<(), Error> {
    let config = Config::load(path)?;
    let space = generate(&config.spec);
    let forgotten = Store::reset(&config.store, space.kind().scope())?;
    info!(forgotten, path = ?config.store, "reset executed tests");
    Ok(())
}
