#![allow(missing_docs)]

//! keyring-agent CLI entry point.
//!
//! Parses CLI arguments with clap, loads config, initialises logging and
//! drives a keyring actor for the chosen subcommand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use keyring_agent::config::{self, Config};
use keyring_agent::facility::{KeyFacility, MemoryFacility};
use keyring_agent::logging::{self, LoggingGuard};
use keyring_agent::{KeyringActor, KeyringError};

/// Secret name used by the demo scenario.
const DEMO_KEY: &str = "test";

/// Payload stored by the demo scenario.
const DEMO_PAYLOAD: &[u8] = b"Hello World";

/// keyring-agent: thread-affine actor for the Linux session keyring.
#[derive(Parser)]
#[command(name = "keyring-agent", version, about)]
struct Cli {
    /// Config file (default: ~/.keyring-agent/config.toml or $KEYRING_AGENT_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the in-process keyring emulation instead of the kernel.
    #[arg(long, global = true)]
    memory: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Add, read, remove and re-read a secret, twice; the second pass runs
    /// with a SIGHUP handler installed.
    Demo,
    /// Print the keyring's description as JSON.
    Describe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => config::config_path(|key| std::env::var(key).ok())?,
    };
    let mut config = config::load_config_or_default(&path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate().context("invalid configuration")?;

    let _guard = init_logging(&config)?;
    info!(config = %path.display(), "keyring-agent starting");

    let actor = start_actor(&config, cli.memory).await?;
    match cli.command {
        Command::Demo => handle_demo(&actor).await,
        Command::Describe => handle_describe(&actor).await,
    }
}

fn init_logging(config: &Config) -> Result<Option<LoggingGuard>> {
    match &config.logging.dir {
        Some(dir) => Ok(Some(logging::init_production(dir, &config.logging.level)?)),
        None => {
            logging::init_cli(&config.logging.level, config.logging.json)?;
            Ok(None)
        }
    }
}

async fn start_actor(config: &Config, memory: bool) -> Result<KeyringActor> {
    if memory {
        return spawn_on(MemoryFacility::new(), config).await;
    }
    start_kernel_actor(config).await
}

#[cfg(target_os = "linux")]
async fn start_kernel_actor(config: &Config) -> Result<KeyringActor> {
    spawn_on(keyring_agent::facility::LinuxFacility::new(), config).await
}

#[cfg(not(target_os = "linux"))]
async fn start_kernel_actor(_config: &Config) -> Result<KeyringActor> {
    anyhow::bail!("the kernel keyring is only available on Linux; use --memory")
}

async fn spawn_on<F: KeyFacility>(facility: F, config: &Config) -> Result<KeyringActor> {
    KeyringActor::start(facility, &config.keyring)
        .await
        .with_context(|| format!("failed to open keyring {:?}", config.keyring.name))
}

async fn handle_demo(actor: &KeyringActor) -> Result<()> {
    run_scenario(actor).await;
    println!("----");

    #[cfg(unix)]
    let _hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .context("failed to install SIGHUP handler")?;
    info!("SIGHUP handler installed");

    run_scenario(actor).await;

    actor.stop();
    let cause = actor.wait().await;
    info!(cause = ?cause, "keyring actor finished");
    Ok(())
}

/// Add, read, remove, then read again; the last read must report the key
/// as missing.
async fn run_scenario(actor: &KeyringActor) {
    report("add", actor.add_key(DEMO_KEY, DEMO_PAYLOAD).await.map(|()| None));
    report(
        "read",
        actor
            .read_key(DEMO_KEY)
            .await
            .map(|secret| Some(String::from_utf8_lossy(&secret).into_owned())),
    );
    report("remove", actor.remove_key(DEMO_KEY).await.map(|()| None));
    report(
        "read",
        actor
            .read_key(DEMO_KEY)
            .await
            .map(|secret| Some(String::from_utf8_lossy(&secret).into_owned())),
    );
}

fn report(op: &str, result: Result<Option<String>, KeyringError>) {
    match result {
        Ok(Some(value)) => println!("{op}: ok {value:?}"),
        Ok(None) => println!("{op}: ok"),
        Err(e) => println!("{op}: error: {e}"),
    }
}

async fn handle_describe(actor: &KeyringActor) -> Result<()> {
    let description = actor
        .describe()
        .await
        .context("failed to describe keyring")?;
    let json =
        serde_json::to_string_pretty(&description).context("failed to encode description")?;
    println!("{json}");

    actor.stop();
    actor.wait().await;
    Ok(())
}
