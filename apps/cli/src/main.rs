use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, load_settings_from, ClientSettings},
    FileTokenStore, HttpPairingBackend, MemoryTokenStore, PairingCoordinator, PairingOptions,
    PairingPhase, TokenStore,
};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "together", about = "Pair with your partner from the terminal")]
struct Args {
    /// Settings file; defaults to `client.toml` in the working directory.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long, env = "TOGETHER_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current pairing state.
    Status,
    /// Generate a pairing code for your partner to enter.
    Generate {
        /// Keep polling until your partner has entered the code.
        #[arg(long)]
        wait: bool,
    },
    /// Pair using the code your partner generated.
    Connect { code: String },
    /// Leave the current couple.
    Unmatch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path, |key| std::env::var(key).ok()),
        None => load_settings(),
    };
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
    }
    let base_url = settings
        .api_base_url()
        .with_context(|| format!("invalid API base url '{}'", settings.api_base_url))?;

    let tokens = token_store(args.token, &settings);
    if tokens.token().await.is_none() {
        warn!("no session token configured; pairing API calls will be rejected");
    }
    let backend = HttpPairingBackend::new(&base_url, settings.request_timeout(), tokens.clone())
        .context("failed to build pairing API client")?;
    let coordinator =
        PairingCoordinator::new(tokens, Arc::new(backend), PairingOptions::from(&settings));
    coordinator.refresh(false).await;

    let result = run(&coordinator, args.command).await;
    coordinator.shutdown();
    result
}

fn token_store(token: Option<String>, settings: &ClientSettings) -> Arc<dyn TokenStore> {
    match (token, &settings.token_file) {
        (Some(token), _) => Arc::new(MemoryTokenStore::new(Some(token))),
        (None, Some(path)) => Arc::new(FileTokenStore::new(path)),
        (None, None) => Arc::new(MemoryTokenStore::default()),
    }
}

async fn run(coordinator: &PairingCoordinator, command: Command) -> Result<()> {
    match command {
        Command::Status => {}
        Command::Generate { wait } => {
            let code = coordinator
                .generate_code()
                .await
                .context("failed to generate a pairing code")?;
            println!("Share this code with your partner: {code}");
            if wait {
                wait_for_partner(coordinator).await?;
            }
        }
        Command::Connect { code } => {
            let code = code.trim();
            if code.is_empty() {
                bail!("pairing code must not be empty");
            }
            coordinator
                .connect_with_code(code)
                .await
                .with_context(|| format!("failed to connect with code '{code}'"))?;
        }
        Command::Unmatch => coordinator.unmatch().await.context("failed to unmatch")?,
    }

    println!("{}", serde_json::to_string_pretty(&coordinator.snapshot())?);
    Ok(())
}

async fn wait_for_partner(coordinator: &PairingCoordinator) -> Result<()> {
    info!("waiting for your partner to enter the code (Ctrl-C to stop)");
    let mut states = coordinator.state_stream();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            state = states.next() => match state {
                Some(state) if state.phase() == PairingPhase::Paired => {
                    if let Some(partner) = &state.partner {
                        println!("Paired with {}", partner.display_name());
                    }
                    return Ok(());
                }
                Some(state) if state.my_code.is_none() => {
                    bail!("pairing code is no longer pending");
                }
                Some(_) => {}
                None => bail!("pairing session ended"),
            },
            _ = &mut ctrl_c => {
                info!("stopped waiting for partner");
                return Ok(());
            }
        }
    }
}
