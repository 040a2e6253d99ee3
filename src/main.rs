use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{LoggingConfig, TurnstileConfig};
use turnstile::ratelimit::{
    AdmissionGuard, Decision, IdentifierStrategy, InMemoryStore, PolicyEngine, Reaper,
    RequestIdentity,
};

/// Request admission control engine.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Settings file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the resolved policy table as YAML
    Policies,

    /// Run a burst of requests through a policy and print each decision
    Simulate {
        /// Named policy, e.g. auth.login
        #[arg(short, long)]
        policy: String,

        /// Caller IP
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,

        /// Authenticated user id
        #[arg(long)]
        user: Option<String>,

        /// Caller user agent
        #[arg(long)]
        user_agent: Option<String>,

        /// How many requests to send
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: u32,

        /// How the caller is identified
        #[arg(long, value_enum, default_value_t = Strategy::Ip)]
        strategy: Strategy,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Ip,
    User,
    Combined,
    Progressive,
}

impl From<Strategy> for IdentifierStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Ip => IdentifierStrategy::Ip,
            Strategy::User => IdentifierStrategy::User,
            Strategy::Combined => IdentifierStrategy::Combined,
            Strategy::Progressive => IdentifierStrategy::Progressive,
        }
    }
}

#[derive(Serialize)]
struct DecisionLine<'a> {
    request: u32,
    policy: &'a str,
    strategy: IdentifierStrategy,
    #[serde(flatten)]
    decision: &'a Decision,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = TurnstileConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let table = config.policy_table()?;

    match cli.command {
        Command::Policies => {
            print!("{}", serde_yaml::to_string(&table)?);
        }
        Command::Simulate {
            policy,
            ip,
            user,
            user_agent,
            requests,
            strategy,
        } => {
            let store = Arc::new(InMemoryStore::new());
            let reaper = config
                .reaper
                .enabled
                .then(|| Reaper::spawn(store.clone(), config.reaper.sweep_interval()));

            let strategy = IdentifierStrategy::from(strategy);
            let guard =
                AdmissionGuard::from_table(PolicyEngine::new(store.clone()), &table, &policy, strategy)?;

            let mut identity = RequestIdentity::anonymous(ip);
            identity.user_id = user;
            identity.user_agent = user_agent;

            tokio::select! {
                result = simulate(&guard, &identity, requests, strategy) => result?,
                _ = shutdown_signal() => {}
            }

            if let Some(reaper) = reaper {
                reaper.shutdown().await?;
            }
            info!(records = store.len(), "Simulation finished");
        }
    }

    Ok(())
}

async fn simulate(
    guard: &AdmissionGuard,
    identity: &RequestIdentity,
    requests: u32,
    strategy: IdentifierStrategy,
) -> anyhow::Result<()> {
    for request in 1..=requests {
        let decision = guard.decide(identity).await;
        let line = DecisionLine {
            request,
            policy: guard.policy_type(),
            strategy,
            decision: &decision,
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
