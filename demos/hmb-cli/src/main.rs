//! Command line HMB client.
//!
//! Run with: cargo run -p hmb-cli -- --bus http://localhost:8000/bus listen --queue Q1
//!
//! `--user` reads the password from the `HMB_PASSWORD` environment variable.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use hmb_session::{
    DisplayHandler, ListenExit, ListenOptions, MessageType, SessionConfig,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_QUEUE: &str = "SYSTEM_ALERT";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Parser)]
#[command(version, about = "Send to or listen on an HMB bus")]
struct Arguments {
    #[command(subcommand)]
    command: Command,

    /// JSON session configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bus URL, overrides the configuration file.
    #[arg(long, global = true)]
    bus: Option<String>,

    /// Login user. The password is read from HMB_PASSWORD.
    #[arg(long, short, global = true)]
    user: Option<String>,

    /// Seconds between two attempts.
    #[arg(long, global = true)]
    retry_wait: Option<f64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every message arriving on the given queues.
    Listen {
        /// Queues to listen to: Q1[,Q2...].
        #[arg(long, value_delimiter = ',')]
        queue: Vec<String>,

        /// Long-poll timeout in seconds; the heartbeat is half of it.
        #[arg(long)]
        timeout: Option<u64>,

        /// Number of stored messages to print first.
        #[arg(long)]
        backfill: Option<u32>,

        #[arg(long, default_value_t = 10)]
        retries: u32,
    },
    /// Send one text message.
    Send {
        #[arg(long, default_value = DEFAULT_QUEUE)]
        queue: String,

        #[arg(long, default_value = "")]
        data: String,

        #[arg(long)]
        topic: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Arguments::parse();
    let mut config = load_config(&args).await?;

    match args.command {
        Command::Listen {
            queue,
            timeout,
            backfill,
            retries,
        } => {
            if !queue.is_empty() {
                config.queues = queue;
            }
            if config.queues.is_empty() {
                config.queues.push(DEFAULT_QUEUE.to_string());
            }
            if let Some(backfill) = backfill {
                config.backfill = backfill;
            }
            if timeout.is_some() || config.heartbeat_secs.is_none() {
                config.heartbeat_secs = Some(timeout.unwrap_or(DEFAULT_TIMEOUT_SECS) / 2);
            }
            config.keep = true;
            listen(config, retries).await
        }
        Command::Send { queue, data, topic } => {
            let mut session = config.into_session()?;
            session
                .send_msg(
                    &queue,
                    json!({ "content": data }),
                    MessageType::Msg,
                    topic.as_deref(),
                    1,
                )
                .await?;
            session.close();
            info!(queue = %queue, "Message sent");
            Ok(())
        }
    }
}

async fn load_config(args: &Arguments) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_path(path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => SessionConfig::new(String::new()),
    };
    if let Some(bus) = &args.bus {
        config.url.clone_from(bus);
    }
    if config.url.is_empty() {
        bail!("a bus URL is required (--bus or \"url\" in --config)");
    }
    if let Some(user) = &args.user {
        config.user = Some(user.clone());
        config.password = std::env::var("HMB_PASSWORD").ok();
        if config.password.is_none() {
            warn!("HMB_PASSWORD is not set, sending an empty password");
        }
    }
    if let Some(wait) = args.retry_wait {
        config.retry_wait_secs = wait;
    }
    Ok(config)
}

async fn listen(config: SessionConfig, retries: u32) -> anyhow::Result<()> {
    let mut session = config.into_session()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let options = ListenOptions::new().retries(retries);
    match session.listen(&mut DisplayHandler, &options, &cancel).await {
        ListenExit::Cancelled => Ok(()),
        ListenExit::HandlerStopped(e) => Err(anyhow::anyhow!(e)),
        ListenExit::ReceiveFailed(e) => Err(e.into()),
    }
}
