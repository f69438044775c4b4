mod alert;
mod cache;
mod config;
mod error;
mod message;
mod pipeline;
mod weixin;
mod zabbix;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use config::Config;
use error::RelayError;
use pipeline::{Invocation, Outcome};

/// Relay a Zabbix alert, with its item graph, to a WeCom user.
#[derive(Debug, Parser)]
#[command(name = "zabbix-weixin-relay", version)]
struct Cli {
    /// WeCom user id that receives the message
    user: String,
    /// Message title (the Zabbix alert subject)
    subject: String,
    /// Alert payload: JSON object with itemid, alarmtime and eventid
    payload: String,
    /// Path to the JSON (or .toml) configuration file
    #[arg(long, env = config::CONFIG_PATH_ENV)]
    config: Option<PathBuf>,
    /// Do everything except send; print the composed message instead
    #[arg(long, env = "DRY_RUN", value_parser = clap::builder::BoolishValueParser::new())]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zabbix_weixin_relay=info")),
        )
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match relay(cli).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn relay(cli: Cli) -> Result<String> {
    let config_path = Config::resolve_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let invocation = Invocation {
        user_id: cli.user,
        subject: cli.subject,
        payload: cli.payload,
        dry_run: cli.dry_run,
    };

    if invocation.dry_run {
        info!("Dry run: message will be printed, not sent");
    }

    match pipeline::run(&config, &invocation).await.context("Alert relay aborted")? {
        Outcome::Sent(reply) => Ok(reply),
        Outcome::DryRun(news) => {
            serde_json::to_string_pretty(&news).context("Failed to serialize composed message")
        }
    }
}

/// Map the first typed failure in the chain to its exit code; anything
/// untyped exits with 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RelayError>())
        .map(RelayError::exit_code)
        .unwrap_or(1)
}
