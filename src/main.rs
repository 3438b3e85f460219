mod app;
mod config;
mod lifecycle;
mod message;
mod net;
mod router;
mod strategy;
mod tier;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::oneshot;
use url::Url;

use crate::message::{Command as StoreCommand, CommandEnvelope};
use crate::router::{RequestMode, RouteOutcome};

#[derive(Parser, Debug)]
#[command(name = "shellkeeper")]
#[command(about = "Offline-first cache engine with versioned storage tiers")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellkeeper/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
  /// Fetch the asset manifest into the shell tier and activate
  Provision,
  /// Reclaim superseded tiers and take over request routing
  Activate,
  /// Route one request and print the response body
  Get {
    url: Url,
    /// Treat the request as a full-page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Store a file as the user document
  Store { file: PathBuf },
  /// Clear the user document
  Clear,
  /// Dispatch a raw JSON command (unrecognized kinds are ignored)
  Send { json: String },
  /// List tier names present in storage
  Tiers,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config)?;

  let app = app::App::open(&config)?;

  match args.command {
    CliCommand::Provision => {
      app.provision().await?;
      app.activate().await?;
      println!("provisioned {} assets", config.manifest.len());
    }
    CliCommand::Activate => {
      app.activate().await?;
      println!("activated");
    }
    CliCommand::Get { url, navigate } => {
      if !app.is_provisioned()? {
        eprintln!("shell tier is not provisioned; run `shellkeeper provision` first");
      }
      app.activate().await?;
      let mode = if navigate {
        RequestMode::Navigate
      } else {
        RequestMode::Subresource
      };

      match app.get(url, mode).await {
        RouteOutcome::Response(response) => {
          std::io::stdout().write_all(&response.body)?;
        }
        RouteOutcome::Passthrough => {
          eprintln!("not intercepted");
        }
        RouteOutcome::NoResponse => {
          return Err(eyre!("no response: network failed and nothing cached"));
        }
      }
    }
    CliCommand::Store { file } => {
      let payload = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let ack = send_command(&app, StoreCommand::Store { payload }).await?;
      println!("{}", serde_json::to_string(&ack)?);
    }
    CliCommand::Clear => {
      let ack = send_command(&app, StoreCommand::Clear).await?;
      println!("{}", serde_json::to_string(&ack)?);
    }
    CliCommand::Send { json } => match app.handle_raw_command(&json)? {
      Some(ack) => println!("{}", serde_json::to_string(&ack)?),
      None => println!("ignored"),
    },
    CliCommand::Tiers => {
      for tier in app.tiers()? {
        println!("{}", tier);
      }
    }
  }

  Ok(())
}

/// Push one command over the out-of-band channel and wait for our ack.
async fn send_command(
  app: &app::App<tier::SqliteStorage, net::HttpFetcher>,
  command: StoreCommand,
) -> Result<message::Ack> {
  let (tx, handle) = app.command_channel();
  let (reply, ack) = oneshot::channel();

  tx.send(CommandEnvelope { command, reply })
    .map_err(|e| eyre!("Command channel closed: {}", e))?;
  let ack = ack.await.map_err(|e| eyre!("No acknowledgement: {}", e))?;

  drop(tx);
  handle.await?;
  Ok(ack)
}

/// Log to a daily-rolling file in the data directory; level via RUST_LOG.
fn init_tracing(config: &config::Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = match &config.data_dir {
    Some(dir) => dir.join("logs"),
    None => dirs::data_dir()
      .ok_or_else(|| eyre!("Could not determine data directory"))?
      .join("shellkeeper")
      .join("logs"),
  };
  std::fs::create_dir_all(&log_dir)?;

  let appender = tracing_appender::rolling::daily(log_dir, "shellkeeper.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
