mod cache;
mod client;
mod config;
mod db;
mod queue;
mod router;
mod sync;
#[cfg(test)]
mod testing;
mod transport;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::client::OfflineClient;
use crate::router::{Outcome, Session};
use crate::sync::{FlushOutcome, WakeRegistry};
use crate::transport::{Payload, Request};

#[derive(Parser, Debug)]
#[command(name = "offq")]
#[command(about = "Offline write queue and cache router for intermittently connected clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send a request through the router
  Send {
    /// HTTP method (GET, POST, ...)
    method: String,
    /// Path relative to the server url
    path: String,
    /// JSON object body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Deliver pending writes now
  Flush,
  /// Show pending writes and cache generation
  Status,
  /// Fetch the cache manifest into a new generation
  Install {
    /// Leave the previous generation serving
    #[arg(long)]
    no_activate: bool,
  },
  /// Make the installed generation current
  Activate,
  /// Drop one cached resource from the current generation
  Invalidate {
    /// Path relative to the server url
    path: String,
  },
  /// Run the background sync loop until interrupted
  Sync,
}

/// Log to a file in the data directory; stdout belongs to command output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = config::Config::data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "offq.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("OFFQ_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn parse_body(data: Option<&str>) -> Result<Option<Payload>> {
  data
    .map(|raw| {
      serde_json::from_str::<Payload>(raw).map_err(|e| eyre!("--data must be a JSON object: {}", e))
    })
    .transpose()
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let client = OfflineClient::new(&config)?;

  match args.command {
    Command::Send { method, path, data } => {
      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let request = Request::new(method, path, parse_body(data.as_deref())?);

      let routed = client.send(&Session::generate(), request).await?;
      let label = match routed.outcome() {
        Outcome::Committed => "committed",
        Outcome::Queued => "queued (offline, will sync later)",
        Outcome::Rejected => "rejected",
      };
      match routed.cached_at {
        Some(at) => eprintln!("{} [{}] from cache, stored {}", label, routed.response.status, at),
        None => eprintln!("{} [{}]", label, routed.response.status),
      }
      println!("{}", String::from_utf8_lossy(&routed.response.body));
    }
    Command::Flush => match client.flush().await? {
      FlushOutcome::Empty => println!("nothing to sync"),
      FlushOutcome::Synced {
        sent,
        accepted,
        cleared,
      } => {
        println!("synced {} of {} pending writes", accepted, sent);
        if !cleared {
          println!("batch kept for retry");
        }
      }
      FlushOutcome::Rejected { status } => {
        return Err(eyre!("server rejected the batch with status {}", status))
      }
    },
    Command::Status => {
      let status = client.status().await?;
      println!("pending writes: {}", status.pending);
      println!(
        "cache generation: {} (configured: {})",
        status.generation.as_deref().unwrap_or("none"),
        status.version
      );
    }
    Command::Install { no_activate } => {
      let count = client.install().await?;
      println!("installed {} resources into {}", count, config.cache.version);
      if !no_activate {
        let evicted = client.activate().await?;
        println!("activated {}, evicted {} stale entries", config.cache.version, evicted);
      }
    }
    Command::Activate => {
      let evicted = client.activate().await?;
      println!("activated {}, evicted {} stale entries", config.cache.version, evicted);
    }
    Command::Invalidate { path } => {
      if client.invalidate(&path).await? {
        println!("invalidated {}", path);
      } else {
        println!("{} was not cached", path);
      }
    }
    Command::Sync => {
      let registry = WakeRegistry::new();
      let trigger = client.sync_trigger(&registry);
      // This process is its own host: fire the wake signal on a schedule
      let scheduler = registry.schedule(
        config.sync.wake_tag.as_str(),
        Duration::from_secs(config.sync.wake_interval_secs.max(1)),
      );

      eprintln!("syncing; press Ctrl-C to stop");
      trigger
        .run(async {
          let _ = tokio::signal::ctrl_c().await;
        })
        .await;
      scheduler.abort();
    }
  }

  Ok(())
}
