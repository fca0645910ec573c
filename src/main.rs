use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use itabs::app::App;
use itabs::config::{self, Config};
use itabs::logging;
use itabs::render::TextRenderer;

#[derive(Parser, Debug)]
#[command(name = "itabs")]
#[command(about = "Link hover previews from itabs meta tags")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./itabs.yaml, then $XDG_CONFIG_HOME/itabs/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve a link's preview metadata and print it as JSON
  Preview { url: String },

  /// Hover a link, printing what the renderer is asked to do
  Hover {
    url: String,

    /// How long the pointer stays on the link
    #[arg(long, default_value_t = 2000)]
    hold_ms: u64,
  },

  /// Warm the cache for the given links
  Prefetch {
    #[arg(required = true)]
    urls: Vec<String>,
  },

  /// Inspect or maintain the metadata cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// List cached URLs with their age and freshness
  List,
  /// Remove every entry
  Clear,
  /// Remove entries stale for longer than the prune grace period
  Prune,
  /// Remove one URL
  Invalidate { url: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init(&config::data_dir()?, args.log_stderr)?;

  let config = Config::load(args.config.as_deref())?;
  let app = App::new(config, Arc::new(TextRenderer))?;

  let result = run(&app, args.command).await;
  app.shutdown().await;
  result
}

async fn run(app: &App, command: Command) -> Result<()> {
  match command {
    Command::Preview { url } => {
      let record = app.preview(&url).await?;
      let json = serde_json::to_string_pretty(&*record)
        .map_err(|e| eyre!("Failed to serialize metadata: {}", e))?;
      println!("{}", json);
    }
    Command::Hover { url, hold_ms } => {
      app.hover(&url, Duration::from_millis(hold_ms)).await;
    }
    Command::Prefetch { urls } => {
      if !app.prefetch().is_enabled() {
        println!("prefetching is off in the configuration; nothing to do");
        return Ok(());
      }
      let mut issued = 0;
      for batch in urls.chunks(app.config().prefetch_batch_size) {
        issued += app.prefetch().schedule(batch);
        app.prefetch().wait_idle().await;
      }
      let fresh = urls.iter().filter(|url| app.cache().is_fresh(url)).count();
      println!("{} fetched, {}/{} cached", issued, fresh, urls.len());
    }
    Command::Cache { action } => cache_command(app, action),
  }

  Ok(())
}

fn cache_command(app: &App, action: CacheAction) {
  let cache = app.cache();
  match action {
    CacheAction::List => {
      let now = cache.now();
      for entry in cache.entries() {
        let state = if entry.is_fresh(now) { "fresh" } else { "stale" };
        let kind = if entry.metadata.enabled {
          entry.metadata.title.as_str()
        } else {
          "(no preview)"
        };
        println!(
          "{:<6} {:>6}m  {}  {}",
          state,
          entry.age(now).num_minutes(),
          entry.url,
          kind
        );
      }
    }
    CacheAction::Clear => {
      let count = cache.len();
      cache.clear();
      println!("removed {} entries", count);
    }
    CacheAction::Prune => {
      let removed = cache.prune(cache.now());
      println!("removed {} entries", removed);
    }
    CacheAction::Invalidate { url } => {
      if cache.invalidate(&url) {
        println!("removed {}", url);
      } else {
        println!("{} was not cached", url);
      }
    }
  }
}
