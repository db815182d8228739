use catalog_offline::config::Config;
use catalog_offline::context::Context;
use catalog_offline::dispatch::Dispatcher;
use catalog_offline::event::{Event, EventHandler, Outcome};
use catalog_offline::host::ConsoleHost;
use catalog_offline::http::Request;
use catalog_offline::queue::MutationQueue;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "catalog-offline")]
#[command(about = "Offline request cache and background sync for the catalog client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/catalog-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the app shell for the current generation
  Install,
  /// Delete stale cache generations and claim clients
  Activate,
  /// Send a request through the offline layer
  Fetch {
    method: String,
    /// Absolute URL or path relative to the configured origin
    url: String,
    /// Request body
    #[arg(short, long)]
    body: Option<String>,
    /// Header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Replay queued mutations
  Sync {
    #[arg(short, long)]
    tag: Option<String>,
  },
  /// Deliver a push message
  Push { text: Option<String> },
  /// Simulate a click on a notification action
  Click { action: Option<String> },
  /// List queued mutations
  Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_logging(&config, args.verbose)?;

  let context = Context::open(config, Arc::new(ConsoleHost))?;

  if matches!(args.command, Command::Queue) {
    return print_queue(context.queue.as_ref());
  }

  let event = build_event(&context.config, args.command)?;
  let dispatcher = Arc::new(Dispatcher::new(context).map_err(|e| eyre!("{}", e))?);

  let (sender, events) = EventHandler::channel();
  let server = tokio::spawn(Arc::clone(&dispatcher).run(events));

  let reply = sender
    .send(event)
    .ok_or_else(|| eyre!("Dispatcher is not running"))?;
  let outcome = reply
    .await
    .map_err(|_| eyre!("Dispatcher dropped the event"))?;

  drop(sender);
  server.await?;
  dispatcher.shutdown().await;

  report(outcome)
}

fn init_logging(config: &Config, verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("catalog_offline=info"));

  if verbose {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let log_dir = config.data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "catalog-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

fn build_event(config: &Config, command: Command) -> Result<Event> {
  let event = match command {
    Command::Install => Event::Install,
    Command::Activate => Event::Activate,
    Command::Fetch {
      method,
      url,
      body,
      headers,
    } => {
      let url = config.resolve(&url)?;
      let mut request = Request::parse(&method, url.as_str()).map_err(|e| eyre!("{}", e))?;
      for header in headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Header '{}' must look like 'Name: value'", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(body) = body {
        request = request.with_body(body);
      }
      Event::fetch(request)
    }
    Command::Sync { tag } => Event::Sync {
      tag: tag.unwrap_or_else(|| config.sync_tag.clone()),
    },
    Command::Push { text } => Event::Push { payload: text },
    Command::Click { action } => Event::NotificationClick { action },
    Command::Queue => return Err(eyre!("queue is not an event")),
  };
  Ok(event)
}

fn print_queue(queue: &dyn MutationQueue) -> Result<()> {
  let pending = queue.peek_all().map_err(|e| eyre!("{}", e))?;
  if pending.is_empty() {
    println!("queue is empty");
    return Ok(());
  }
  for m in pending {
    println!(
      "{:>4}  {}  {:<6} {}  ({} bytes)",
      m.id,
      m.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
      m.method,
      m.url,
      m.body.as_ref().map(Vec::len).unwrap_or(0)
    );
  }
  Ok(())
}

fn report(outcome: Outcome) -> Result<()> {
  match outcome {
    Outcome::Installed => println!("installed"),
    Outcome::Activated(activation) => {
      if activation.deleted.is_empty() {
        println!("activated");
      } else {
        println!("activated, deleted {}", activation.deleted.join(", "));
      }
    }
    Outcome::Fetched(Ok(result)) => {
      eprintln!(
        "{} ({:?}, {:?})",
        result.response.status, result.classification, result.source
      );
      println!("{}", String::from_utf8_lossy(&result.response.body));
    }
    Outcome::Fetched(Err(e)) => return Err(eyre!("Request failed: {}", e)),
    Outcome::Synced(None) => println!("sync tag not handled"),
    Outcome::Synced(Some(report)) => println!(
      "replayed {} of {}, {} still queued",
      report.replayed, report.attempted, report.failed
    ),
    Outcome::Notified(_) => {}
    Outcome::Failed(e) => return Err(eyre!("{}", e)),
    Outcome::Aborted(reason) => return Err(eyre!("Handler aborted: {}", reason)),
  }
  Ok(())
}
