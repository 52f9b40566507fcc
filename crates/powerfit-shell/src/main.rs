//! Command-line host for the PowerFit offline caching worker.
//!
//! Drives the worker against a live origin or a site directory on disk, and
//! inspects the durable stores it shares with the page.
//!
//! ## Usage
//!
//! ```bash
//! # Install the shell from a local build of the site and list what was cached
//! powerfit-shell --site ./public warm
//!
//! # Serve a navigation with connectivity cut after install
//! powerfit-shell --site ./public fetch /trainers.html --navigate --offline
//!
//! # Queue a contact form submission, then replay the queue
//! powerfit-shell queue --field name=Ana --field goal=strength
//! powerfit-shell sync
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use powerfit_common::{init_logging, LogConfig, LogFormat, ShellError};
use powerfit_net::{Fetcher, HttpFetcher, LoaderConfig, Request, SiteDirFetcher, Url};
use powerfit_outbox::{Inquiry, OutboxError, PageStorage, PendingSubmission};
use powerfit_worker::{
    ClickOutcome, FetchError, NotificationClick, PeriodicSyncEvent, PushEvent, ShellWorker,
    Strategy, SyncEvent, WorkerConfig, WorkerError, ACTION_EXPLORE,
};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "powerfit-shell")]
#[command(about = "Offline caching worker host for the PowerFit Gym site")]
struct Cli {
    /// Worker configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Site origin, overriding the configured one
    #[arg(long, global = true)]
    origin: Option<Url>,
    /// Serve the origin from this directory instead of the network
    #[arg(long, global = true)]
    site: Option<PathBuf>,
    /// Storage database, overriding the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the app shell and list the cached entries
    Warm,

    /// Install, then answer one request through the worker
    Fetch {
        /// Path or absolute URL to request
        target: String,
        /// Treat the request as a page navigation
        #[arg(short, long)]
        navigate: bool,
        /// Cut connectivity after install (requires --site)
        #[arg(long)]
        offline: bool,
        /// Force a strategy instead of the configured routes
        #[arg(short, long)]
        strategy: Option<StrategyArg>,
        /// Write the response body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Queue a form submission for background replay
    Queue {
        /// Form field as name=value (repeatable)
        #[arg(short, long = "field", required = true)]
        fields: Vec<String>,
    },

    /// Show queued submissions without draining them
    Pending,

    /// Fire a background sync event
    Sync {
        /// Sync tag
        #[arg(short, long, default_value = "contact-form")]
        tag: String,
    },

    /// Install, then fire a periodic sync to refresh the shell
    Refresh {
        /// Periodic sync tag
        #[arg(short, long, default_value = "update-content")]
        tag: String,
    },

    /// Show the notification a push message would raise
    Push {
        /// Push payload text
        body: Option<String>,
        /// Also click the notification's action (explore, close)
        #[arg(long)]
        click: Option<String>,
    },

    /// Inspect or change page-side storage
    Page {
        #[command(subcommand)]
        command: PageCommands,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum PageCommands {
    /// Show install-prompt flags and recorded inquiries
    Show,
    /// Remember that the install prompt was dismissed
    DismissInstall,
    /// Remember that the app was installed
    MarkInstalled,
    /// Record a membership inquiry
    Inquire {
        /// Form field as name=value (repeatable)
        #[arg(short, long = "field", required = true)]
        fields: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    OfflineFirst,
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::OfflineFirst => Strategy::OfflineFirst,
            StrategyArg::CacheFirst => Strategy::CacheFirst,
            StrategyArg::NetworkFirst => Strategy::NetworkFirst,
            StrategyArg::StaleWhileRevalidate => Strategy::StaleWhileRevalidate,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Shell(#[from] ShellError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] OutboxError),
    #[error("invalid field {0:?}, expected name=value")]
    BadField(String),
    #[error("--offline needs --site; a live origin cannot be taken offline")]
    OfflineNeedsSite,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The fetcher the worker talks to, kept concrete so connectivity can be toggled.
enum Origin {
    Site(Arc<SiteDirFetcher>),
    Live(Arc<HttpFetcher>),
}

impl Origin {
    fn fetcher(&self) -> Arc<dyn Fetcher> {
        match self {
            Origin::Site(site) => site.clone() as Arc<dyn Fetcher>,
            Origin::Live(live) => live.clone() as Arc<dyn Fetcher>,
        }
    }

    fn go_offline(&self) -> Result<(), CliError> {
        match self {
            Origin::Site(site) => {
                site.set_online(false);
                Ok(())
            }
            Origin::Live(_) => Err(CliError::OfflineNeedsSite),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    }
    .with_format(cli.log_format);
    if let Err(e) = init_logging(log) {
        eprintln!("logging unavailable: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(origin) = cli.origin {
        config.origin = origin;
    }
    if let Some(db) = cli.db {
        config.storage_path = db;
    }
    if let Some(parent) = config.storage_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Page { command } => {
            let storage = PageStorage::open(&config.storage_path)?;
            return page(&storage, command);
        }
        _ => {}
    }

    let origin = match &cli.site {
        Some(root) => Origin::Site(Arc::new(SiteDirFetcher::new(root, config.origin.clone()))),
        None => {
            let fetcher = HttpFetcher::new(LoaderConfig::default()).map_err(WorkerError::from)?;
            Origin::Live(Arc::new(fetcher))
        }
    };
    let (worker, mut events) = ShellWorker::builder(config).fetcher(origin.fetcher()).build()?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "worker event");
        }
    });

    match cli.command {
        Commands::Warm => {
            let outcome = worker.install().await?;
            println!("Install: {:?}", outcome);
            if let Some(active) = worker.lifecycle().serving().await {
                println!("Cache {}:", active.name());
                for key in active.keys().await {
                    println!("  {}", key);
                }
            }
        }

        Commands::Fetch {
            target,
            navigate,
            offline,
            strategy,
            output,
        } => {
            worker.install().await?;
            if offline {
                origin.go_offline()?;
            }

            let url = worker.config().resolve(&target).map_err(WorkerError::from)?;
            let request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            let response = match strategy {
                Some(strategy) => worker.fetch_with(request, strategy.into()).await?,
                None => worker.fetch(request).await?,
            };
            worker.settle().await;

            eprintln!(
                "{} {} ({} bytes, {})",
                response.status,
                response.url,
                response.body().len(),
                if response.from_cache() { "cache" } else { "network" }
            );
            match output {
                Some(path) => std::fs::write(path, response.body())?,
                None => println!("{}", String::from_utf8_lossy(response.body())),
            }
        }

        Commands::Queue { fields } => {
            let record = PendingSubmission::from_pairs(parse_fields(&fields)?);
            let id = worker.queue_submission(record).await?;
            println!("Queued submission #{}", id);
        }

        Commands::Pending => {
            for record in worker.outbox().peek_all()? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }

        Commands::Sync { tag } => {
            let outcome = worker.sync(SyncEvent::new(tag)).await?;
            println!("{:?}", outcome);
        }

        Commands::Refresh { tag } => {
            worker.install().await?;
            let outcome = worker.periodic_sync(PeriodicSyncEvent::new(tag)).await?;
            println!("{:?}", outcome);
        }

        Commands::Push { body, click } => {
            let push = body.map(PushEvent::text).unwrap_or_else(PushEvent::empty);
            let intent = worker.push(push).await?;
            println!("{}", serde_json::to_string_pretty(&intent)?);

            if let Some(action) = click {
                if action != ACTION_EXPLORE {
                    warn!(%action, "action only closes the notification");
                }
                let outcome = worker
                    .notification_click(NotificationClick {
                        tag: intent.tag,
                        action: Some(action),
                    })
                    .await?;
                match outcome {
                    ClickOutcome::Closed => println!("Notification closed"),
                    ClickOutcome::Focused { client_id } => println!("Focused window {}", client_id),
                    ClickOutcome::Opened { client_id } => println!("Opened window {}", client_id),
                }
            }
        }

        Commands::Page { .. } | Commands::Config => {}
    }

    worker.settle().await;
    Ok(())
}

fn page(storage: &PageStorage, command: PageCommands) -> Result<(), CliError> {
    match command {
        PageCommands::Show => {
            println!("Install dismissed: {}", storage.install_dismissed()?);
            println!("App installed:     {}", storage.app_installed()?);
            println!("Offer install:     {}", storage.should_offer_install()?);
            let inquiries = storage.inquiries()?;
            println!("Inquiries:         {}", inquiries.len());
            for inquiry in inquiries {
                println!("  {}", serde_json::to_string(&inquiry)?);
            }
        }
        PageCommands::DismissInstall => storage.mark_install_dismissed()?,
        PageCommands::MarkInstalled => storage.mark_app_installed()?,
        PageCommands::Inquire { fields } => {
            let fields = parse_fields(&fields)?.into_iter().collect();
            let count = storage.record_inquiry(Inquiry::new(fields))?;
            println!("Recorded inquiry ({} total)", count);
        }
    }
    Ok(())
}

/// Split `name=value` arguments. Values may contain further `=`.
fn parse_fields(fields: &[String]) -> Result<Vec<(String, String)>, CliError> {
    fields
        .iter()
        .map(|field| match field.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.to_string()))
            }
            _ => Err(CliError::BadField(field.clone())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let fields = vec!["name=Ana".to_string(), "note=a=b".to_string()];
        let parsed = parse_fields(&fields).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("name".to_string(), "Ana".to_string()),
                ("note".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_fields_rejects_missing_name() {
        assert!(matches!(
            parse_fields(&["=x".to_string()]),
            Err(CliError::BadField(_))
        ));
        assert!(matches!(
            parse_fields(&["plain".to_string()]),
            Err(CliError::BadField(_))
        ));
    }

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from([
            "powerfit-shell",
            "--site",
            "public",
            "fetch",
            "/trainers.html",
            "--navigate",
            "--offline",
            "--strategy",
            "network-first",
        ])
        .unwrap();
        match cli.command {
            Commands::Fetch {
                navigate,
                offline,
                strategy,
                ..
            } => {
                assert!(navigate && offline);
                assert_eq!(Strategy::from(strategy.unwrap()), Strategy::NetworkFirst);
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_page_commands_use_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = PageStorage::open(&dir.path().join("shell.db")).unwrap();

        page(&storage, PageCommands::DismissInstall).unwrap();
        page(
            &storage,
            PageCommands::Inquire {
                fields: vec!["name=Ana".to_string()],
            },
        )
        .unwrap();

        assert!(!storage.should_offer_install().unwrap());
        assert_eq!(storage.inquiries().unwrap().len(), 1);
    }
}
