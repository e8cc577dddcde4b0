use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

use instawatch::clock::SystemClock;
use instawatch::commands::{FirstScrapes, Tracker};
use instawatch::config::{Backend, Config};
use instawatch::db::Database;
use instawatch::instagram::client::InstagramClient;
use instawatch::instagram::rate_limit::RateGovernor;
use instawatch::notify::console::ConsoleSink;
use instawatch::notify::discord::DiscordSink;
use instawatch::notify::NotificationSink;
use instawatch::output::terminal;
use instawatch::pipeline::{ScrapeEngine, ScrapeMode, Scheduler, SweepSettings};
use instawatch::tracking::{AccountId, DedupStore, Registry};

/// Instawatch: Instagram post and story notifications for Discord.
///
/// Polls tracked Instagram accounts on a fixed interval and posts each new
/// post (and any story) into a per-account Discord thread.
#[derive(Parser)]
#[command(name = "instawatch", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state files (or database) if they don't exist
    Init,

    /// Start tracking an account and report its recent posts
    Add {
        /// Instagram username (with or without a leading @)
        username: String,
    },

    /// Stop tracking an account and delete its thread
    Remove {
        /// Instagram username
        username: String,
    },

    /// List tracked accounts
    List,

    /// Scrape one tracked account now, reporting every new post
    Scrape {
        /// Instagram username
        username: String,
    },

    /// Run a single sweep over every tracked account
    Sweep,

    /// Run the polling daemon (reads `!add`, `!remove`, `!list` from stdin)
    Run {
        /// Print notifications to the terminal instead of posting to Discord
        #[arg(long)]
        dry_run: bool,
    },

    /// Show system status (state location, tracked accounts, last seen times)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("instawatch=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing Instawatch state...");
            let db = open_database(&config)?;
            let registry = Registry::load(Arc::clone(&db)).await?;
            let dedup = DedupStore::load(Arc::clone(&db)).await?;
            registry.persist().await?;
            dedup.persist().await?;
            println!("State initialized at: {}", db.location());
            println!("Tracked accounts: {}", registry.len().await);
            println!("\nInstawatch is ready. Next step: set up your .env file");
            println!("  (see .env.example for required variables)");
            println!("\nThen run: instawatch add <username>");
        }

        Commands::Add { username } => {
            let app = App::open(config, Notify::PreferDiscord).await?;
            let tracker = app.tracker();
            let (reply, pending) = tracker.add(&username).await;
            println!("{reply}");
            if let Some(pending) = pending {
                match tracker.initial_scrape(pending).await {
                    Ok(outcome) => terminal::display_scrape_outcome(&outcome),
                    Err(e) => println!(
                        "  {} first scrape failed ({}), the next sweep will retry",
                        "Warning:".yellow(),
                        e.kind()
                    ),
                }
            }
        }

        Commands::Remove { username } => {
            let app = App::open(config, Notify::PreferDiscord).await?;
            println!("{}", app.tracker().remove(&username).await);
        }

        Commands::List => {
            let app = App::open(config, Notify::Console).await?;
            println!("{}", app.tracker().list().await);
        }

        Commands::Scrape { username } => {
            let app = App::open(config, Notify::PreferDiscord).await?;
            let account = AccountId::parse(&username)?;
            if !app.registry.contains(&account).await {
                anyhow::bail!("`{account}` is not tracked. Run `instawatch add {account}` first.");
            }
            let outcome = app
                .engine
                .scrape(&account, ScrapeMode::Forced)
                .await
                .with_context(|| format!("Scrape of {account} failed"))?;
            terminal::display_scrape_outcome(&outcome);
        }

        Commands::Sweep => {
            let app = App::open(config, Notify::PreferDiscord).await?;
            let (_shutdown_tx, shutdown_rx) = watch::channel(false);
            let scheduler = app.scheduler(shutdown_rx);
            println!("Sweeping {} account(s)...", app.registry.len().await);
            let report = scheduler.sweep().await;
            terminal::display_sweep_report(&report);
        }

        Commands::Run { dry_run } => {
            let notify = if dry_run {
                Notify::Console
            } else {
                Notify::Discord
            };
            let app = App::open(config, notify).await?;
            run_daemon(app).await?;
            // The stdin reader can't be cancelled; don't wait for another line.
            // Everything else has been joined by now.
            std::process::exit(0);
        }

        Commands::Status => {
            let app = App::open(config, Notify::Console).await?;
            instawatch::status::show(&app.config, &app.registry, &app.dedup).await?;
        }
    }

    Ok(())
}

/// Where notifications should go.
#[derive(Clone, Copy)]
enum Notify {
    /// Print to the terminal.
    Console,
    /// Post to Discord; missing settings are an error.
    Discord,
    /// Post to Discord when configured, otherwise print.
    PreferDiscord,
}

/// Everything a command needs, wired together.
struct App {
    config: Config,
    registry: Arc<Registry>,
    dedup: Arc<DedupStore>,
    engine: Arc<ScrapeEngine>,
}

impl App {
    /// Load state and build the pipeline.
    async fn open(mut config: Config, notify: Notify) -> Result<Self> {
        let db = open_database(&config)?;
        let registry = Arc::new(Registry::load(Arc::clone(&db)).await?);
        let dedup = Arc::new(DedupStore::load(db).await?);
        config.merge_record(&registry.record().await);

        let sink: Arc<dyn NotificationSink> = match notify {
            Notify::Console => Arc::new(ConsoleSink),
            Notify::Discord => Arc::new(DiscordSink::new(config.require_discord()?)?),
            Notify::PreferDiscord => match config.require_discord() {
                Ok(settings) => Arc::new(DiscordSink::new(settings)?),
                Err(e) => {
                    warn!(error = %e, "Discord not configured, printing notifications instead");
                    Arc::new(ConsoleSink)
                }
            },
        };

        let governor = Arc::new(RateGovernor::default());
        let fetcher = Arc::new(InstagramClient::new(config.instagram_settings(), governor)?);
        let engine = Arc::new(ScrapeEngine::new(
            fetcher,
            sink,
            Arc::clone(&dedup),
            Arc::new(SystemClock),
        ));

        Ok(Self {
            config,
            registry,
            dedup,
            engine,
        })
    }

    fn tracker(&self) -> Tracker {
        Tracker::new(Arc::clone(&self.registry), Arc::clone(&self.engine))
    }

    fn scheduler(&self, shutdown: watch::Receiver<bool>) -> Scheduler {
        let settings = SweepSettings {
            interval: self.config.scrape_interval,
            ..SweepSettings::default()
        };
        Scheduler::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.registry),
            settings,
            shutdown,
        )
    }
}

/// Run sweeps until Ctrl-C, taking commands from stdin meanwhile.
async fn run_daemon(app: App) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = app.scheduler(shutdown_rx);
    let tracker = Arc::new(app.tracker());
    let first_scrapes = Arc::new(FirstScrapes::new());

    tokio::spawn(read_commands(Arc::clone(&tracker), Arc::clone(&first_scrapes)));

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested, finishing the current account");
        let _ = shutdown_tx.send(true);
    });

    println!(
        "{} {} account(s), sweeping every {} min. Type !add, !remove or !list.",
        "Watching".bold(),
        app.registry.len().await,
        app.config.scrape_interval.as_secs() / 60
    );

    scheduler.run().await;

    // Let first scrapes of just-added accounts finish delivering.
    first_scrapes.drain().await;

    // Final flush so nothing recorded in memory is lost.
    if let Err(e) = app.registry.persist().await {
        error!(error = %e, "Failed to persist registry on shutdown");
    }
    if let Err(e) = app.dedup.persist().await {
        error!(error = %e, "Failed to persist dedup state on shutdown");
    }
    info!("State persisted, exiting");
    Ok(())
}

/// Handle `!add`, `!remove` and `!list` lines from stdin.
async fn read_commands(tracker: Arc<Tracker>, first_scrapes: Arc<FirstScrapes>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read command input");
                break;
            }
        };

        let Some((reply, pending)) = tracker.handle_line(&line).await else {
            continue;
        };
        println!("{reply}");

        // The reply goes out first; the first scrape runs alongside sweeps.
        if let Some(pending) = pending {
            first_scrapes.start(Arc::clone(&tracker), pending).await;
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Couldn't install SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Couldn't listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Select the persistence backend based on configuration.
fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    match config.backend {
        Backend::Json => {
            if let Some(dir) = config.state_path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir).with_context(|| {
                        format!("Failed to create state directory {}", dir.display())
                    })?;
                }
            }
            Ok(instawatch::db::open_json(
                &config.registry_path,
                &config.state_path,
            ))
        }
        Backend::Sqlite => {
            info!("Using SQLite backend");
            instawatch::db::open_sqlite(&config.db_path.to_string_lossy())
        }
    }
}
