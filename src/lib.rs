pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::{BootstrapResult, bootstrap_workspace};
use application::controller::TimerController;
use application::gateway::{PersistenceGateway, RetryPolicy};
use application::host::Host;
use application::recovery::recover;
use application::session_clock::SessionServices;
use application::tasks::TaskRegistry;
use chrono::{Duration as ChronoDuration, NaiveDate};
use clap::{Parser, Subcommand};
use infrastructure::clock::{Clock, SystemClock};
use infrastructure::command_log::CommandLog;
use infrastructure::credential_store::{KeyringTokenStore, RemoteTokenStore};
use infrastructure::error::InfraError;
use infrastructure::events::ChannelEventSink;
use infrastructure::local_cache::SqliteLocalCache;
use infrastructure::remote_store::ReqwestRemoteStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use application::controller::ClockCommand;
pub use application::session_clock::{ClockSnapshot, CommandOutcome, SessionClock};
pub use domain::models::{SessionMode, SessionPhase, StudyDayRecord};

#[derive(Parser)]
#[command(name = "studyclock")]
#[command(about = "Reload-safe study timer with a per-day study ledger", long_about = None)]
struct Cli {
    /// Workspace directory holding config/, state/ and logs/. Defaults to the current directory.
    #[arg(short, long)]
    workspace: Option<PathBuf>,
    /// Keep every write on this device even if a remote store is configured.
    #[arg(long)]
    no_remote: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the remote store bearer token in the OS credential store
    SetToken { token: String },
    /// Remove the stored remote store token
    ClearToken,
    /// Print a ledger summary for an inclusive date range
    Summary {
        /// First day (YYYY-MM-DD). Defaults to six days before --to.
        #[arg(long)]
        from: Option<String>,
        /// Last day (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        to: Option<String>,
    },
}

pub fn run() -> Result<(), InfraError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let workspace_root = match cli.workspace.clone() {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let bootstrap = bootstrap_workspace(&workspace_root)?;
    log::info!(
        "workspace {} (database {})",
        bootstrap.workspace_root.display(),
        bootstrap.database_path.display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(cli, bootstrap))
}

async fn run_async(cli: Cli, bootstrap: BootstrapResult) -> Result<(), InfraError> {
    let config = &bootstrap.config;
    let namespace = config.namespace();
    let token_store = KeyringTokenStore::for_identity(&namespace);

    match &cli.command {
        Some(Commands::SetToken { token }) => {
            token_store.save_token(token)?;
            println!("remote token stored for identity {namespace}");
            return Ok(());
        }
        Some(Commands::ClearToken) => {
            token_store.delete_token()?;
            println!("remote token removed for identity {namespace}");
            return Ok(());
        }
        _ => {}
    }

    let zone = config.zone()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let local = Arc::new(SqliteLocalCache::new(&bootstrap.database_path));
    let gateway = if config.remote.enabled && !cli.no_remote {
        let token = token_store.load_token().unwrap_or_else(|error| {
            log::warn!("remote token unavailable: {error}");
            None
        });
        let base_url = config.remote.base_url.as_deref().unwrap_or_default();
        let timeout = Duration::from_millis(config.remote.timeout_ms);
        let store = ReqwestRemoteStore::new(base_url, token, timeout, clock.clone())?;
        log::info!("remote store enabled at {base_url}");
        PersistenceGateway::with_remote(
            namespace.clone(),
            local,
            Arc::new(store),
            RetryPolicy {
                max_attempts: config.remote.max_attempts,
                base_delay_ms: config.remote.base_delay_ms,
            },
            timeout,
        )
    } else {
        PersistenceGateway::local_only(namespace.clone(), local)
    };
    let gateway = Arc::new(gateway);

    let (event_sender, event_receiver) = tokio::sync::mpsc::unbounded_channel();
    let tasks = Arc::new(TaskRegistry::new(gateway.clone(), clock.clone(), zone));
    let services = SessionServices {
        gateway: gateway.clone(),
        clock: clock.clone(),
        zone,
        events: Arc::new(ChannelEventSink::new(event_sender)),
        tasks: tasks.clone(),
        command_log: Arc::new(CommandLog::in_dir(&bootstrap.logs_dir, clock.clone())),
    };

    let known_tasks = tasks.refresh().await;
    log::info!("{} tasks in registry", known_tasks.len());

    let (session, outcome) = recover(services).await;
    log::info!("recovery: {outcome:?}");

    if let Some(Commands::Summary { from, to }) = cli.command {
        let end = match to {
            Some(value) => parse_date(&value)?,
            None => zone.date_of(clock.now_ms()),
        };
        let start = match from {
            Some(value) => parse_date(&value)?,
            None => end - ChronoDuration::days(6),
        };
        let summary = session.ledger().summary(start, end)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        gateway.flush_remote().await;
        return Ok(());
    }

    let controller = TimerController::new(
        session,
        Duration::from_millis(config.tick_interval_ms),
        Duration::from_millis(config.break_tick_interval_ms),
    );
    controller.resume_tickers().await;

    let host = Host::new(controller, tasks, clock);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    host.run(stdin, &mut stdout, event_receiver).await?;

    if tokio::time::timeout(Duration::from_secs(5), gateway.flush_remote())
        .await
        .is_err()
    {
        log::warn!("remote writes still pending at exit: {:?}", gateway.pending_remote_keys());
    }
    Ok(())
}

fn parse_date(value: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| InfraError::InvalidConfig(format!("invalid date '{value}', expected YYYY-MM-DD")))
}
