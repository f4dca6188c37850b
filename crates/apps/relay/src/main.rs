//! Relay - outbound email worker
//!
//! Opens the outbox database and retries failed emails on a fixed interval.
//! Requests to send are accepted by the host application through
//! `outbox::EmailService`; this process keeps the retry pipeline running.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use outbox::{
    EmailService, GmailClient, GmailCredentials, GmailTransport, HandlebarsRenderer,
    OutboxSettings, RetryScheduler, SqliteOutboxStore, ThreadDispatcher,
};

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "Outbound email worker")]
struct Args {
    /// Run a single retry pass and exit
    #[arg(long)]
    once: bool,

    /// Path to the outbox database
    #[arg(long, env = "RELAY_DATABASE_PATH")]
    database: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Args::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    // Bootstrap config and data directories
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let mut settings = OutboxSettings::load().context("Failed to load settings")?;
    if let Some(database) = args.database {
        settings.database_path = database;
    }

    let credentials = GmailCredentials::load().context("Gmail OAuth client credentials not found")?;

    if let Some(parent) = settings.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = Arc::new(SqliteOutboxStore::new(&settings.database_path)?);
    info!("Using outbox database at {}", settings.database_path.display());

    let api = Arc::new(GmailClient::new(credentials, settings.http_timeout));
    let transport = GmailTransport::new(api, store.clone(), settings.label_settle_delay);
    let renderer = Arc::new(HandlebarsRenderer::new(settings.templates_dir.clone()));

    let service = EmailService::new(
        store.clone(),
        store,
        transport,
        renderer,
        Arc::new(ThreadDispatcher),
        settings,
    )?;

    let retry_interval = service.settings().retry_interval;
    let scheduler = RetryScheduler::new(service, retry_interval);

    if args.once {
        let stats = scheduler.run_once();
        info!("Done: {} sent, {} still failed", stats.sent, stats.failed);
        return Ok(());
    }

    scheduler.start()?.wait();
    Ok(())
}
