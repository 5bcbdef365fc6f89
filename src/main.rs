// Hangar board entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open database
// 4. Build the roster cache and its HTTP source
// 5. Build the presence reconciler
// 6. Create mpsc channels
// 7. Spawn the application loop task
// 8. Wait for Ctrl+C
// 9. Cleanup on exit

use hangar_board::app;
use hangar_board::config;
use hangar_board::db;
use hangar_board::host;
use hangar_board::presence;
use hangar_board::roster;
use hangar_board::scrape;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (log to file)
    init_tracing()?;
    info!("Hangar board starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} monitored spaces, {} affiliations, refresh every {}h",
        config.board.monitored_spaces.len(),
        config.affiliations.len(),
        config.board.refresh_interval_hours
    );

    // 3. Open database
    let database = Arc::new(
        db::Database::open(&config.board.db_path).context("failed to open database")?,
    );
    info!("Database opened at {}", config.board.db_path);
    match database.active_period()? {
        Some(period) => info!("Active period: BR {} until {}", period.br_band, period.end),
        None => warn!("No period is currently active"),
    }

    // 4. Build the roster cache and its HTTP source
    let source = Arc::new(
        scrape::HttpRosterSource::new().context("failed to build roster source")?,
    );
    let roster_cache = Arc::new(roster::RosterCache::new(
        Arc::clone(&database),
        source,
        config.affiliations.clone(),
        config.board.platform_suffixes.clone(),
    ));

    // 5. Build the presence reconciler. The logging host stands in until a
    // platform gateway adapter is wired up.
    let host: Arc<dyn host::PresenceHost> = Arc::new(host::LoggingHost::new());
    let reconciler = Arc::new(presence::PresenceReconciler::new(
        Arc::clone(&database),
        host,
        Arc::clone(&roster_cache),
        config.board.monitored_spaces.iter().cloned(),
        config.board.board_space.clone(),
    ));

    // 6. Create mpsc channels
    let (event_tx, event_rx) = mpsc::channel(256);
    let (reply_tx, mut reply_rx) = mpsc::channel(256);

    // 7. Spawn the application loop task
    let refresh_interval = Duration::from_secs(config.board.refresh_interval_hours * 3600);
    let app_state = app::App::new(
        database,
        roster_cache,
        reconciler,
        config.board.offer_limit,
        refresh_interval,
        reply_tx,
    );
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app_state.run(event_rx).await {
            error!("Application loop error: {e:#}");
        }
    });

    // Replies go back to the gateway adapter; with the logging host they
    // are just logged.
    let reply_handle = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            info!("outbound reply: {reply:?}");
        }
    });

    // Prime the loop as if the gateway just connected.
    event_tx
        .send(app::HostEvent::Ready)
        .await
        .context("application loop exited before startup")?;

    // 8. Wait for Ctrl+C
    info!("Application ready");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    // 9. Cleanup: closing the event channel ends the loop.
    drop(event_tx);
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = app_handle.await;
    })
    .await;
    reply_handle.abort();

    info!("Hangar board shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("hangar-board.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hangar_board=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
