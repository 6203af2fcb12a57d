//! Process wiring: settings, store, credentials, then the four tasks
//! (poll, ingest, refresh, HTTP) under one cancellation token.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use gains_broker::{BrokerClient, CredentialCell, RefreshTrigger, TokenClient, TokenPair};
use gains_config::{ConfigStore, ServiceSettings};
use gains_db::{LedgerStore, PgLedgerStore};
use gains_runtime::{
    memory_feed, run_ingest_loop, AccountGate, Ingestor, MatchRun, PollLoop, PollWindows,
    RefreshLoop, RetryPolicy, RuntimeMetrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

use crate::bootstrap::{initialize_credentials, resolve_account, stdin_is_interactive};
use crate::routes;
use crate::state::AppState;

pub async fn run_service(config_path: &Path) -> Result<()> {
    let settings = ServiceSettings::from_env().context("invalid service settings")?;
    let fingerprint = settings.fingerprint()?;
    info!(config_fingerprint = %fingerprint, ?settings, "settings loaded");

    let config = Arc::new(ConfigStore::open(config_path)?);
    let app_config = config.snapshot();

    let db_url = settings.resolve_database_url(&app_config)?;
    let pool = gains_db::connect(&db_url, settings.request_timeout).await?;
    gains_db::migrate(&pool).await?;
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));

    let cell = CredentialCell::new(TokenPair::new(
        app_config.bearer_token.clone(),
        app_config.refresh_token.clone(),
    ));
    let broker = BrokerClient::new(
        settings.broker_base_url.clone(),
        settings.request_timeout,
        cell.clone(),
    )?;
    let tokens = Arc::new(TokenClient::new(
        settings.oauth_base_url.clone(),
        app_config.app_key.clone(),
        app_config.app_secret.clone(),
        settings.redirect_uri.clone(),
        settings.request_timeout,
    )?);

    let account = initialize_credentials(
        &broker,
        &tokens,
        &cell,
        &*config,
        stdin_is_interactive(),
    )
    .await?;
    let account_id = resolve_account(store.as_ref(), &account).await?;

    let metrics = Arc::new(RuntimeMetrics::new());
    let ingestor = Ingestor::new(
        store.clone(),
        Arc::new(AccountGate::new()),
        RetryPolicy::from_settings(&settings),
        metrics.clone(),
    );

    // Recovers a crash between insert and match.
    match ingestor.reconcile_account(account_id).await? {
        MatchRun::Applied { lots, net_change } => {
            info!(account_id, lots, "startup reconciliation applied: {}", net_change)
        }
        MatchRun::NothingToMatch => info!(account_id, "startup reconciliation: nothing to match"),
    }

    let cancel = CancellationToken::new();
    let trigger = RefreshTrigger::new();
    let (producer, mut consumer) = memory_feed(settings.feed_capacity);

    let poll = PollLoop {
        source: Arc::new(broker),
        producer: Arc::new(producer),
        account_hash: account.hash_value.clone(),
        windows: PollWindows::from_settings(&settings),
        trigger: trigger.clone(),
        metrics: metrics.clone(),
    };
    let poll_task = tokio::spawn(poll.run(cancel.clone()));

    let refresh = RefreshLoop {
        refresher: tokens,
        sink: config,
        cell,
        trigger,
        interval: settings.refresh_interval,
        metrics: metrics.clone(),
    };
    let refresh_task = tokio::spawn(refresh.run(cancel.clone()));

    let ingest_cancel = cancel.clone();
    let mut ingest_task = tokio::spawn(async move {
        run_ingest_loop(&ingestor, &mut consumer, ingest_cancel).await
    });

    let state = Arc::new(AppState::new(account_id, fingerprint, store, metrics));
    let app = routes::build_router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );
    let listener = tokio::net::TcpListener::bind(settings.daemon_addr)
        .await
        .with_context(|| format!("bind {}", settings.daemon_addr))?;
    info!("gains-daemon listening on http://{}", settings.daemon_addr);
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_cancel.cancelled_owned())
            .await
    });

    // The ingest loop only ends early on a fatal error or a closed feed.
    let ingest_result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("interrupt received; shutting down");
            None
        }
        r = &mut ingest_task => Some(r),
    };
    cancel.cancel();

    let ingest_result = match ingest_result {
        Some(r) => r,
        None => ingest_task.await,
    }
    .context("ingest task panicked")?;

    match poll_task.await.context("poll task panicked")? {
        Ok(()) => {}
        Err(e) => warn!(error = %format!("{e:#}"), "poll loop ended with error"),
    }
    refresh_task.await.context("refresh task panicked")?;
    if let Err(e) = server_task.await.context("http task panicked")? {
        warn!(error = %e, "http server ended with error");
    }

    if let Err(e) = ingest_result {
        error!(error = %format!("{e:#}"), "ingest loop failed");
        return Err(e.context("ingest loop terminated"));
    }
    info!("shutdown complete");
    Ok(())
}
