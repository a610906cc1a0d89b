//! Series tracker binary entrypoint wiring the webhook, admin, SSE and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use series_tracker::{
    clients::{
        identity::HttpIdentityProvider,
        message_sink::{FanoutSink, FeedSink, HttpRelaySink, MessageSink},
        stats_provider::HttpStatsProvider,
    },
    config::AppConfig,
    dao::{
        kv_store::{KeyValueStore, MemoryStore},
        tracker_repository::TrackerRepository,
    },
    routes,
    services::{
        credential_cache::CredentialCache, rate_limiter::CallRateLimiter,
        series_tracker::TrackerDeps, stats_gateway::StatsGateway, storage_supervisor,
        tracker_registry::TrackerRegistry,
    },
    state::{AccessSecrets, AppState, FEED_CAPACITY, SharedState, SseHub},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = connect_store().await?;

    let credentials = CredentialCache::new(
        Arc::new(HttpIdentityProvider::from_env().context("configuring identity provider")?),
        store.clone(),
        &config.credentials,
    );
    let gateway = StatsGateway::new(
        Arc::new(HttpStatsProvider::from_env().context("configuring stats provider")?),
        credentials,
        Arc::new(CallRateLimiter::new(&config.rate_limit)),
    );

    let feed = SseHub::new(FEED_CAPACITY);
    let mut sinks: Vec<Arc<dyn MessageSink>> = vec![Arc::new(FeedSink::new(feed.clone()))];
    if let Some(relay) = HttpRelaySink::from_env().context("configuring message relay")? {
        info!("relaying series messages over HTTP");
        sinks.push(Arc::new(relay));
    }

    let registry = TrackerRegistry::new(TrackerDeps {
        gateway,
        repository: TrackerRepository::new(store.clone(), config.tracker.archive_ttl),
        sink: Arc::new(FanoutSink::new(sinks)),
        config: config.tracker.clone(),
    });

    let app_state = AppState::new(registry, store, feed, secrets_from_env()?);

    if let Err(err) = app_state.registry().restore().await {
        warn!(error = %err, "could not restore persisted trackers");
    }

    tokio::spawn(storage_supervisor::run(app_state.clone()));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the storage backend from the environment: CouchDB, then MongoDB, else in memory.
async fn connect_store() -> anyhow::Result<Arc<dyn KeyValueStore>> {
    #[cfg(feature = "couch-store")]
    if env::var_os("COUCH_BASE_URL").is_some() {
        use series_tracker::dao::kv_store::couchdb::{CouchConfig, CouchKvStore};

        let config = CouchConfig::from_env().context("reading CouchDB configuration")?;
        let store = CouchKvStore::connect(config)
            .await
            .context("connecting to CouchDB")?;
        info!("using CouchDB storage");
        return Ok(Arc::new(store));
    }

    #[cfg(feature = "mongo-store")]
    if env::var_os("MONGO_URI").is_some() {
        use series_tracker::dao::kv_store::mongodb::{MongoConfig, MongoKvStore};

        let config = MongoConfig::from_env()
            .await
            .context("reading MongoDB configuration")?;
        let store = MongoKvStore::connect(config)
            .await
            .context("connecting to MongoDB")?;
        info!("using MongoDB storage");
        return Ok(Arc::new(store));
    }

    warn!("no storage backend configured; trackers will not survive a restart");
    Ok(Arc::new(MemoryStore::new()))
}

fn secrets_from_env() -> anyhow::Result<AccessSecrets> {
    let read = |var: &str| {
        env::var(var)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .with_context(|| format!("missing environment variable `{var}`"))
    };
    Ok(AccessSecrets {
        webhook_secret: read("WEBHOOK_SECRET")?,
        admin_token: read("ADMIN_TOKEN")?,
    })
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
