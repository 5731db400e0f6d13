//! Trivia Duel Back binary entrypoint wiring REST, SSE, the match store and the notification outbox.

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trivia_duel_back::{
    config::AppConfig,
    dao::{
        match_store::{MatchStore, memory::MemoryMatchStore},
        storage::StorageError,
    },
    routes,
    services::{notifier, question_service, storage_supervisor},
    state::{AppState, SharedState},
};

const SEED_PATH_ENV: &str = "QUESTIONS_SEED_PATH";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::new(AppConfig::load());

    spawn_storage_supervisor(app_state.clone());
    tokio::spawn(notifier::run_dispatcher(app_state.clone()));

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

/// Install the CouchDB store when `COUCH_BASE_URL` is set, the in-memory one otherwise.
fn spawn_storage_supervisor(state: SharedState) {
    #[cfg(feature = "couch-store")]
    {
        use trivia_duel_back::dao::match_store::couchdb::{CouchConfig, CouchMatchStore};

        match CouchConfig::from_env() {
            Ok(config) => {
                info!(base_url = %config.base_url, database = %config.database, "using CouchDB match store");
                tokio::spawn(storage_supervisor::run(
                    state,
                    move || {
                        let config = config.clone();
                        async move {
                            let store = CouchMatchStore::connect(config).await?;
                            Ok::<Arc<dyn MatchStore>, StorageError>(Arc::new(store))
                        }
                    },
                    seed_questions,
                ));
                return;
            }
            Err(err) => warn!(error = %err, "CouchDB not configured; using in-memory match store"),
        }
    }

    let memory: Arc<dyn MatchStore> = Arc::new(MemoryMatchStore::new());
    tokio::spawn(storage_supervisor::run(
        state,
        move || {
            let store = memory.clone();
            async move { Ok::<_, StorageError>(store) }
        },
        seed_questions,
    ));
}

/// Load the question bank named by `QUESTIONS_SEED_PATH`, if any.
async fn seed_questions(state: SharedState) {
    let Some(path) = env::var_os(SEED_PATH_ENV).map(PathBuf::from) else {
        return;
    };
    match question_service::import_seed_file(&state, &path).await {
        Ok(count) => info!(count, path = %path.display(), "question bank seeded"),
        Err(err) => warn!(error = %err, path = %path.display(), "failed to seed question bank"),
    }
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

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
