use gpu_console_core::SystemClock;
use gpu_console_server::{AppState, config::ServerConfig, router};
use gpu_console_session::{
    AuthSessionManager, FileBackend, HttpIdentityProvider, HttpProfileProvider, MemoryBackend,
    StorageBackend, TokenStore,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let backend: Arc<dyn StorageBackend> = match &config.session.storage_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "persisting session on disk");
            Arc::new(FileBackend::new(dir))
        }
        None => Arc::new(MemoryBackend::new()),
    };
    let store = Arc::new(TokenStore::new(backend, Arc::new(SystemClock)));

    let identity =
        HttpIdentityProvider::new(config.identity.clone()).expect("failed to create identity client");
    let profiles =
        HttpProfileProvider::new(&config.identity).expect("failed to create profile client");
    let manager = Arc::new(AuthSessionManager::new(
        config.identity,
        config.session,
        Arc::new(identity),
        Arc::new(profiles),
        store,
    ));

    match manager.restore() {
        Ok(snapshot) => tracing::info!(state = %snapshot.state, "session restored"),
        Err(e) => tracing::warn!(error = %e, "Failed to restore session; starting anonymous"),
    }

    let app = router(Arc::new(AppState::new(manager)));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .expect("server error");
}
