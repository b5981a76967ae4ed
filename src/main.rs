use anyhow::Context;
use clap::Parser;
use print_export::{AppState, ExportService, FontLibrary, PerfJournal, ProfileStore, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::parse();
    let addr = config.bind_addr()?;

    let profiles = ProfileStore::load(&config.profiles_dir).with_context(|| {
        format!("failed to load color profiles from {}", config.profiles_dir.display())
    })?;
    let fonts = FontLibrary::load(config.fonts_dir.as_deref(), !config.no_system_fonts);
    let journal = match &config.perf_log {
        Some(path) => Some(
            PerfJournal::open(path)
                .with_context(|| format!("failed to open perf log {}", path.display()))?,
        ),
        None => None,
    };

    let service = ExportService::new(profiles, fonts).with_perf_journal(journal);
    let app = print_export::router(AppState { service }, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        address = %listener.local_addr()?,
        version = env!("CARGO_PKG_VERSION"),
        max_upload_bytes = config.max_upload_bytes,
        "print export server listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
