use anyhow::Result;
use std::{fs, io::ErrorKind};
use syft_objects::{config, services::object_service::ObjectService};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::AppConfig::from_env_and_args()?;
    tracing::info!("Starting syft-objects with config: {:?}", cfg);

    // --- Ensure datasites directory exists ---
    if !cfg.datasites_dir.exists() {
        fs::create_dir_all(&cfg.datasites_dir)?;
        tracing::info!("Created datasites directory at {}", cfg.datasites_dir.display());
    }

    let service = ObjectService::new(cfg.datasites_dir.clone(), cfg.user_email.clone());
    let app = syft_objects::app(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
