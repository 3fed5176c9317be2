use rep_vision_server::{start_server, AppState, ControlHandle, ServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = ServerConfig::from_env()?;
    tracing::info!(
        bind = %cfg.bind_addr,
        history = ?cfg.history_path,
        workers = cfg.workers,
        tracked_side = ?cfg.pipeline.tracked_side.0,
        form_checks = ?cfg.pipeline.form_checks,
        "starting rep vision server"
    );

    let store = cfg.open_history()?;
    let state = AppState::new(&cfg, store);
    let (control, _shutdown_rx) = ControlHandle::new();

    let (_addr, handle) = start_server(state, cfg, control.clone()).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    control.shutdown();
    handle.await.ok();
    Ok(())
}
