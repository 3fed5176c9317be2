use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rep_vision::{
    FormChecks, FramePipeline, FrameReport, HistoryStore, JsonFileHistoryStore, MemoryHistoryStore,
    PipelineConfig, Side, TrackedSide, WorkerPool,
};
use tokio::sync::{broadcast, watch};

#[cfg(feature = "web")]
pub mod routes;

/// Fan-out of per-frame reports to live feedback subscribers.
#[derive(Clone)]
pub struct FeedbackBus {
    pub reports_tx: broadcast::Sender<FrameReport>,
}

impl FeedbackBus {
    pub fn new(capacity: usize) -> Self {
        let (reports_tx, _) = broadcast::channel::<FrameReport>(capacity.max(1));
        Self { reports_tx }
    }

    /// Publishes a report. Having no subscribers is not an error.
    pub fn publish(&self, report: &FrameReport) {
        let _ = self.reports_tx.send(report.clone());
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// JSON history file. In-memory history when unset.
    pub history_path: Option<PathBuf>,
    /// Inactive sessions untouched this long are dropped.
    pub idle_evict: Duration,
    pub feedback_capacity: usize,
    pub workers: usize,
    pub pipeline: PipelineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            history_path: None,
            idle_evict: Duration::from_secs(30 * 60),
            feedback_capacity: 16,
            workers: num_cpus::get(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `RV_*` variables fetched through `lookup`. Unset
    /// or empty variables keep their defaults; unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(bind) = get("RV_BIND") {
            cfg.bind_addr = bind;
        }
        if let Some(path) = get("RV_HISTORY_PATH") {
            cfg.history_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = get("RV_IDLE_EVICT_SECS") {
            let secs: u64 = secs.trim().parse().with_context(|| format!("RV_IDLE_EVICT_SECS={secs}"))?;
            cfg.idle_evict = Duration::from_secs(secs);
        }
        if let Some(cap) = get("RV_FEEDBACK_CAPACITY") {
            cfg.feedback_capacity = cap.trim().parse().with_context(|| format!("RV_FEEDBACK_CAPACITY={cap}"))?;
        }
        if let Some(workers) = get("RV_WORKERS") {
            cfg.workers = workers.trim().parse().with_context(|| format!("RV_WORKERS={workers}"))?;
        }
        if let Some(side) = get("RV_TRACKED_SIDE") {
            let side: Side = side.parse().context("RV_TRACKED_SIDE")?;
            cfg.pipeline.tracked_side = TrackedSide(side);
        }
        if let Some(checks) = get("RV_FORM_CHECKS") {
            cfg.pipeline.form_checks =
                checks.parse::<FormChecks>().context("RV_FORM_CHECKS")?;
        }
        Ok(cfg)
    }

    pub fn open_history(&self) -> anyhow::Result<Arc<dyn HistoryStore>> {
        Ok(match &self.history_path {
            Some(path) => Arc::new(
                JsonFileHistoryStore::open(path)
                    .with_context(|| format!("opening history store {}", path.display()))?,
            ),
            None => Arc::new(MemoryHistoryStore::new()),
        })
    }
}

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub store: Arc<dyn HistoryStore>,
    pub bus: FeedbackBus,
}

impl AppState {
    /// Must be called inside a tokio runtime; spawns the frame workers.
    pub fn new(cfg: &ServerConfig, store: Arc<dyn HistoryStore>) -> Self {
        let pipeline = Arc::new(FramePipeline::new(cfg.pipeline));
        Self {
            pool: Arc::new(WorkerPool::new(pipeline, cfg.workers)),
            store,
            bus: FeedbackBus::new(cfg.feedback_capacity),
        }
    }
}

#[derive(Clone)]
pub struct ControlHandle {
    pub shutdown_tx: watch::Sender<bool>,
}

impl ControlHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (Self { shutdown_tx }, shutdown_rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Drops idle sessions every `every` until shutdown is signalled.
pub fn spawn_evictor(
    state: AppState,
    max_idle: Duration,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // A dropped control handle means nobody can ask us to stop anymore.
        let mut control_open = true;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = state.pool.pipeline().evict_idle(max_idle);
                    if removed > 0 {
                        tracing::info!(removed, "evicted idle sessions");
                    }
                }
                changed = shutdown_rx.changed(), if control_open => {
                    if changed.is_err() {
                        control_open = false;
                    } else if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(feature = "web")]
pub async fn start_server(
    state: AppState,
    cfg: ServerConfig,
    control: ControlHandle,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    let local_addr = listener.local_addr().context("reading bound address")?;

    let evict_every = (cfg.idle_evict / 4).max(Duration::from_secs(1));
    let evictor = spawn_evictor(
        state.clone(),
        cfg.idle_evict,
        evict_every,
        control.shutdown_tx.subscribe(),
    );

    let app = routes::build_router(state);
    let mut shutdown_rx = control.shutdown_tx.subscribe();

    let server = tokio::spawn(async move {
        tracing::info!(%local_addr, "rep vision server listening");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
        let _ = evictor.await;
    });

    Ok((local_addr, server))
}

#[cfg(not(feature = "web"))]
pub async fn start_server(
    _state: AppState,
    _cfg: ServerConfig,
    _control: ControlHandle,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    Err(anyhow::anyhow!("web feature not enabled for rep_vision_server"))
}
