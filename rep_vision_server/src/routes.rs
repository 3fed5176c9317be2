use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use rep_vision::{LandmarkSet, StopOutcome, StoreError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

impl UserQuery {
    fn user(self) -> Result<String, Response> {
        match self.user_id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(message(StatusCode::BAD_REQUEST, "user_id is required")),
        }
    }
}

/// Body of `POST /frames`. `null` landmarks means the detector found nobody.
#[derive(Debug, Default, Deserialize)]
pub struct FrameRequest {
    pub landmarks: Option<Vec<[f64; 2]>>,
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(|| async { "ok" }))
        .route("/start", post(start_session))
        .route("/stop", post(stop_session))
        .route("/progress_report", post(progress_report))
        .route("/frames", post(ingest_frame))
        .route("/ws/feedback", get(feedback_socket))
        .with_state(state)
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn start_session(State(state): State<AppState>, Query(query): Query<UserQuery>) -> Response {
    let user_id = match query.user() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    state.pool.pipeline().start(&user_id);
    message(StatusCode::OK, "Started!")
}

pub async fn stop_session(State(state): State<AppState>, Query(query): Query<UserQuery>) -> Response {
    let user_id = match query.user() {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    // Persist first; a failed write leaves the session running so the user
    // can stop again without losing the set.
    let pipeline = Arc::clone(state.pool.pipeline());
    let store = state.store.clone();
    let uid = user_id.clone();
    let stopped = tokio::task::spawn_blocking(move || {
        pipeline.stop_with(&uid, |summary| store.record_session(summary).map(|_| ()))
    })
    .await;

    match stopped {
        Ok(Ok(StopOutcome::Stopped(summary))) => message(
            StatusCode::OK,
            format!("Saved! Added {} reps to your history.", summary.repetition_count),
        ),
        Ok(Ok(StopOutcome::NoActiveSession)) => message(StatusCode::OK, "No active session."),
        Ok(Err(e)) => {
            tracing::warn!(user_id = %user_id, error = %e, "could not save session");
            message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "history writer task failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, "history writer failed")
        }
    }
}

pub async fn progress_report(State(state): State<AppState>, Query(query): Query<UserQuery>) -> Response {
    let user_id = match query.user() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let store = state.store.clone();
    let uid = user_id.clone();
    let report = tokio::task::spawn_blocking(move || store.progress_report(&uid)).await;

    match report {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(e @ StoreError::UnknownUser(_))) => {
            (StatusCode::NOT_FOUND, Json(json!({ "detail": e.to_string() }))).into_response()
        }
        Ok(Err(e)) => {
            tracing::warn!(user_id = %user_id, error = %e, "progress report failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "history reader task failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, "history reader failed")
        }
    }
}

pub async fn ingest_frame(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
    Json(body): Json<FrameRequest>,
) -> Response {
    let user_id = match query.user() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let landmarks = match body.landmarks.map(LandmarkSet::try_from).transpose() {
        Ok(set) => set,
        Err(e) => return message(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };

    match state.pool.process_frame(&user_id, landmarks).await {
        Ok(report) => {
            state.bus.publish(&report);
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => message(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

pub async fn feedback_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Response {
    let user_id = match query.user() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    ws.on_upgrade(move |socket| stream_feedback(socket, state, user_id))
}

async fn stream_feedback(socket: WebSocket, state: AppState, user_id: String) {
    let mut reports = state.bus.reports_tx.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::debug!(user_id = %user_id, "feedback subscriber connected");

    loop {
        tokio::select! {
            report = reports.recv() => match report {
                Ok(report) if report.user_id == user_id => {
                    let Ok(text) = serde_json::to_string(&report) else { continue };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                // Slow viewer; skip ahead to the freshest frames.
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!(user_id = %user_id, "feedback subscriber disconnected");
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Rep Vision</title>
    <style>
        body { font-family: sans-serif; text-align: center; background: #222; color: white; }
        button { padding: 10px 20px; font-weight: bold; border: none; border-radius: 5px; margin: 5px; }
        #feedback { font-family: monospace; font-size: 18px; color: #fc0; }
    </style>
</head>
<body>
    <h1>Side Leg Raise Tracker</h1>
    <input type="text" id="userId" placeholder="User ID">
    <button onclick="connect()">Connect</button>
    <br>
    <button onclick="control('start')">START</button>
    <button onclick="control('stop')">STOP &amp; SAVE</button>
    <p id="feedback">idle</p>
    <p id="status"></p>
    <script>
        let userId = "";
        function connect() {
            userId = document.getElementById("userId").value;
            if (!userId) { alert("Please enter a User ID"); return; }
            const proto = location.protocol === "https:" ? "wss://" : "ws://";
            const ws = new WebSocket(proto + location.host + "/ws/feedback?user_id=" + encodeURIComponent(userId));
            ws.onmessage = (ev) => {
                const r = JSON.parse(ev.data);
                document.getElementById("feedback").innerText =
                    `REPS: ${r.repetition_count}  TIME: ${r.elapsed_seconds}s  ${r.feedback}`;
            };
        }
        async function control(action) {
            if (!userId) { alert("Enter User ID first"); return; }
            const resp = await fetch(`/${action}?user_id=${encodeURIComponent(userId)}`, { method: "POST" });
            const data = await resp.json();
            document.getElementById("status").innerText = data.message;
        }
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerConfig;
    use rep_vision::{
        HistoryStore, MemoryHistoryStore, ProgressReport, SessionSummary, UserRecord,
    };
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn state() -> AppState {
        state_with(Arc::new(MemoryHistoryStore::new()))
    }

    fn state_with(store: Arc<dyn HistoryStore>) -> AppState {
        let cfg = ServerConfig {
            workers: 2,
            ..ServerConfig::default()
        };
        AppState::new(&cfg, store)
    }

    /// Fails the first write, then behaves like the memory store.
    #[derive(Default)]
    struct DiskFullOnce {
        failed: AtomicBool,
        inner: MemoryHistoryStore,
    }

    impl HistoryStore for DiskFullOnce {
        fn record_session(&self, summary: &SessionSummary) -> Result<UserRecord, StoreError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Io(io::Error::other("disk full")));
            }
            self.inner.record_session(summary)
        }

        fn progress_report(&self, user_id: &str) -> Result<ProgressReport, StoreError> {
            self.inner.progress_report(user_id)
        }
    }

    fn user(id: &str) -> Query<UserQuery> {
        Query(UserQuery {
            user_id: Some(id.to_string()),
        })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("json body")
    }

    /// Right leg bent to `knee` degrees with good torso and bottom-leg form.
    fn frame(knee: f64) -> FrameRequest {
        let mut points = vec![[0.0, 0.0]; 33];
        points[11] = [0.5, 0.2];
        points[12] = [0.6, 0.2];
        points[23] = [0.5, 0.5];
        points[24] = [0.6, 0.5];
        points[25] = [0.5, 0.7];
        points[27] = [0.3, 0.7];
        points[26] = [0.6, 0.7];
        let theta = (-90.0f64 + knee).to_radians();
        points[28] = [0.6 + 0.2 * theta.cos(), 0.7 + 0.2 * theta.sin()];
        FrameRequest {
            landmarks: Some(points),
        }
    }

    #[tokio::test]
    async fn start_frames_stop_and_report() {
        let state = state();
        let resp = start_session(State(state.clone()), user("alice")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["message"], "Started!");

        for knee in [175.0, 125.0, 175.0, 125.0] {
            let resp = ingest_frame(State(state.clone()), user("alice"), Json(frame(knee))).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = stop_session(State(state.clone()), user("alice")).await;
        assert_eq!(
            body_json(resp).await["message"],
            "Saved! Added 2 reps to your history."
        );

        let resp = progress_report(State(state.clone()), user("alice")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let report: ProgressReport = serde_json::from_value(body_json(resp).await).unwrap();
        assert_eq!(report.summary.total_reps_all_time, 2);
        assert_eq!(report.history.len(), 1);
    }

    #[tokio::test]
    async fn failed_save_keeps_the_session_for_a_retry() {
        let state = state_with(Arc::new(DiskFullOnce::default()));
        start_session(State(state.clone()), user("erin")).await;
        for knee in [175.0, 125.0, 175.0, 125.0, 175.0, 125.0] {
            ingest_frame(State(state.clone()), user("erin"), Json(frame(knee))).await;
        }

        let resp = stop_session(State(state.clone()), user("erin")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let session = state.pool.pipeline().registry().snapshot("erin").expect("erin exists");
        assert!(session.is_active);
        assert_eq!(session.repetition_count, 3);

        let resp = stop_session(State(state.clone()), user("erin")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await["message"],
            "Saved! Added 3 reps to your history."
        );

        let resp = progress_report(State(state), user("erin")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let report: ProgressReport = serde_json::from_value(body_json(resp).await).unwrap();
        assert_eq!(report.summary.total_reps_all_time, 3);
        assert_eq!(report.history.len(), 1);
    }

    #[tokio::test]
    async fn stop_without_session_is_informational() {
        let state = state();
        let resp = stop_session(State(state), user("ghost")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["message"], "No active session.");
    }

    #[tokio::test]
    async fn unknown_user_report_is_not_found() {
        let resp = progress_report(State(state()), user("ghost")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(resp).await["detail"],
            "No record found for user: ghost"
        );
    }

    #[tokio::test]
    async fn missing_user_id_is_a_bad_request() {
        let resp = start_session(State(state()), Query(UserQuery::default())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn short_landmark_list_is_unprocessable() {
        let body = FrameRequest {
            landmarks: Some(vec![[0.5, 0.5]; 10]),
        };
        let resp = ingest_frame(State(state()), user("alice"), Json(body)).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn empty_frame_is_passed_through_and_published() {
        let state = state();
        let mut rx = state.bus.reports_tx.subscribe();
        let resp = ingest_frame(State(state.clone()), user("alice"), Json(FrameRequest::default())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert!(body["form"].is_null());
        assert_eq!(body["feedback"], "Press START to begin");

        let published = rx.recv().await.expect("report published");
        assert_eq!(published.user_id, "alice");
    }
}
