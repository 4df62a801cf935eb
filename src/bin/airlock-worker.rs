//! In-sandbox worker server.
//!
//! Runs inside the worker container and executes one script at a time on
//! behalf of the pool: `POST /run` starts a script, `POST /resume` unblocks
//! a suspended `llm.complete`, `POST /abort` reclaims a suspended execution,
//! `GET /health` reports liveness. The script itself runs in a child
//! interpreter driven by the shim runner; this server only translates
//! between HTTP and script steps.

#[cfg(unix)]
mod worker {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use clap::Parser;
    use tokio::sync::Mutex;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    use airlock::shim::protocol::{
        AbortRequest, ResumeRequest, RunRequest, RunResponse, RunStatus,
    };
    use airlock::shim::{ScriptRun, ScriptStep};

    #[derive(Parser, Debug)]
    #[command(name = "airlock-worker")]
    #[command(about = "Airlock sandbox worker")]
    struct Args {
        /// Listen port (overrides AIRLOCK_WORKER_LISTEN_PORT)
        #[arg(long)]
        port: Option<u16>,
    }

    /// A script parked at `llm.complete`, waiting for `/resume`.
    struct SuspendedScript {
        token: String,
        run: ScriptRun,
        /// Original budget, kept for the timeout error message.
        timeout: Duration,
    }

    #[derive(Default)]
    struct WorkerSlot {
        busy: bool,
        suspended: Option<SuspendedScript>,
    }

    #[derive(Clone, Default)]
    struct WorkerState {
        slot: Arc<Mutex<WorkerSlot>>,
    }

    fn error_response(status: StatusCode, detail: &str) -> (StatusCode, Json<serde_json::Value>) {
        (status, Json(serde_json::json!({ "detail": detail })))
    }

    fn terminal(status: RunStatus, result: Option<serde_json::Value>, stdout: String, stderr: String, error: Option<String>) -> RunResponse {
        RunResponse {
            status,
            result,
            stdout,
            stderr,
            error,
            prompt: None,
            model: None,
            token: None,
        }
    }

    /// Drive a run until it suspends or terminates, parking it in the slot
    /// when suspended.
    async fn drive(state: &WorkerState, mut run: ScriptRun, timeout: Duration) -> RunResponse {
        match run.run_until_event().await {
            ScriptStep::Suspended { prompt, model } => {
                let token = uuid::Uuid::new_v4().simple().to_string();
                let mut slot = state.slot.lock().await;
                slot.suspended = Some(SuspendedScript {
                    token: token.clone(),
                    run,
                    timeout,
                });
                RunResponse {
                    status: RunStatus::Suspended,
                    result: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    error: None,
                    prompt: Some(prompt),
                    model: Some(model),
                    token: Some(token),
                }
            }
            ScriptStep::Completed { result } => {
                let (stdout, stderr) = run.collect_output().await;
                release(state).await;
                terminal(RunStatus::Completed, result, stdout, stderr, None)
            }
            ScriptStep::Failed { error } => {
                let (stdout, stderr) = run.collect_output().await;
                release(state).await;
                terminal(RunStatus::Error, None, stdout, stderr, Some(error))
            }
            ScriptStep::TimedOut => {
                let (stdout, stderr) = run.collect_output().await;
                release(state).await;
                terminal(
                    RunStatus::Timeout,
                    None,
                    stdout,
                    stderr,
                    Some(format!("Script exceeded {}s timeout", timeout.as_secs())),
                )
            }
        }
    }

    async fn release(state: &WorkerState) {
        let mut slot = state.slot.lock().await;
        slot.busy = false;
        slot.suspended = None;
    }

    async fn health() -> Json<serde_json::Value> {
        Json(serde_json::json!({ "status": "ok" }))
    }

    async fn run_script(
        State(state): State<WorkerState>,
        Json(request): Json<RunRequest>,
    ) -> Result<Json<RunResponse>, (StatusCode, Json<serde_json::Value>)> {
        {
            let mut slot = state.slot.lock().await;
            if slot.busy {
                return Err(error_response(
                    StatusCode::CONFLICT,
                    "worker is already executing a script",
                ));
            }
            slot.busy = true;
        }

        let timeout = Duration::from_secs(request.timeout.max(1));
        let run = match ScriptRun::spawn(&request.script, &request.settings, timeout).await {
            Ok(run) => run,
            Err(e) => {
                release(&state).await;
                tracing::error!(error = %e, "Failed to start script");
                return Ok(Json(terminal(
                    RunStatus::Error,
                    None,
                    String::new(),
                    String::new(),
                    Some(e.to_string()),
                )));
            }
        };

        Ok(Json(drive(&state, run, timeout).await))
    }

    async fn resume_script(
        State(state): State<WorkerState>,
        Json(request): Json<ResumeRequest>,
    ) -> Result<Json<RunResponse>, (StatusCode, Json<serde_json::Value>)> {
        let mut suspended = {
            let mut slot = state.slot.lock().await;
            match slot.suspended.take() {
                Some(s) if s.token == request.token => s,
                Some(other) => {
                    // Wrong token: put it back untouched.
                    slot.suspended = Some(other);
                    return Err(error_response(
                        StatusCode::CONFLICT,
                        "unknown resume token",
                    ));
                }
                None => {
                    return Err(error_response(
                        StatusCode::CONFLICT,
                        "no suspended execution",
                    ));
                }
            }
        };

        if let Err(e) = suspended.run.provide_llm_response(&request.response).await {
            tracing::error!(error = %e, "Failed to deliver LLM response to script");
            let (stdout, stderr) = suspended.run.collect_output().await;
            release(&state).await;
            return Ok(Json(terminal(
                RunStatus::Error,
                None,
                stdout,
                stderr,
                Some("failed to deliver LLM response to script".to_string()),
            )));
        }

        Ok(Json(drive(&state, suspended.run, suspended.timeout).await))
    }

    async fn abort_script(
        State(state): State<WorkerState>,
        Json(request): Json<AbortRequest>,
    ) -> Result<Json<RunResponse>, (StatusCode, Json<serde_json::Value>)> {
        let mut suspended = {
            let mut slot = state.slot.lock().await;
            match slot.suspended.take() {
                Some(s) if s.token == request.token => s,
                Some(other) => {
                    slot.suspended = Some(other);
                    return Err(error_response(
                        StatusCode::CONFLICT,
                        "unknown resume token",
                    ));
                }
                None => {
                    return Err(error_response(
                        StatusCode::CONFLICT,
                        "no suspended execution",
                    ));
                }
            }
        };

        suspended.run.kill().await;
        let (stdout, stderr) = suspended.run.collect_output().await;
        release(&state).await;
        Ok(Json(terminal(
            RunStatus::Error,
            None,
            stdout,
            stderr,
            Some("execution aborted".to_string()),
        )))
    }

    pub fn router(state: WorkerState) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/run", post(run_script))
            .route("/resume", post(resume_script))
            .route("/abort", post(abort_script))
            .with_state(state)
    }

    pub async fn main() -> anyhow::Result<()> {
        let args = Args::parse();

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("airlock_worker=info,airlock=info"));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();

        let port = args
            .port
            .or_else(|| {
                std::env::var("AIRLOCK_WORKER_LISTEN_PORT")
                    .ok()
                    .and_then(|raw| raw.parse().ok())
            })
            .unwrap_or(8001);

        let state = WorkerState::default();
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Airlock worker listening on {addr}");

        axum::serve(listener, router(state)).await?;
        Ok(())
    }
}

#[cfg(unix)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    worker::main().await
}

#[cfg(not(unix))]
fn main() {
    eprintln!("airlock-worker requires a Unix platform");
    std::process::exit(1);
}
