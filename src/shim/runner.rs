//! Child-process driver for the script shim.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use thiserror::Error;

/// Injected ahead of every user script. Defines `settings`, `llm`, and
/// `set_result` in the script namespace and speaks the JSON-line control
/// protocol over the Unix socket named by AIRLOCK_CONTROL_SOCKET.
const PRELUDE: &str = r#"
import json, os, socket, traceback

_sock = socket.socket(socket.AF_UNIX, socket.SOCK_STREAM)
_sock.connect(os.environ["AIRLOCK_CONTROL_SOCKET"])
_ctl = _sock.makefile("rw", encoding="utf-8")


def _send(msg):
    _ctl.write(json.dumps(msg) + "\n")
    _ctl.flush()


class _Settings:
    def __init__(self):
        raw = os.environ.get("AIRLOCK_SETTING_KEYS", "")
        self._keys = [k for k in raw.split(",") if k]

    def get(self, key):
        if key not in self._keys:
            return None
        return os.environ.get(key)

    def keys(self):
        return list(self._keys)


class _Llm:
    def complete(self, prompt, model="default"):
        _send({"event": "llm_request", "prompt": str(prompt), "model": str(model)})
        line = _ctl.readline()
        if not line:
            raise RuntimeError("control channel closed while awaiting LLM response")
        return json.loads(line)["response"]


class _ResultHolder:
    def __init__(self):
        self.value = None

    def set_result(self, data):
        self.value = data


settings = _Settings()
llm = _Llm()
_holder = _ResultHolder()
_ns = {"settings": settings, "llm": llm, "set_result": _holder.set_result}

try:
    with open(os.environ["AIRLOCK_SCRIPT_PATH"], "r", encoding="utf-8") as _f:
        _code = _f.read()
    exec(compile(_code, "<script>", "exec"), _ns)
except BaseException:
    _send({"event": "error", "message": traceback.format_exc()})
else:
    try:
        _send({"event": "done", "result": _holder.value})
    except (TypeError, ValueError):
        _send({"event": "error", "message": "set_result() value is not JSON-serializable"})
finally:
    _ctl.close()
    _sock.close()
"#;

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("failed to start script interpreter: {0}")]
    Spawn(String),

    #[error("script process never connected to the control socket: {0}")]
    NoHandshake(String),

    #[error("control protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One step of script progress, as seen by the worker.
#[derive(Debug)]
pub enum ScriptStep {
    /// Script reached `llm.complete` and is blocked on a response.
    Suspended { prompt: String, model: String },
    /// Script ran to the end; `result` is whatever `set_result` stored.
    Completed { result: Option<serde_json::Value> },
    /// Script raised, or the interpreter died.
    Failed { error: String },
    /// Active time exceeded the budget; the child has been killed.
    TimedOut,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ControlEvent {
    LlmRequest {
        prompt: String,
        #[serde(default = "default_model")]
        model: String,
    },
    Done {
        result: Option<serde_json::Value>,
    },
    Error {
        message: String,
    },
}

fn default_model() -> String {
    "default".to_string()
}

/// A live script execution: the python child, its control channel, and the
/// remaining active-time budget (the clock stops while suspended).
pub struct ScriptRun {
    child: Child,
    events: mpsc::Receiver<ControlEvent>,
    control_tx: tokio::net::unix::OwnedWriteHalf,
    stdout_buf: Arc<Mutex<String>>,
    stderr_buf: Arc<Mutex<String>>,
    reader_tasks: Vec<JoinHandle<()>>,
    remaining: Duration,
    _scratch: tempfile::TempDir,
}

impl ScriptRun {
    /// Write the script to a scratch file, spawn the interpreter with the
    /// settings injected as environment variables, and wait for the prelude
    /// to connect to the control socket.
    pub async fn spawn(
        script: &str,
        settings: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, ShimError> {
        let scratch = tempfile::tempdir()?;
        let script_path = scratch.path().join("script.py");
        tokio::fs::write(&script_path, script).await?;

        let socket_path = scratch.path().join("ctl.sock");
        let listener = UnixListener::bind(&socket_path)?;

        let mut keys: Vec<&str> = settings.keys().map(String::as_str).collect();
        keys.sort_unstable();

        let mut command = Command::new("python3");
        command
            .arg("-c")
            .arg(PRELUDE)
            .env("AIRLOCK_SCRIPT_PATH", &script_path)
            .env("AIRLOCK_CONTROL_SOCKET", &socket_path)
            .env("AIRLOCK_SETTING_KEYS", keys.join(","))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in settings {
            command.env(name, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ShimError::Spawn(e.to_string()))?;

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let mut reader_tasks = Vec::with_capacity(3);
        if let Some(stdout) = child.stdout.take() {
            reader_tasks.push(spawn_collector(stdout, Arc::clone(&stdout_buf)));
        }
        if let Some(stderr) = child.stderr.take() {
            reader_tasks.push(spawn_collector(stderr, Arc::clone(&stderr_buf)));
        }

        // The prelude connects before touching the user script. If it never
        // does, the interpreter itself failed; surface its stderr.
        let control = match tokio::time::timeout(Duration::from_secs(10), listener.accept()).await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(ShimError::NoHandshake(e.to_string()));
            }
            Err(_) => {
                let _ = child.kill().await;
                for task in &reader_tasks {
                    task.abort();
                }
                let stderr = stderr_buf.lock().map(|b| b.clone()).unwrap_or_default();
                return Err(ShimError::NoHandshake(stderr));
            }
        };

        let (control_rx, control_tx) = control.into_split();
        let (event_tx, events) = mpsc::channel(8);
        reader_tasks.push(spawn_event_reader(control_rx, event_tx));

        Ok(Self {
            child,
            events,
            control_tx,
            stdout_buf,
            stderr_buf,
            reader_tasks,
            remaining: timeout,
            _scratch: scratch,
        })
    }

    /// Drive the script until it suspends, finishes, fails, or exhausts its
    /// active-time budget.
    pub async fn run_until_event(&mut self) -> ScriptStep {
        let deadline = Instant::now() + self.remaining;
        tokio::select! {
            event = self.events.recv() => match event {
                Some(ControlEvent::LlmRequest { prompt, model }) => {
                    self.remaining = deadline.saturating_duration_since(Instant::now());
                    ScriptStep::Suspended { prompt, model }
                }
                Some(ControlEvent::Done { result }) => {
                    self.reap().await;
                    ScriptStep::Completed { result }
                }
                Some(ControlEvent::Error { message }) => {
                    self.reap().await;
                    ScriptStep::Failed { error: message }
                }
                // Control channel closed without a final event: the
                // interpreter died out from under us.
                None => {
                    let detail = match tokio::time::timeout(
                        Duration::from_secs(5),
                        self.child.wait(),
                    )
                    .await
                    {
                        Ok(Ok(status)) => {
                            format!("script process exited unexpectedly ({status})")
                        }
                        Ok(Err(e)) => format!("script process lost: {e}"),
                        Err(_) => {
                            self.kill().await;
                            "script process closed its control channel".to_string()
                        }
                    };
                    ScriptStep::Failed { error: detail }
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                self.kill().await;
                ScriptStep::TimedOut
            }
        }
    }

    /// Unblock a suspended `llm.complete` with the agent's response.
    pub async fn provide_llm_response(&mut self, response: &str) -> Result<(), ShimError> {
        let line = serde_json::to_string(&serde_json::json!({ "response": response }))
            .map_err(|e| ShimError::Protocol(e.to_string()))?;
        self.control_tx.write_all(line.as_bytes()).await?;
        self.control_tx.write_all(b"\n").await?;
        self.control_tx.flush().await?;
        Ok(())
    }

    /// Kill the child and stop the clock. Used for aborts and timeouts.
    pub async fn kill(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }

    /// Collect everything the script wrote to stdout/stderr. Call after a
    /// terminal step so the pipe readers have drained.
    pub async fn collect_output(&mut self) -> (String, String) {
        for task in self.reader_tasks.drain(..) {
            let _ = task.await;
        }
        let stdout = self.stdout_buf.lock().map(|b| b.clone()).unwrap_or_default();
        let stderr = self.stderr_buf.lock().map(|b| b.clone()).unwrap_or_default();
        (stdout, stderr)
    }

    async fn reap(&mut self) {
        // Give the interpreter a moment to exit cleanly, then force it.
        if tokio::time::timeout(Duration::from_secs(5), self.child.wait())
            .await
            .is_err()
        {
            self.kill().await;
        }
    }
}

fn spawn_collector<R>(source: R, buffer: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(source);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.push_str(&line);
                    }
                }
            }
        }
    })
}

fn spawn_event_reader(
    source: tokio::net::unix::OwnedReadHalf,
    events: mpsc::Sender<ControlEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(source).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<ControlEvent>(&line) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding malformed control line");
                }
            }
        }
    })
}
