//! Newline-delimited JSON-RPC 2.0 over a child process's stdio

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

use super::config::McpServerConfig;
use crate::{Error, Result};

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<RpcResponse>>>>;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    method: &'a str,
    params: Value,
}

/// Any inbound line: a response, or a request/notification from the server
#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<Value>,
    method: Option<String>,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: Option<i64>,
    message: Option<String>,
}

/// JSON-RPC connection to one MCP server process
pub struct StdioTransport {
    name: String,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pending: Pending,
    next_id: AtomicI64,
    alive: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Spawn the server and start the reader and writer tasks
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the process cannot be started
    pub fn spawn(name: &str, config: &McpServerConfig) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Transport(format!("failed to start MCP server {name} ({}): {e}", config.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport(format!("MCP server {name}: no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport(format!("MCP server {name}: no stdout")))?;

        if let Some(stderr) = child.stderr.take() {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{line}");
                }
            });
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(write_lines(name.to_string(), stdin, rx));

        let pending: Pending = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));
        tokio::spawn(read_responses(
            name.to_string(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));

        tracing::debug!(server = name, pid = ?child.id(), "spawned MCP server");

        Ok(Self {
            name: name.to_string(),
            outbound: Mutex::new(Some(tx)),
            pending,
            next_id: AtomicI64::new(1),
            alive,
            child: tokio::sync::Mutex::new(Some(child)),
        })
    }

    /// Server name from the config
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the server's stdout has closed
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn sender(&self) -> Result<mpsc::Sender<String>> {
        self.outbound
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| Error::Transport(format!("MCP server {} stdin is closed", self.name)))
    }

    /// Send a request and wait for its response
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the server is gone, `Timeout` if no response
    /// arrives in time, and `Tool` for a JSON-RPC error response
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if !self.is_alive() {
            return Err(Error::Transport(format!("MCP server {} is not running", self.name)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&RpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        // The reader may have drained pending between the check above and the insert
        if !self.is_alive() {
            self.forget(id);
            return Err(Error::Transport(format!("MCP server {} is not running", self.name)));
        }

        if self.sender()?.send(line).await.is_err() {
            self.forget(id);
            return Err(Error::Transport(format!("MCP server {} stdin is closed", self.name)));
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::Transport(format!(
                    "MCP server {} exited before answering {method}",
                    self.name
                )));
            }
            Err(_) => {
                self.forget(id);
                return Err(Error::Timeout(format!(
                    "MCP server {} did not answer {method} within {}s",
                    self.name,
                    timeout.as_secs()
                )));
            }
        };

        if let Some(error) = response.error {
            let message = error.message.unwrap_or_else(|| "unknown error".to_string());
            let code = error.code.unwrap_or_default();
            return Err(Error::Tool(format!("{method} failed: {message} (code {code})")));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a notification (no response expected)
    ///
    /// # Errors
    ///
    /// Returns `Transport` if stdin is closed
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let line = serde_json::to_string(&RpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        })?;
        self.sender()?
            .send(line)
            .await
            .map_err(|_| Error::Transport(format!("MCP server {} stdin is closed", self.name)))
    }

    fn forget(&self, id: i64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    /// Stop the server
    ///
    /// Closes stdin, sends `SIGTERM`, waits up to `grace` for exit and kills
    /// the process if it is still running.
    pub async fn shutdown(&self, grace: Duration) {
        // Dropping the sender ends the writer task, which closes stdin
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            terminate(pid);
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "MCP server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.name, error = %e, "failed to wait for MCP server");
            }
            Err(_) => {
                tracing::warn!(server = %self.name, "MCP server ignored SIGTERM, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(server = %self.name, error = %e, "failed to kill MCP server");
                }
            }
        }
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Kill the server immediately
    pub async fn kill(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: plain syscall on a pid we spawned; no memory is shared
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

async fn write_lines(server: String, mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            tracing::warn!(server = %server, error = %e, "failed to write to MCP server");
            break;
        }
    }
    // stdin drops here, signalling EOF
}

async fn read_responses(
    server: String,
    stdout: tokio::process::ChildStdout,
    pending: Pending,
    alive: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "failed to read from MCP server");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: RpcResponse = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "ignoring non JSON-RPC line");
                continue;
            }
        };

        if let Some(method) = &message.method {
            tracing::debug!(server = %server, method = %method, "ignoring message from MCP server");
            continue;
        }

        let Some(id) = message.id.as_ref().and_then(Value::as_i64) else {
            continue;
        };

        let sender = pending.lock().ok().and_then(|mut p| p.remove(&id));
        if let Some(sender) = sender {
            let _ = sender.send(message);
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders fails every outstanding request
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    tracing::warn!(server = %server, "MCP server closed its output");
}
