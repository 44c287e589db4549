//! MCP stdio transport
//!
//! Spawns the provider process and speaks newline-delimited JSON-RPC over
//! its stdin/stdout. A reader task routes responses to waiting callers by
//! request id; stderr is drained into the debug log.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pocket_core::error::{AgentError, Result};
use pocket_core::registry::ProviderEndpoint;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// A running JSON-RPC connection to one provider
pub struct StdioTransport {
    label: String,
    writer_tx: mpsc::Sender<Vec<u8>>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Option<Child>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl StdioTransport {
    /// Spawn the endpoint's command and attach to its pipes
    pub fn spawn(endpoint: &ProviderEndpoint) -> Result<Self> {
        let mut cmd = Command::new(&endpoint.command);
        cmd.args(&endpoint.args)
            .envs(&endpoint.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::Connection(format!("failed to start '{}': {}", endpoint.command, e))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| pipe_error(&endpoint.name, "stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| pipe_error(&endpoint.name, "stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| pipe_error(&endpoint.name, "stderr"))?;

        let label = endpoint.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if !line.is_empty() {
                    tracing::debug!(provider = %label, "stderr: {}", line);
                }
            }
        });

        Ok(Self::attach(&endpoint.name, stdout, stdin, Some(child)))
    }

    /// Run the protocol over any byte pipe pair
    pub fn from_io<R, W>(label: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::attach(label, reader, writer, None)
    }

    fn attach<R, W>(label: &str, reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(64);
        let writer = {
            let label = label.to_string();
            let mut writer = writer;
            tokio::spawn(async move {
                while let Some(mut frame) = writer_rx.recv().await {
                    frame.push(b'\n');
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        tracing::error!(provider = %label, error = %e, "MCP write failed");
                        break;
                    }
                }
            })
        };

        let reader = {
            let label = label.to_string();
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                let mut lines = BufReader::new(reader).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => route(&label, &pending, line.trim()),
                        Ok(None) => {
                            tracing::info!(provider = %label, "MCP server closed stdout");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(provider = %label, error = %e, "MCP read failed");
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                // Dropping the senders wakes every waiter
                lock(&pending).clear();
            })
        };

        Self {
            label: label.to_string(),
            writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            child: tokio::sync::Mutex::new(child),
            reader,
            writer,
        }
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            id,
        };

        if !self.is_alive() {
            return Err(self.closed_error());
        }

        let body = serde_json::to_vec(&JsonRpcRequest::new(id, method, params))?;
        self.writer_tx.send(body).await.map_err(|_| self.closed_error())?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => Err(AgentError::Timeout {
                what: format!("{} on '{}'", method, self.label),
                secs: timeout.as_secs(),
            }),
        }
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let body = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
        self.writer_tx.send(body).await.map_err(|_| self.closed_error())
    }

    /// Whether the server side is still readable
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Kill the child process and stop the I/O tasks
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            tracing::debug!(provider = %self.label, "Killing MCP server process");
            if let Err(e) = child.kill().await {
                tracing::warn!(provider = %self.label, error = %e, "Failed to kill MCP server");
            }
        }
        self.reader.abort();
        self.writer.abort();
        lock(&self.pending).clear();
    }

    fn closed_error(&self) -> AgentError {
        AgentError::Connection(format!("'{}' closed the connection", self.label))
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // The child is killed on drop; only the tasks need stopping
        self.reader.abort();
        self.writer.abort();
    }
}

/// Removes a pending slot when the waiting request finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

fn route(label: &str, pending: &Pending, line: &str) {
    if line.is_empty() {
        return;
    }

    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(provider = %label, error = %e, "Skipping non-JSON line from MCP server");
            return;
        }
    };

    if let Some(method) = message.get("method").and_then(Value::as_str) {
        tracing::debug!(provider = %label, method, "Ignoring server-initiated MCP message");
        return;
    }

    match serde_json::from_value::<JsonRpcResponse>(message) {
        Ok(response) => {
            let Some(id) = response.id else {
                tracing::debug!(provider = %label, "MCP response without id");
                return;
            };
            match lock(pending).remove(&id) {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => tracing::debug!(provider = %label, id, "Response for unknown or abandoned request"),
            }
        }
        Err(e) => tracing::warn!(provider = %label, error = %e, "Malformed MCP response"),
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

fn pipe_error(name: &str, pipe: &str) -> AgentError {
    AgentError::Connection(format!("could not open {} of '{}'", pipe, name))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process MCP server over a duplex pipe, for tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// `handler(method, params)` returns the reply body (`{"result": ..}` or
    /// `{"error": ..}`), or `None` to stay silent. Notifications are passed
    /// to the handler too; their reply is discarded.
    pub(crate) fn serve<F>(handler: F) -> StdioTransport
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(message) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let method = message["method"].as_str().unwrap_or_default().to_string();
                let reply = handler(&method, &message["params"]);
                let (Some(id), Some(mut reply)) = (message.get("id").cloned(), reply) else {
                    continue;
                };
                reply["jsonrpc"] = Value::from("2.0");
                reply["id"] = id;
                let mut bytes = serde_json::to_vec(&reply).unwrap();
                bytes.push(b'\n');
                if server_write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        StdioTransport::from_io("fake", client_read, client_write)
    }
}
