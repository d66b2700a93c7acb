//! Subprocess client: owns the agent child process and routes frames
//!
//! One `AcpClient` owns one spawned agent speaking line-delimited JSON-RPC
//! over stdin/stdout. Outbound frames funnel through a single writer task
//! (so frames land on the wire in id order); a single reader task
//! demultiplexes inbound frames into pending-request futures, notification
//! fanout, and the inbound-request handler. stderr is drained, masked, and
//! logged - never parsed.
//!
//! ## Concurrency
//!
//! - Writes: many producers, one consumer (the writer task) via an
//!   unbounded channel; producers never block.
//! - Reads: single-threaded inside the reader task. Inbound requests are
//!   dispatched on spawned tasks so a slow tool handler cannot stall the
//!   reader.
//! - `send_request` callers apply their own deadline on the returned
//!   future; on deadline the future is dropped but the pending entry
//!   remains until the child responds or `stop()` drains it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ralph_core::{mask_sensitive_data, RalphError, Result};

use crate::protocol::{codes, IncomingMessage, ProtocolCodec, RpcError};

/// Grace period between SIGTERM and SIGKILL during `stop()`.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Callback invoked for every inbound notification, in registration order.
pub type NotificationHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Future returned by the inbound-request handler.
pub type RequestHandlerFuture =
    Pin<Box<dyn Future<Output = std::result::Result<Value, RpcError>> + Send>>;

/// Handler for agent-initiated requests. At most one per client; its result
/// (or application error) is written back as the JSON-RPC response.
pub type RequestHandler = Arc<dyn Fn(String, Value) -> RequestHandlerFuture + Send + Sync>;

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>;

/// Future resolving to the response for one issued request.
///
/// Exactly one of three things happens to it: it resolves with the result,
/// rejects with the agent's error, or rejects with `Shutdown` when the
/// client stops before the agent answers.
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<Value>>,
}

impl Future for ResponseFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RalphError::Shutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct RunningState {
    writer_tx: mpsc::UnboundedSender<String>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// Client for one agent subprocess.
pub struct AcpClient {
    command: String,
    args: Vec<String>,
    request_timeout: Duration,
    codec: Arc<ProtocolCodec>,
    pending: Arc<PendingMap>,
    notification_handlers: Arc<RwLock<Vec<NotificationHandler>>>,
    request_handler: Arc<RwLock<Option<RequestHandler>>>,
    running: Mutex<Option<RunningState>>,
    child: Arc<Mutex<Option<Child>>>,
}

impl AcpClient {
    /// Create a client for `command args...`. Nothing is spawned until
    /// `start()`.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            request_timeout: Duration::from_secs(300),
            codec: Arc::new(ProtocolCodec::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            notification_handlers: Arc::new(RwLock::new(Vec::new())),
            request_handler: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
        }
    }

    /// Override the default per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The per-request deadline callers should apply to response futures.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the child and launch the writer/reader/stderr tasks.
    pub async fn start(&self) -> Result<()> {
        if self.running.lock().is_some() {
            return Err(RalphError::AlreadyRunning);
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                RalphError::SpawnFailure(format!("{}: {err}", self.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RalphError::SpawnFailure("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RalphError::SpawnFailure("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RalphError::SpawnFailure("failed to capture agent stderr".into()))?;

        *self.child.lock() = Some(child);

        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_loop(stdin, writer_rx));
        let reader_task = tokio::spawn(read_loop(
            stdout,
            Arc::clone(&self.codec),
            Arc::clone(&self.pending),
            Arc::clone(&self.notification_handlers),
            Arc::clone(&self.request_handler),
            writer_tx.clone(),
        ));
        let stderr_task = tokio::spawn(stderr_loop(stderr));

        *self.running.lock() = Some(RunningState {
            writer_tx,
            writer_task,
            reader_task,
            stderr_task,
        });

        debug!(command = %self.command, "agent subprocess started");
        Ok(())
    }

    /// Issue a request; the returned future resolves when the agent
    /// responds (or rejects on error / shutdown).
    pub fn send_request(&self, method: &str, params: Value) -> Result<ResponseFuture> {
        let (id, frame) = self.codec.create_request(method, params);
        let (tx, rx) = oneshot::channel();

        {
            let running = self.running.lock();
            let state = running.as_ref().ok_or(RalphError::NotRunning)?;
            self.pending.lock().insert(id, tx);
            if state.writer_tx.send(frame).is_err() {
                self.pending.lock().remove(&id);
                return Err(RalphError::NotRunning);
            }
        }

        Ok(ResponseFuture { rx })
    }

    /// Fire-and-forget notification; no pending entry is recorded.
    pub fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let frame = self.codec.create_notification(method, params);
        let running = self.running.lock();
        let state = running.as_ref().ok_or(RalphError::NotRunning)?;
        state
            .writer_tx
            .send(frame)
            .map_err(|_| RalphError::NotRunning)
    }

    /// Register a notification callback. Multiple handlers are invoked in
    /// registration order.
    pub fn on_notification<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.notification_handlers.write().push(Arc::new(handler));
    }

    /// Register the inbound-request handler (at most one; later calls
    /// replace it).
    pub fn on_request<F>(&self, handler: F)
    where
        F: Fn(String, Value) -> RequestHandlerFuture + Send + Sync + 'static,
    {
        *self.request_handler.write() = Some(Arc::new(handler));
    }

    /// Best-effort synchronous kill of the child, for signal handlers.
    ///
    /// Only delivers the kill signal; reaping and pending-request draining
    /// still happen in `stop()`.
    pub fn kill_now(&self) {
        if let Some(child) = self.child.lock().as_mut() {
            let _ = child.start_kill();
        }
    }

    /// Orderly teardown: close stdin, cancel the reader, terminate the
    /// child (SIGTERM, 2 s grace, SIGKILL), and fail every outstanding
    /// request with `Shutdown` so callers unblock. Idempotent.
    pub async fn stop(&self) {
        let state = self.running.lock().take();
        let Some(state) = state else {
            return;
        };

        // Stop routing before touching the process: no new frames out, no
        // more frames in.
        state.reader_task.abort();
        state.stderr_task.abort();
        drop(state.writer_tx);

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            terminate_gracefully(&child);
            match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }

        state.writer_task.abort();

        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(RalphError::Shutdown));
        }

        debug!(command = %self.command, "agent subprocess stopped");
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Deliver SIGTERM without blocking; `stop()` handles the grace period.
#[cfg(unix)]
fn terminate_gracefully(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(_child: &Child) {}

async fn write_loop(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(frame) = rx.recv().await {
        if stdin.write_all(frame.as_bytes()).await.is_err() {
            break;
        }
        if stdin.write_all(b"\n").await.is_err() {
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
    // Channel closed or pipe broken: dropping stdin closes the agent's
    // input stream.
}

async fn read_loop(
    stdout: ChildStdout,
    codec: Arc<ProtocolCodec>,
    pending: Arc<PendingMap>,
    notification_handlers: Arc<RwLock<Vec<NotificationHandler>>>,
    request_handler: Arc<RwLock<Option<RequestHandler>>>,
    writer_tx: mpsc::UnboundedSender<String>,
) {
    let mut lines = BufReader::new(stdout).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        match codec.parse_message(&line) {
            IncomingMessage::Response { id, result } => {
                let entry = pending.lock().remove(&(id as u64));
                match entry {
                    Some(tx) => {
                        let _ = tx.send(Ok(result));
                    }
                    None => warn!(id, "response for unknown request id"),
                }
            }
            IncomingMessage::Error { id: Some(id), error } => {
                let entry = pending.lock().remove(&(id as u64));
                match entry {
                    Some(tx) => {
                        let _ = tx.send(Err(RalphError::Application {
                            code: error.code,
                            message: error.message,
                        }));
                    }
                    None => warn!(id, code = error.code, "error for unknown request id"),
                }
            }
            IncomingMessage::Error { id: None, error } => {
                warn!(code = error.code, message = %error.message, "agent error without id");
            }
            IncomingMessage::Notification { method, params } => {
                let handlers = notification_handlers.read().clone();
                for handler in handlers {
                    handler(&method, &params);
                }
            }
            IncomingMessage::Request { id, method, params } => {
                // Dispatch on a fresh task so a blocking handler (terminal
                // wait, interactive permission) cannot stall the reader.
                let handler = request_handler.read().clone();
                let codec = Arc::clone(&codec);
                let writer = writer_tx.clone();
                tokio::spawn(async move {
                    let frame = match handler {
                        Some(handler) => match handler(method.clone(), params).await {
                            Ok(result) => codec.create_response(id, result),
                            Err(error) => codec.create_error_response(id, &error),
                        },
                        None => {
                            codec.create_error_response(id, &RpcError::method_not_found(&method))
                        }
                    };
                    let _ = writer.send(frame);
                });
            }
            IncomingMessage::ParseError { message } => {
                warn!(%message, "dropping malformed frame");
            }
            IncomingMessage::Invalid { message, id } => {
                warn!(%message, "dropping invalid frame");
                if let Some(id) = id {
                    let error = RpcError::new(codes::INVALID_REQUEST, message);
                    let _ = writer_tx.send(codec.create_error_response(id, &error));
                }
            }
        }
    }

    // Agent closed stdout (exit or crash): unblock every waiting caller.
    let drained: Vec<_> = pending.lock().drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(RalphError::Shutdown));
    }
}

async fn stderr_loop(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            debug!(target: "acp_stderr", "{}", mask_sensitive_data(&line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_start_and_stop_lifecycle() {
        let client = AcpClient::new("cat", vec![]);
        assert!(!client.is_running());

        client.start().await.unwrap();
        assert!(client.is_running());

        client.stop().await;
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let client = AcpClient::new("cat", vec![]);
        client.start().await.unwrap();

        let second = client.start().await;
        assert!(matches!(second, Err(RalphError::AlreadyRunning)));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_start_unknown_command_is_spawn_failure() {
        let client = AcpClient::new("nonexistent-command-xyz", vec![]);
        let result = client.start().await;
        assert!(matches!(result, Err(RalphError::SpawnFailure(_))));
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_safe() {
        let client = AcpClient::new("cat", vec![]);
        client.stop().await;
        client.stop().await;
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_send_request_when_not_running_fails() {
        let client = AcpClient::new("cat", vec![]);
        let result = client.send_request("test", json!({}));
        assert!(matches!(result, Err(RalphError::NotRunning)));
    }

    #[tokio::test]
    async fn test_notification_records_no_pending_entry() {
        let client = AcpClient::new("cat", vec![]);
        client.start().await.unwrap();

        client.send_notification("session/update", json!({"data": "x"})).unwrap();
        assert_eq!(client.pending_count(), 0);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_pending_requests_with_shutdown() {
        // `sleep` never reads stdin or writes stdout, so the pending entry
        // survives until stop() drains it.
        let client = AcpClient::new("sleep", vec!["60".to_string()]);
        client.start().await.unwrap();

        let future = client.send_request("test/method", json!({"key": "value"})).unwrap();
        assert_eq!(client.pending_count(), 1);

        client.stop().await;
        assert_eq!(client.pending_count(), 0);

        let result = future.await;
        assert!(matches!(result, Err(RalphError::Shutdown)));
    }

    #[tokio::test]
    async fn test_request_timeout_leaves_pending_entry() {
        let client =
            AcpClient::new("sleep", vec!["60".to_string()]).with_timeout(Duration::from_millis(10));
        client.start().await.unwrap();

        let future = client.send_request("slow/method", json!({})).unwrap();
        let result = tokio::time::timeout(client.request_timeout(), future).await;
        assert!(result.is_err(), "deadline should fire before any response");

        // The entry stays for stop() to drain.
        assert_eq!(client.pending_count(), 1);
        client.stop().await;
        assert_eq!(client.pending_count(), 0);
    }
}
