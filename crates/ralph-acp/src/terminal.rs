//! Terminal handlers for agent `terminal/*` requests
//!
//! Each `terminal/create` spawns a child process with stdout and stderr
//! piped and stdin closed, keyed by a fresh UUID in the terminal table.
//! Pump tasks append both streams to a shared accumulator so
//! `terminal/output` never blocks; entries live until `terminal/release`
//! (or adapter shutdown, which kills everything left in the table).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{codes, RpcError};

/// Grace period between SIGTERM and SIGKILL for `terminal/kill`.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Table of live terminals, shared between the request handler and the
/// adapter's shutdown path.
#[derive(Default)]
pub struct TerminalTable {
    terminals: Mutex<HashMap<String, Arc<TerminalHandle>>>,
}

impl TerminalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.terminals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.lock().is_empty()
    }

    /// Handle `terminal/create`: `{command: [argv], cwd?}` -> `{terminalId}`.
    pub async fn create(&self, params: &Value) -> Result<Value, RpcError> {
        let argv = params
            .get("command")
            .ok_or_else(|| RpcError::invalid_params("Missing required parameter: command"))?;
        let argv = argv
            .as_array()
            .ok_or_else(|| RpcError::invalid_params("command must be a list of strings"))?;
        if argv.is_empty() {
            return Err(RpcError::invalid_params("command list cannot be empty"));
        }
        let argv: Vec<&str> = argv
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| RpcError::invalid_params("command must be a list of strings"))
            })
            .collect::<Result<_, _>>()?;

        let mut command = Command::new(argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = params.get("cwd").and_then(Value::as_str) {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|err| match err.kind() {
            ErrorKind::NotFound => RpcError::new(
                codes::NOT_FOUND,
                format!("Command not found: {}", argv[0]),
            ),
            ErrorKind::PermissionDenied => RpcError::new(
                codes::ACCESS_DENIED,
                format!("Permission denied executing: {}", argv[0]),
            ),
            _ => RpcError::new(
                codes::AGENT_ERROR,
                format!("Failed to create terminal: {err}"),
            ),
        })?;

        let terminal_id = Uuid::new_v4().to_string();
        let handle = Arc::new(TerminalHandle::new(&terminal_id, child));
        self.terminals
            .lock()
            .insert(terminal_id.clone(), Arc::clone(&handle));

        debug!(terminal_id = %terminal_id, command = argv[0], "terminal created");
        Ok(json!({"terminalId": terminal_id}))
    }

    /// Handle `terminal/output`: non-blocking accumulator snapshot.
    pub async fn output(&self, params: &Value) -> Result<Value, RpcError> {
        let handle = self.get(params)?;
        handle.poll_exit();
        Ok(json!({
            "output": handle.output(),
            "done": !handle.is_running(),
        }))
    }

    /// Handle `terminal/wait_for_exit`: `{terminalId, timeout?}` ->
    /// `{exitCode}`, or `-32000` on deadline.
    pub async fn wait_for_exit(&self, params: &Value) -> Result<Value, RpcError> {
        let handle = self.get(params)?;
        let timeout = params.get("timeout").and_then(Value::as_f64);

        let exit_code = match timeout {
            Some(seconds) => {
                match tokio::time::timeout(Duration::from_secs_f64(seconds), handle.wait()).await {
                    Ok(code) => code,
                    Err(_) => {
                        return Err(RpcError::new(
                            codes::AGENT_ERROR,
                            format!("Wait timed out after {seconds}s"),
                        ))
                    }
                }
            }
            None => handle.wait().await,
        };

        Ok(json!({"exitCode": exit_code}))
    }

    /// Handle `terminal/kill`: graceful terminate, force after 1 s. The
    /// accumulator is preserved so buffered output stays drainable.
    pub async fn kill(&self, params: &Value) -> Result<Value, RpcError> {
        let handle = self.get(params)?;
        handle.kill().await;
        Ok(json!({"success": true}))
    }

    /// Handle `terminal/release`: kill if running, then drop the entry.
    pub async fn release(&self, params: &Value) -> Result<Value, RpcError> {
        let terminal_id = terminal_id_param(params)?;
        let handle = self
            .terminals
            .lock()
            .remove(&terminal_id)
            .ok_or_else(|| unknown_terminal(&terminal_id))?;
        if handle.is_running() {
            handle.kill().await;
        }
        debug!(terminal_id = %terminal_id, "terminal released");
        Ok(json!({"success": true}))
    }

    /// Kill and drop every terminal. Used on adapter shutdown; terminals
    /// deliberately outlive individual prompts, so this is the only other
    /// place entries are retired.
    pub async fn kill_all(&self) {
        let drained: Vec<_> = self.terminals.lock().drain().collect();
        for (id, handle) in drained {
            if handle.is_running() {
                warn!(terminal_id = %id, "killing terminal left running at shutdown");
                handle.kill().await;
            }
        }
    }

    fn get(&self, params: &Value) -> Result<Arc<TerminalHandle>, RpcError> {
        let terminal_id = terminal_id_param(params)?;
        self.terminals
            .lock()
            .get(&terminal_id)
            .cloned()
            .ok_or_else(|| unknown_terminal(&terminal_id))
    }
}

fn terminal_id_param(params: &Value) -> Result<String, RpcError> {
    params
        .get("terminalId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RpcError::invalid_params("Missing required parameter: terminalId"))
}

fn unknown_terminal(terminal_id: &str) -> RpcError {
    RpcError::new(
        codes::NOT_FOUND,
        format!("Terminal not found: {terminal_id}"),
    )
}

/// One tracked terminal child.
struct TerminalHandle {
    id: String,
    pid: Option<u32>,
    child: tokio::sync::Mutex<Option<Child>>,
    output: Arc<Mutex<String>>,
    exit_code: Mutex<Option<i32>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl TerminalHandle {
    /// Take the pipes, start the output pumps, and keep the child for
    /// wait/kill.
    fn new(id: &str, mut child: Child) -> Self {
        let output = Arc::new(Mutex::new(String::new()));
        let mut pumps = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_stream(stdout, Arc::clone(&output))));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_stream(stderr, Arc::clone(&output))));
        }

        Self {
            id: id.to_string(),
            pid: child.id(),
            child: tokio::sync::Mutex::new(Some(child)),
            output,
            exit_code: Mutex::new(None),
            pumps: Mutex::new(pumps),
        }
    }

    fn output(&self) -> String {
        self.output.lock().clone()
    }

    fn is_running(&self) -> bool {
        self.exit_code.lock().is_none()
    }

    fn store_exit(&self, status: std::process::ExitStatus) {
        let mut slot = self.exit_code.lock();
        if slot.is_none() {
            *slot = Some(status.code().unwrap_or(-1));
        }
    }

    /// Non-blocking exit probe for `terminal/output`.
    fn poll_exit(&self) {
        if self.exit_code.lock().is_some() {
            return;
        }
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    self.store_exit(status);
                }
            }
        }
    }

    /// Block until the process exits, then let the pumps drain the last
    /// buffered bytes before reporting the code.
    async fn wait(&self) -> i32 {
        if let Some(code) = *self.exit_code.lock() {
            return code;
        }

        {
            let mut guard = self.child.lock().await;
            if self.exit_code.lock().is_none() {
                if let Some(child) = guard.as_mut() {
                    match child.wait().await {
                        Ok(status) => self.store_exit(status),
                        Err(err) => {
                            warn!(terminal_id = %self.id, %err, "terminal wait failed");
                            self.store_exit_code(-1);
                        }
                    }
                }
            }
        }

        self.join_pumps().await;
        (*self.exit_code.lock()).unwrap_or(-1)
    }

    fn store_exit_code(&self, code: i32) {
        let mut slot = self.exit_code.lock();
        if slot.is_none() {
            *slot = Some(code);
        }
    }

    async fn join_pumps(&self) {
        let pumps: Vec<_> = std::mem::take(&mut *self.pumps.lock());
        for pump in pumps {
            let _ = pump.await;
        }
    }

    /// Graceful terminate, SIGKILL after the grace period.
    async fn kill(&self) {
        if !self.is_running() {
            return;
        }

        self.signal_terminate();
        if self.reap_with_deadline(KILL_GRACE).await {
            return;
        }

        self.signal_kill().await;
        let _ = self.reap_with_deadline(Duration::from_millis(500)).await;
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {}

    async fn signal_kill(&self) {
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
    }

    /// Poll for exit up to `deadline`; a concurrent `wait()` holding the
    /// child lock will reap and publish the code for us.
    async fn reap_with_deadline(&self, deadline: Duration) -> bool {
        let until = Instant::now() + deadline;
        loop {
            if self.exit_code.lock().is_some() {
                return true;
            }
            if let Ok(mut guard) = self.child.try_lock() {
                if let Some(child) = guard.as_mut() {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            self.store_exit(status);
                            return true;
                        }
                        Ok(None) => {}
                        Err(_) => return false,
                    }
                }
            }
            if Instant::now() >= until {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn pump_stream<R>(mut reader: R, output: Arc<Mutex<String>>)
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = vec![0_u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                output.lock().push_str(&chunk);
            }
            Err(err) => {
                warn!(%err, "failed to read terminal output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_params(argv: &[&str]) -> Value {
        json!({"command": argv})
    }

    async fn create_terminal(table: &TerminalTable, argv: &[&str]) -> String {
        let result = table.create(&create_params(argv)).await.unwrap();
        result["terminalId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_returns_terminal_id() {
        let table = TerminalTable::new();
        let id = create_terminal(&table, &["echo", "hello"]).await;
        assert!(!id.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_create_missing_command_rejected() {
        let table = TerminalTable::new();
        let err = table.create(&json!({})).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_create_non_list_command_rejected() {
        let table = TerminalTable::new();
        let err = table
            .create(&json!({"command": "echo hello"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_create_empty_command_rejected() {
        let table = TerminalTable::new();
        let err = table.create(&json!({"command": []})).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_create_unknown_binary_is_not_found() {
        let table = TerminalTable::new();
        let err = table
            .create(&create_params(&["definitely-not-a-real-binary-xyz"]))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wait_for_exit_returns_exit_code() {
        let table = TerminalTable::new();
        let id = create_terminal(&table, &["sh", "-c", "exit 7"]).await;

        let result = table
            .wait_for_exit(&json!({"terminalId": id}))
            .await
            .unwrap();
        assert_eq!(result["exitCode"], 7);
    }

    #[tokio::test]
    async fn test_output_captures_stdout_and_stderr() {
        let table = TerminalTable::new();
        let id = create_terminal(&table, &["sh", "-c", "echo out; echo err 1>&2"]).await;

        table.wait_for_exit(&json!({"terminalId": id})).await.unwrap();
        let result = table.output(&json!({"terminalId": id})).await.unwrap();

        let output = result["output"].as_str().unwrap();
        assert!(output.contains("out"));
        assert!(output.contains("err"));
        assert_eq!(result["done"], true);
    }

    #[tokio::test]
    async fn test_output_on_running_child_does_not_block() {
        let table = TerminalTable::new();
        let id = create_terminal(&table, &["sleep", "5"]).await;

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            table.output(&json!({"terminalId": id})),
        )
        .await
        .expect("output must not block on a running child")
        .unwrap();
        assert_eq!(result["done"], false);

        table.kill(&json!({"terminalId": id})).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_exit_timeout() {
        let table = TerminalTable::new();
        let id = create_terminal(&table, &["sleep", "5"]).await;

        let err = table
            .wait_for_exit(&json!({"terminalId": id, "timeout": 0.1}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::AGENT_ERROR);

        table.kill(&json!({"terminalId": id})).await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_preserves_buffered_output() {
        let table = TerminalTable::new();
        let id = create_terminal(&table, &["sh", "-c", "echo before-sleep; sleep 5"]).await;

        // Give the pump a moment to capture the echo.
        tokio::time::sleep(Duration::from_millis(200)).await;
        table.kill(&json!({"terminalId": id})).await.unwrap();

        let result = table.output(&json!({"terminalId": id})).await.unwrap();
        assert!(result["output"].as_str().unwrap().contains("before-sleep"));
    }

    #[tokio::test]
    async fn test_release_removes_entry() {
        let table = TerminalTable::new();
        let id = create_terminal(&table, &["sleep", "5"]).await;
        assert_eq!(table.len(), 1);

        let result = table.release(&json!({"terminalId": id})).await.unwrap();
        assert_eq!(result["success"], true);
        assert!(table.is_empty());

        let err = table.output(&json!({"terminalId": id})).await.unwrap_err();
        assert_eq!(err.code, codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_terminal_id_is_not_found() {
        let table = TerminalTable::new();
        let err = table
            .output(&json!({"terminalId": "no-such-terminal"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_kill_all_empties_table() {
        let table = TerminalTable::new();
        create_terminal(&table, &["sleep", "5"]).await;
        create_terminal(&table, &["sleep", "5"]).await;
        assert_eq!(table.len(), 2);

        table.kill_all().await;
        assert!(table.is_empty());
    }
}
