use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use kestrel_core::{Error, Result, ToolDescriptor};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as TokioMutex, oneshot};
use tracing::debug;

/// Pending response routing: request id to the caller's reply channel.
type PendingMap = HashMap<u64, oneshot::Sender<Value>>;

/// Pool of long-lived session server processes, one per tool.
///
/// A session tool's server is spawned lazily on the first call and reused
/// for every call after that, so the server can hold state between
/// invocations. A dead server fails its pending calls and is respawned on
/// the next one.
#[derive(Debug, Default)]
pub struct SessionPool {
    sessions: TokioMutex<HashMap<String, Arc<SessionClient>>>,
}

impl SessionPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls a session-backed tool, spawning or respawning its server as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] when the server cannot be spawned, dies
    /// before responding, or answers with a JSON-RPC error.
    pub async fn call(
        &self,
        descriptor: &ToolDescriptor,
        program: &str,
        args: &[String],
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let client = self.client_for(&descriptor.name, program, args).await?;
        let response = client
            .request(
                "tools/call",
                json!({
                    "name": descriptor.name,
                    "arguments": arguments,
                }),
            )
            .await?;
        extract_result(&response)
    }

    async fn client_for(
        &self,
        tool_name: &str,
        program: &str,
        args: &[String],
    ) -> Result<Arc<SessionClient>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(client) = sessions.get(tool_name) {
            if client.is_alive() {
                return Ok(Arc::clone(client));
            }
            debug!("Session for '{tool_name}' died, respawning");
            sessions.remove(tool_name);
        }

        let client = Arc::new(SessionClient::connect(program, args).await?);
        sessions.insert(tool_name.to_owned(), Arc::clone(&client));
        Ok(client)
    }
}

/// One session server process speaking line-delimited JSON-RPC 2.0 over
/// stdin/stdout.
///
/// Request ids increase monotonically; a background task reads stdout and
/// routes each response to the waiting caller by id, so concurrent calls
/// multiplex one process.
#[derive(Debug)]
struct SessionClient {
    child: Child,
    stdin: TokioMutex<ChildStdin>,
    pending: Arc<StdMutex<PendingMap>>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
}

impl SessionClient {
    /// Spawns the server and performs the `initialize` handshake.
    async fn connect(program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| Error::Session(format!("Failed to spawn '{program}': {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Session(format!("No stdin pipe for '{program}'")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Session(format!("No stdout pipe for '{program}'")))?;

        let pending: Arc<StdMutex<PendingMap>> = Arc::new(StdMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        spawn_reader(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
            program.to_owned(),
        );

        let client = Self {
            child,
            stdin: TokioMutex::new(stdin),
            pending,
            next_id: AtomicU64::new(0),
            alive,
        };

        client
            .request(
                "initialize",
                json!({
                    "client": {"name": "kestrel", "version": env!("CARGO_PKG_VERSION")}
                }),
            )
            .await?;
        client.notify("notifications/initialized").await?;
        debug!("Session '{program}' initialized");
        Ok(client)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Sends one request and waits for the matching response.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        {
            let mut map = self
                .pending
                .lock()
                .map_err(|_| Error::Session("Session routing state poisoned".to_owned()))?;
            map.insert(id, sender);
        }
        // Removes the pending entry again if this future is dropped (for
        // example by the per-attempt timeout) before the response arrives.
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
        };

        let line = serde_json::to_string(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))?;
        self.write_line(&line).await?;

        let response = receiver.await.map_err(|_| {
            Error::Session(format!("Session closed before responding to request {id}"))
        });
        drop(guard);
        response
    }

    /// Sends one notification (no id, no response).
    async fn notify(&self, method: &str) -> Result<()> {
        let line = serde_json::to_string(&json!({"jsonrpc": "2.0", "method": method}))?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let payload = format!("{line}\n");
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|err| Error::Session(format!("Failed to write to session: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| Error::Session(format!("Failed to flush session stdin: {err}")))?;
        Ok(())
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        if let Err(error) = self.child.start_kill() {
            debug!("Session process was already gone: {error}");
        }
    }
}

/// Routes stdout lines to pending callers until the process closes its
/// stdout, then fails everything still pending by dropping the senders.
fn spawn_reader(
    stdout: ChildStdout,
    pending: Arc<StdMutex<PendingMap>>,
    alive: Arc<AtomicBool>,
    program: String,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                debug!("Ignoring non-JSON line from '{program}'");
                continue;
            };
            // Anything carrying a method is a server-side notification or
            // request, not a response to us.
            if message.get("method").is_some() {
                continue;
            }
            let Some(id) = message.get("id").and_then(Value::as_u64) else {
                continue;
            };
            let sender = match pending.lock() {
                Ok(mut map) => map.remove(&id),
                Err(_) => break,
            };
            if let Some(sender) = sender
                && sender.send(message).is_err()
            {
                debug!("Response {id} from '{program}' arrived after the caller gave up");
            }
        }

        alive.store(false, Ordering::SeqCst);
        if let Ok(mut map) = pending.lock() {
            map.clear();
        }
        debug!("Session '{program}' closed");
    });
}

struct PendingGuard {
    pending: Arc<StdMutex<PendingMap>>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&self.id);
        }
    }
}

fn extract_result(response: &Value) -> Result<Value> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(Error::Session(format!(
            "Server returned error {code}: {message}"
        )));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| Error::Session("Response carried neither result nor error".to_owned()))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_result_returns_result_member() {
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {"count": 2}});
        assert_eq!(extract_result(&response).unwrap(), json!({"count": 2}));
    }

    #[test]
    fn test_extract_result_surfaces_rpc_error() {
        let response =
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no such method"}});
        let error = extract_result(&response).unwrap_err();
        assert!(matches!(error, Error::Session(_)));
        assert!(error.to_string().contains("no such method"), "got: {error}");
    }

    #[test]
    fn test_extract_result_rejects_empty_response() {
        let response = json!({"jsonrpc": "2.0", "id": 1});
        assert!(matches!(
            extract_result(&response),
            Err(Error::Session(_))
        ));
    }
}
