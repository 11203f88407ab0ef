//! MCP Server
//!
//! Handles the MCP protocol over a line-oriented stream, processing JSON-RPC
//! 2.0 messages. Tool calls run on their own tasks; responses are written as
//! they complete, not in arrival order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::protocol::{
    CallToolParams, CancelledParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, ToolResult,
    ToolsCapability, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::runner::Runner;

/// A finished tool call. `response` is `None` when the call was aborted.
struct Completion {
    key: String,
    seq: u64,
    response: Option<JsonRpcResponse>,
}

/// A tool call that has not answered yet, keyed by its serialized request id
struct PendingCall {
    seq: u64,
    handle: AbortHandle,
}

type Pending = HashMap<String, PendingCall>;

/// MCP Server that communicates over a pair of byte streams
pub struct McpServer<R> {
    dispatcher: Arc<Dispatcher<R>>,
    shutdown_grace: Duration,
    initialized: bool,
    next_seq: u64,
}

impl<R: Runner> McpServer<R> {
    pub fn new(dispatcher: Dispatcher<R>, shutdown_grace: Duration) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            shutdown_grace,
            initialized: false,
            next_seq: 0,
        }
    }

    /// Serve on stdin/stdout until EOF or SIGINT/SIGTERM
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout(), shutdown_signal())
            .await
    }

    /// Serve until the input ends or `shutdown` resolves.
    ///
    /// Shutdown stops reading, gives in-flight calls the grace period to
    /// finish, then aborts the rest (which kills their reporter processes).
    pub async fn serve<I, O, S>(&mut self, input: I, mut output: O, shutdown: S) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = BufReader::new(input).lines();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut pending = Pending::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Some(done) = done_rx.recv() => {
                    settle(&mut pending, &done);
                    if let Some(response) = done.response {
                        write_message(&mut output, &response).await?;
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("Client disconnected");
                        break;
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("Received: {}", line);

                    if let Some(response) =
                        self.handle_message(line, &done_tx, &mut in_flight, &mut pending)
                    {
                        write_message(&mut output, &response).await?;
                    }
                }
            }
        }

        self.drain(&mut output, &mut done_rx, &mut in_flight).await?;
        output.flush().await?;
        Ok(())
    }

    /// Let in-flight calls finish within the grace period, then abort them
    async fn drain<O: AsyncWrite + Unpin>(
        &self,
        output: &mut O,
        done_rx: &mut mpsc::UnboundedReceiver<Completion>,
        in_flight: &mut JoinSet<()>,
    ) -> anyhow::Result<()> {
        if !in_flight.is_empty() {
            info!("Waiting for {} in-flight invocation(s)", in_flight.len());
        }

        let deadline = tokio::time::sleep(self.shutdown_grace);
        tokio::pin!(deadline);

        while !in_flight.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    warn!("Grace period over, aborting {} invocation(s)", in_flight.len());
                    in_flight.shutdown().await;
                    break;
                }
                Some(done) = done_rx.recv() => {
                    if let Some(response) = done.response {
                        write_message(output, &response).await?;
                    }
                }
                Some(joined) = in_flight.join_next() => log_join(joined),
            }
        }

        while let Ok(done) = done_rx.try_recv() {
            if let Some(response) = done.response {
                write_message(output, &response).await?;
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC message. Tool calls are started in the
    /// background and answer through `done_tx`; everything else answers here.
    fn handle_message(
        &mut self,
        message: &str,
        done_tx: &mpsc::UnboundedSender<Completion>,
        in_flight: &mut JoinSet<()>,
        pending: &mut Pending,
    ) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
                ));
            }
        };

        // Handle notifications (no id means no response expected)
        let Some(id) = request.id.clone() else {
            self.handle_notification(&request.method, request.params, pending);
            return None;
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                Some(id),
                JsonRpcError::new(INVALID_REQUEST, "Only JSON-RPC 2.0 is supported"),
            ));
        }

        if request.method == "tools/call" {
            if pending.contains_key(&request_key(&id)) {
                warn!("Rejected tools/call with duplicate id {}", id);
                let message = format!("Request id {} is already in flight", id);
                return Some(JsonRpcResponse::error(
                    Some(id),
                    JsonRpcError::new(INVALID_REQUEST, message),
                ));
            }
            return match parse_call(request.params) {
                Ok(params) => {
                    self.spawn_call(id, params, done_tx, in_flight, pending);
                    None
                }
                Err(error) => Some(JsonRpcResponse::error(Some(id), error)),
            };
        }

        let result = self.handle_request(&request.method, request.params);
        Some(match result {
            Ok(value) => JsonRpcResponse::success(Some(id), value),
            Err(error) => JsonRpcResponse::error(Some(id), error),
        })
    }

    /// Handle a notification (no response expected)
    fn handle_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
        pending: &mut Pending,
    ) {
        match method {
            "notifications/initialized" => {
                info!("Client initialized");
                self.initialized = true;
            }
            "notifications/cancelled" => {
                let Some(params) = params.and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
                else {
                    debug!("Malformed cancellation");
                    return;
                };
                match pending.remove(&request_key(&params.request_id)) {
                    Some(call) => {
                        info!(
                            "Cancelling request {} ({})",
                            params.request_id,
                            params.reason.as_deref().unwrap_or("no reason given")
                        );
                        call.handle.abort();
                    }
                    None => debug!("Cancellation for unknown request {}", params.request_id),
                }
            }
            _ => {
                debug!("Unknown notification: {}", method);
            }
        }
    }

    /// Handle a synchronous request and return the result
    fn handle_request(&mut self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        match method {
            "initialize" => self.handle_initialize(params),
            "tools/list" => self.handle_list_tools(),
            "ping" => Ok(json!({})),
            _ => {
                warn!("Unknown method: {}", method);
                Err(JsonRpcError::new(
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                ))
            }
        }
    }

    /// Handle the initialize request
    fn handle_initialize(&mut self, _params: Option<Value>) -> Result<Value, JsonRpcError> {
        info!("Initializing MCP server");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: "uniquity-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        to_value(result)
    }

    /// Handle the tools/list request
    fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        to_value(ListToolsResult {
            tools: self.dispatcher.list_tools(),
        })
    }

    /// Start a tools/call in the background
    fn spawn_call(
        &mut self,
        id: Value,
        params: CallToolParams,
        done_tx: &mpsc::UnboundedSender<Completion>,
        in_flight: &mut JoinSet<()>,
        pending: &mut Pending,
    ) {
        info!("Calling tool: {}", params.name);

        let key = request_key(&id);
        let seq = self.next_seq;
        self.next_seq += 1;

        let dispatcher = Arc::clone(&self.dispatcher);
        let guard = CallGuard {
            key: key.clone(),
            seq,
            id: id.clone(),
            done_tx: done_tx.clone(),
            finished: false,
        };

        let handle = in_flight.spawn(async move {
            let response = match dispatcher.call_tool(&params.name, params.arguments).await {
                Ok(payload) => match to_value(payload.into_tool_result()) {
                    Ok(value) => JsonRpcResponse::success(Some(id), value),
                    Err(error) => JsonRpcResponse::error(Some(id), error),
                },
                Err(err) if err.is_tool_failure() => {
                    warn!("Tool {} failed: {}", params.name, err);
                    match to_value(ToolResult::from(&err)) {
                        Ok(value) => JsonRpcResponse::success(Some(id), value),
                        Err(error) => JsonRpcResponse::error(Some(id), error),
                    }
                }
                Err(err) => {
                    warn!("Rejected call to {}: {}", params.name, err);
                    JsonRpcResponse::error(Some(id), JsonRpcError::from(&err))
                }
            };
            guard.finish(response);
        });

        pending.insert(key, PendingCall { seq, handle });
    }
}

/// Reports the end of a tool call to the server loop however the task ends:
/// with a response, aborted, or panicking.
struct CallGuard {
    key: String,
    seq: u64,
    id: Value,
    done_tx: mpsc::UnboundedSender<Completion>,
    finished: bool,
}

impl CallGuard {
    fn finish(mut self, response: JsonRpcResponse) {
        self.send(Some(response));
    }

    fn send(&mut self, response: Option<JsonRpcResponse>) {
        self.finished = true;
        // Receiver only goes away once the server is done writing.
        let _ = self.done_tx.send(Completion {
            key: self.key.clone(),
            seq: self.seq,
            response,
        });
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // The task's future is dropped while unwinding when it panics.
        let response = std::thread::panicking().then(|| {
            error!("Tool call {} panicked", self.id);
            JsonRpcResponse::error(
                Some(self.id.clone()),
                JsonRpcError::new(INTERNAL_ERROR, "Internal error while running the tool"),
            )
        });
        self.send(response);
    }
}

/// Forget a finished call unless its id has since been reused
fn settle(pending: &mut Pending, done: &Completion) {
    if pending.get(&done.key).is_some_and(|call| call.seq == done.seq) {
        pending.remove(&done.key);
    }
}

fn parse_call(params: Option<Value>) -> Result<CallToolParams, JsonRpcError> {
    match params {
        Some(p) => serde_json::from_value(p)
            .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("Invalid params: {}", e))),
        None => Err(JsonRpcError::new(INVALID_PARAMS, "Missing params")),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, format!("Serialization error: {}", e)))
}

fn request_key(id: &Value) -> String {
    id.to_string()
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("Invocation cancelled"),
        Err(e) => error!("Invocation task failed: {}", e),
    }
}

async fn write_message<O: AsyncWrite + Unpin>(
    output: &mut O,
    response: &JsonRpcResponse,
) -> anyhow::Result<()> {
    let resp_str = serde_json::to_string(response)?;
    debug!("Sending: {}", resp_str);
    output.write_all(resp_str.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
