// Keyward — Control socket server
//
// Newline-delimited JSON-RPC 2.0 over a 0600 Unix socket. Every connection
// gets its own task; the peer's identity is resolved once per connection and
// used as the audit actor for everything it asks for.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use zeroize::Zeroizing;

use crate::audit::{AuditLog, AuditQuery};
use crate::rotation::{RotationError, RotationReason, Scheduler};
use crate::store::CredentialStore;
use crate::watcher::Reconciler;

use super::caller::{CallerInfo, UNKNOWN_CALLER};
use super::protocol::{
    JsonRpcRequest, JsonRpcResponse, CONFLICT, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, INVALID_STATE,
    METHOD_NOT_FOUND, NOT_FOUND, VALIDATION_FAILED,
};
use super::GatewayError;

/// What the control methods operate on.
pub struct ControlState {
    pub store: Arc<CredentialStore>,
    pub scheduler: Arc<Scheduler>,
    pub reconciler: Arc<Reconciler>,
    pub audit: Arc<dyn AuditLog>,
}

pub struct UdsServer {
    socket_path: PathBuf,
    state: Arc<ControlState>,
}

impl UdsServer {
    pub fn new(socket_path: PathBuf, state: Arc<ControlState>) -> Self {
        Self { socket_path, state }
    }

    /// `$XDG_RUNTIME_DIR/keyward/keyward.sock`, falling back to `/tmp`.
    pub fn default_socket_path() -> PathBuf {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        runtime_dir.join("keyward").join("keyward.sock")
    }

    /// Accept connections until the task is aborted.
    pub async fn run(&self) -> Result<(), GatewayError> {
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if self.socket_path.exists() {
            tokio::fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(socket = %self.socket_path.display(), "Control socket listening");

        loop {
            let (stream, _addr) = listener.accept().await?;
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &state).await {
                    tracing::error!(error = %e, "Connection handler error");
                }
            });
        }
    }
}

async fn handle_connection(stream: UnixStream, state: &ControlState) -> Result<(), GatewayError> {
    let caller = CallerInfo::from_stream(&stream);
    let actor = caller
        .as_ref()
        .map(|c| c.actor_string())
        .unwrap_or_else(|| UNKNOWN_CALLER.to_string());
    if let Some(info) = &caller {
        tracing::info!(%info, "Client connected");
    }

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let response = process_request(&line, state, &actor).await;
        let mut json = serde_json::to_string(&response)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch one request line.
pub(crate) async fn process_request(raw: &str, state: &ControlState, actor: &str) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => return JsonRpcResponse::parse_error(format!("Parse error: {}", e)),
    };
    if let Err(e) = request.validate() {
        return JsonRpcResponse::error(request.id, INVALID_REQUEST, e);
    }

    let id = request.id;
    let params = &request.params;
    let result = match request.method.as_str() {
        "status" => handle_status(state),
        "credentials.list" => handle_list(state),
        "sync.reconcile" => handle_reconcile(state).await,
        "rotation.request" => handle_request(state, params, RotationReason::Manual, actor).await,
        "rotation.emergency" => handle_request(state, params, RotationReason::Emergency, actor).await,
        "rotation.approve" => handle_approve(state, params, actor),
        "rotation.complete" => handle_complete(state, params, actor).await,
        "rotation.rollback" => handle_rollback(state, params, actor).await,
        "rotation.jobs" => handle_jobs(state),
        "audit.query" => handle_audit(state, params),
        other => Err((METHOD_NOT_FOUND, format!("Unknown method: {}", other))),
    };

    match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err((code, message)) => JsonRpcResponse::error(id, code, message),
    }
}

type HandlerResult = Result<Value, (i32, String)>;

// ─── Method Handlers ─────────────────────────────────────────────────────────

fn handle_status(state: &ControlState) -> HandlerResult {
    let credentials = state.store.list_metadata().map_err(internal)?;
    let jobs = state.scheduler.jobs().map_err(rotation_error)?;
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "credential_file": state.store.path().display().to_string(),
        "credentials": credentials.len(),
        "active_jobs": jobs.iter().filter(|j| j.state.is_active()).count(),
        "awaiting_approval": jobs.iter().filter(|j| j.awaiting_approval).count(),
        "awaiting_manual": jobs.iter().filter(|j| j.awaiting_manual).count(),
    }))
}

fn handle_list(state: &ControlState) -> HandlerResult {
    let credentials = state.store.list_metadata().map_err(internal)?;
    to_value(&credentials)
}

async fn handle_reconcile(state: &ControlState) -> HandlerResult {
    let outcome = state.reconciler.run_once().await.map_err(internal)?;
    Ok(json!({ "reload": outcome.reload, "sync": outcome.sync }))
}

#[derive(Deserialize)]
struct NameParams {
    name: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn handle_request(state: &ControlState, params: &Value, reason: RotationReason, actor: &str) -> HandlerResult {
    let p: NameParams = parse_params(params)?;
    if let Some(why) = &p.reason {
        tracing::warn!(credential = %p.name, kind = %reason, reason = %why, actor = %actor, "Rotation requested");
    }
    let job = state
        .scheduler
        .request_rotation(&p.name, reason, actor)
        .await
        .map_err(rotation_error)?;
    to_value(&job)
}

fn handle_approve(state: &ControlState, params: &Value, actor: &str) -> HandlerResult {
    let p: NameParams = parse_params(params)?;
    let job = state.scheduler.approve(&p.name, actor).map_err(rotation_error)?;
    to_value(&job)
}

#[derive(Deserialize)]
struct CompleteParams {
    name: String,
    value: String,
}

async fn handle_complete(state: &ControlState, params: &Value, actor: &str) -> HandlerResult {
    let p: CompleteParams = parse_params(params)?;
    if p.value.is_empty() {
        return Err((INVALID_PARAMS, "'value' must not be empty".to_string()));
    }
    let job = state
        .scheduler
        .complete_manual_rotation(&p.name, Zeroizing::new(p.value), actor)
        .await
        .map_err(rotation_error)?;
    to_value(&job)
}

async fn handle_rollback(state: &ControlState, params: &Value, actor: &str) -> HandlerResult {
    let p: NameParams = parse_params(params)?;
    let job = state.scheduler.rollback(&p.name, actor).await.map_err(rotation_error)?;
    to_value(&job)
}

fn handle_jobs(state: &ControlState) -> HandlerResult {
    let current = state.scheduler.jobs().map_err(rotation_error)?;
    let history = state.scheduler.history().map_err(rotation_error)?;
    Ok(json!({ "current": current, "history": history }))
}

fn handle_audit(state: &ControlState, params: &Value) -> HandlerResult {
    let query: AuditQuery = if params.is_null() {
        AuditQuery::default()
    } else {
        parse_params(params)?
    };
    let records = state.audit.query(&query).map_err(internal)?;
    to_value(&records)
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, (i32, String)> {
    serde_json::from_value(params.clone()).map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))
}

fn to_value<T: serde::Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(internal)
}

fn internal(e: impl std::fmt::Display) -> (i32, String) {
    (INTERNAL_ERROR, e.to_string())
}

fn rotation_error(e: RotationError) -> (i32, String) {
    let code = match &e {
        RotationError::Conflict { .. } => CONFLICT,
        RotationError::UnknownCredential(_) | RotationError::NoJob(_) => NOT_FOUND,
        RotationError::InvalidState { .. } | RotationError::NotRotatable(_) | RotationError::NoProvider(_) => {
            INVALID_STATE
        }
        RotationError::ValidationFailed(_) => VALIDATION_FAILED,
        _ => INTERNAL_ERROR,
    };
    (code, e.to_string())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
