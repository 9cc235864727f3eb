//! HTTP boundary and policy gate.
//!
//! Every request is authenticated, classified, and either answered
//! synchronously (HELP, READ, DRY_RUN) or turned into a scheduled command
//! (EXECUTE). The gate never executes anything itself and never waits for
//! the worker: an accepted EXECUTE returns immediately with its queue
//! position.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{AuthVerifier, RoleClaim, VerifiedIdentity};
use crate::chat::{classify, help, CommandAction, CommandKind, ParsedCommand};
use crate::cluster::{validate_replicas, ClusterAdapter};
use crate::config::{DEPLOYMENT, MAX_REPLICAS, MIN_REPLICAS};
use crate::error::{ApiResult, ServiceError};
use crate::exec::{CommandQueue, ExecutionRegistry, ScheduledCommand};
use crate::policy::{priority_for, QuotaPolicy, Role};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthVerifier>,
    pub policy: Arc<QuotaPolicy>,
    pub queue: Arc<CommandQueue>,
    pub registry: Arc<ExecutionRegistry>,
    pub cluster: Arc<dyn ClusterAdapter>,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/internal/status", get(internal_status))
        .route("/internal/health", get(internal_health))
        // Probes
        .route("/healthz", get(health_check))
        .route("/readyz", get(readiness_check))
        .with_state(state)
}

/// Liveness probe.
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "loadlab-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe.
async fn readiness_check() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "loadlab-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Resolve the verified caller identity from the Authorization header.
fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<VerifiedIdentity, ServiceError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing Authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ServiceError::Unauthorized("expected a bearer token".to_string()))?;

    state.auth.verify(token)
}

/// Handle a chat message.
async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let identity = resolve_identity(&state, &headers)?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| ServiceError::Validation("body must be a JSON object".to_string()))?;
    // Only `message` is consulted; a role field in the body is ignored and
    // the effective role is re-derived from the verified identity.
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::Validation("missing string field 'message'".to_string()))?;

    let parsed = classify(message);
    let role = state.policy.derive_role(&identity).await;

    debug!(
        user_id = %identity.user_id,
        kind = parsed.kind.name(),
        "Classified chat message"
    );

    match parsed.kind.clone() {
        CommandKind::Help => handle_help(&state, &identity, role).await,
        CommandKind::Read => handle_read(&state, message).await,
        CommandKind::DryRun(action) => handle_dry_run(&state, action).await,
        CommandKind::Execute(action) => {
            handle_execute(&state, &identity, role, parsed, action).await
        }
    }
}

/// HELP: synthesize a role-tailored document. Never enqueues.
async fn handle_help(
    state: &AppState,
    identity: &VerifiedIdentity,
    role: Role,
) -> ApiResult<Json<Value>> {
    let quota_remaining = if identity.role_claim == RoleClaim::Free {
        Some(state.policy.remaining(&identity.user_id).await)
    } else {
        None
    };

    Ok(Json(json!({
        "type": "HELP",
        "help": help::help_document(role, quota_remaining),
    })))
}

/// READ: shape an answer from the cluster and/or the registry. Never
/// enqueues.
async fn handle_read(state: &AppState, message: &str) -> ApiResult<Json<Value>> {
    let text = message.to_lowercase();

    if text.contains("queue") {
        let snapshot = state.registry.snapshot();
        return Ok(Json(json!({
            "type": "READ",
            "subtype": "queue",
            "system": {
                "workerStatus": snapshot.worker_status,
                "queueLength": snapshot.queue_length,
                "currentCommand": snapshot.current_command,
                "queued": state.queue.snapshot(),
            }
        })));
    }

    if text.contains("status") || text.contains("pod") || text.contains("replica") {
        let deployment = state.cluster.status("gate-read").await?;
        return Ok(Json(json!({
            "type": "READ",
            "subtype": "deployment",
            "deployment": deployment,
        })));
    }

    // Fallback: a combined view, with the cluster read best-effort so an
    // unreachable API server does not hide queue state.
    let deployment = state.cluster.status("gate-read").await.ok();
    let snapshot = state.registry.snapshot();
    Ok(Json(json!({
        "type": "READ",
        "subtype": "overview",
        "deployment": deployment,
        "system": {
            "workerStatus": snapshot.worker_status,
            "queueLength": snapshot.queue_length,
            "currentCommand": snapshot.current_command,
            "lastResult": snapshot.last_result,
        }
    })))
}

/// Direction a scale request would move the deployment.
fn scale_direction(current: Option<i32>, requested: i64) -> &'static str {
    match current {
        Some(current) if i64::from(current) < requested => "scale-up",
        Some(current) if i64::from(current) > requested => "scale-down",
        Some(_) => "no-change",
        None => "unknown",
    }
}

/// DRY_RUN: preview without mutating. Never enqueues.
async fn handle_dry_run(
    state: &AppState,
    action: Option<CommandAction>,
) -> ApiResult<Json<Value>> {
    // Best-effort: a preview is still useful with the cluster unreachable.
    let current = state.cluster.status("gate-dryrun").await.ok();
    let current_replicas = current.as_ref().map(|s| s.replicas);

    let (preview, would_execute, warnings) = match action {
        Some(CommandAction::Scale { replicas }) => {
            let mut warnings = Vec::new();
            let in_bounds = validate_replicas(replicas).is_ok();
            if !in_bounds {
                warnings.push(format!(
                    "requested replica count {replicas} is outside the allowed range \
                     {MIN_REPLICAS}-{MAX_REPLICAS}"
                ));
            }
            let preview = json!({
                "action": "scale",
                "currentReplicas": current_replicas,
                "requestedReplicas": replicas,
                "direction": scale_direction(current_replicas, replicas),
            });
            (preview, in_bounds, warnings)
        }
        Some(CommandAction::Restart) => {
            let preview = json!({
                "action": "restart",
                "currentReplicas": current_replicas,
                "note": format!(
                    "would trigger a rolling restart of '{DEPLOYMENT}'; pods are replaced \
                     gradually and none are deleted directly"
                ),
            });
            (preview, true, Vec::new())
        }
        None => {
            let preview = json!({ "action": null });
            (
                preview,
                false,
                vec!["no actionable command recognized in the dry-run text".to_string()],
            )
        }
    };

    Ok(Json(json!({
        "type": "DRY_RUN",
        "preview": preview,
        "simulation": {
            "wouldExecute": would_execute,
            "warnings": warnings,
        }
    })))
}

/// EXECUTE: validate, attach a priority class, enqueue, and return the
/// acceptance. Returns before the worker runs anything.
async fn handle_execute(
    state: &AppState,
    identity: &VerifiedIdentity,
    role: Role,
    parsed: ParsedCommand,
    action: CommandAction,
) -> ApiResult<Json<Value>> {
    if let CommandAction::Scale { replicas } = action {
        validate_replicas(replicas).map_err(ServiceError::from)?;
    }

    // Free tier is quota-bound; the check runs against the pre-increment
    // view, so the command consuming the final slot is still accepted.
    if identity.role_claim == RoleClaim::Free
        && state.policy.remaining(&identity.user_id).await == 0
    {
        warn!(user_id = %identity.user_id, "Free-tier quota exhausted");
        return Err(ServiceError::QuotaExceeded(
            "free tier command quota exhausted for this session".to_string(),
        ));
    }

    let priority = priority_for(role);
    let command = ScheduledCommand::new(identity.user_id.clone(), priority, parsed);

    // Best-effort snapshot of the deployment before the mutation.
    let before = state.cluster.status("gate-before").await.ok();

    if role == Role::Free {
        state.policy.increment(&identity.user_id).await;
    }

    let position = state.queue.enqueue(command.clone());

    info!(
        execution_id = %command.execution_id,
        command_id = %command.command_id,
        user_id = %identity.user_id,
        phase = "queued",
        priority = priority.class(),
        queue_position = position,
        "Command accepted"
    );

    let mut user = json!({ "role": role });
    if identity.role_claim == RoleClaim::Free {
        user["quotaRemaining"] = json!(state.policy.remaining(&identity.user_id).await);
    }

    let mut response = json!({
        "status": "accepted",
        "commandId": command.command_id,
        "executionId": command.execution_id,
        "execution": {
            "priority": priority.class(),
            "priorityLabel": priority.label(),
            "queuePosition": position,
        },
        "user": user,
    });
    if let Some(before) = before {
        response["before"] = json!(before);
    }

    Ok(Json(response))
}

/// Authenticated snapshot of the pipeline.
async fn internal_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    resolve_identity(&state, &headers)?;

    let snapshot = state.registry.snapshot();
    Ok(Json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "system": {
            "workerStatus": snapshot.worker_status,
            "queueLength": snapshot.queue_length,
            "currentCommand": snapshot.current_command,
            "lastResult": snapshot.last_result,
        }
    })))
}

/// Admin-only health view, including the mutex and last error.
async fn internal_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let identity = resolve_identity(&state, &headers)?;
    if identity.role_claim != RoleClaim::Admin {
        return Err(ServiceError::Forbidden(
            "health detail requires the admin role".to_string(),
        ));
    }

    let snapshot = state.registry.snapshot();
    Ok(Json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "system": {
            "workerStatus": snapshot.worker_status,
            "queueLength": snapshot.queue_length,
            "currentCommand": snapshot.current_command,
            "lastResult": snapshot.last_result,
            "mutex": snapshot.mutex_status,
            "uptimeMs": snapshot.uptime_ms,
            "lastError": snapshot.last_error,
        }
    })))
}
