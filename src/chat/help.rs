//! Role-tailored help documents.

use serde_json::{json, Value};

use crate::config::{DEPLOYMENT, FREE_QUOTA_LIMIT, MAX_REPLICAS, MIN_REPLICAS};
use crate::policy::Role;

/// Build the help document for a caller.
///
/// Everyone sees the command vocabulary; free-tier callers see their
/// remaining quota and admins see the internal endpoints.
#[must_use]
pub fn help_document(role: Role, quota_remaining: Option<u32>) -> Value {
    let mut help = json!({
        "deployment": DEPLOYMENT,
        "role": role,
        "commands": [
            {
                "command": format!("scale {DEPLOYMENT} to <n>"),
                "description": format!(
                    "Set the replica count ({MIN_REPLICAS}-{MAX_REPLICAS})"
                ),
            },
            {
                "command": "restart",
                "description": "Rolling restart of the deployment",
            },
            {
                "command": "status",
                "description": "Current replicas, ready pods, and queue state",
            },
            {
                "command": "dry run <command>",
                "description": "Preview what a command would do without executing it",
            },
            {
                "command": "help",
                "description": "This document",
            },
        ],
        "examples": [
            format!("scale {DEPLOYMENT} to 3"),
            "dry run scale to 5",
            "what happens if i restart",
            "how many pods are running",
        ],
    });

    if let Some(remaining) = quota_remaining {
        help["quota"] = json!({
            "limit": FREE_QUOTA_LIMIT,
            "remaining": remaining,
            "note": "Free-tier commands are limited per session; exhausted quota resets on service restart",
        });
    }

    if role == Role::Admin {
        help["internal"] = json!([
            { "endpoint": "GET /internal/status", "description": "Worker and queue snapshot" },
            { "endpoint": "GET /internal/health", "description": "Full health including mutex and last error" },
        ]);
    }

    help
}
