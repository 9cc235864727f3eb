#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Chat-driven operator core for the `loadlab` deployment.
//!
//! This crate turns authenticated natural-language commands into
//! at-most-one-at-a-time mutations of a single fixed deployment: a
//! classifier routes each message, a priority queue and FIFO lock
//! serialize the mutating ones through a single worker, and an in-memory
//! registry exposes the observable execution state.

pub mod auth;
pub mod chat;
pub mod cluster;
pub mod config;
pub mod error;
pub mod exec;
pub mod policy;
pub mod server;

// Re-export commonly used types
pub use auth::{AuthVerifier, RoleClaim, VerifiedIdentity};
pub use chat::{classify, CommandAction, CommandKind, ParsedCommand};
pub use cluster::{ClusterAdapter, ClusterError, DeploymentStatus, KubeAdapter};
pub use error::ServiceError;
pub use exec::{CommandQueue, ExecutionRegistry, FifoLock, ScheduledCommand, Worker};
pub use policy::{priority_for, Priority, QuotaPolicy, Role};
pub use server::{build_router, AppState};
