//! End-to-end tests for the chat → gate → queue → worker pipeline.
//!
//! These drive the real HTTP boundary against a scriptable stub cluster:
//! the only fake is the Kubernetes API itself.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use loadlab_operator::cluster::{
    validate_replicas, ClusterAdapter, ClusterError, DeploymentStatus, PodInfo,
};
use loadlab_operator::{
    build_router, AppState, AuthVerifier, CommandQueue, ExecutionRegistry, FifoLock, QuotaPolicy,
    Worker,
};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::net::TcpListener;

const SECRET: &str = "test-signing-secret";

type HmacSha256 = Hmac<Sha256>;

/// Mint a bearer token the way the auth provider does.
fn mint_token(user_id: &str, role: &str) -> String {
    let claims = json!({ "sub": user_id, "role": role }).to_string();
    let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(claims.as_bytes());
    let signature = mac.finalize().into_bytes();
    format!("{}.{}", hex::encode(claims), hex::encode(signature))
}

// =============================================================================
// Stub cluster
// =============================================================================

/// Scriptable cluster stand-in. Records every mutation and tracks how many
/// are in flight at once.
struct StubCluster {
    /// Replica count reported by `status`.
    replicas: AtomicI64,
    /// When false, `scale` is accepted but `status` keeps reporting the
    /// old count (verification-mismatch scenario).
    track_requested: bool,
    fail_scale: AtomicBool,
    mutation_delay: Duration,
    events: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl StubCluster {
    fn base() -> Self {
        Self {
            replicas: AtomicI64::new(2),
            track_requested: true,
            fail_scale: AtomicBool::new(false),
            mutation_delay: Duration::from_millis(0),
            events: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn new() -> Arc<Self> {
        Arc::new(Self::base())
    }

    fn stale() -> Arc<Self> {
        Arc::new(Self {
            track_requested: false,
            ..Self::base()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mutation_delay: delay,
            ..Self::base()
        })
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    async fn enter_mutation(&self, event: String) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.events.lock().unwrap().push(event);
        tokio::time::sleep(self.mutation_delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterAdapter for StubCluster {
    async fn scale(&self, replicas: i64, _execution_id: &str) -> Result<(), ClusterError> {
        validate_replicas(replicas)?;
        self.enter_mutation(format!("scale:{replicas}")).await;
        if self.fail_scale.load(Ordering::SeqCst) {
            return Err(ClusterError::Patch("injected scale failure".to_string()));
        }
        if self.track_requested {
            self.replicas.store(replicas, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn restart(&self, _execution_id: &str) -> Result<(), ClusterError> {
        self.enter_mutation("restart".to_string()).await;
        Ok(())
    }

    async fn status(&self, _execution_id: &str) -> Result<DeploymentStatus, ClusterError> {
        let replicas = i32::try_from(self.replicas.load(Ordering::SeqCst)).unwrap();
        Ok(DeploymentStatus {
            replicas,
            ready_replicas: replicas,
            pods: (0..replicas)
                .map(|i| PodInfo {
                    name: format!("loadlab-{i}"),
                    start_time: None,
                })
                .collect(),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    addr: SocketAddr,
    queue: Arc<CommandQueue>,
    registry: Arc<ExecutionRegistry>,
    worker: Arc<Worker>,
    http: reqwest::Client,
}

impl Harness {
    /// Stand up the full service against the given stub. The worker is
    /// built but not started; tests start it when they need execution.
    async fn start(cluster: Arc<StubCluster>) -> Self {
        let registry = Arc::new(ExecutionRegistry::new());
        let queue = Arc::new(CommandQueue::new(registry.clone()));
        let lock = Arc::new(FifoLock::new());
        let worker = Arc::new(Worker::new(
            queue.clone(),
            lock,
            registry.clone(),
            cluster.clone(),
        ));

        let state = AppState {
            auth: Arc::new(AuthVerifier::new(SECRET.to_string())),
            policy: Arc::new(QuotaPolicy::new()),
            queue: queue.clone(),
            registry: registry.clone(),
            cluster,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for the server to accept connections.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            addr,
            queue,
            registry,
            worker,
            http: reqwest::Client::new(),
        }
    }

    async fn chat(&self, token: &str, message: &str) -> reqwest::Response {
        self.http
            .post(format!("http://{}/chat", self.addr))
            .bearer_auth(token)
            .json(&json!({ "message": message }))
            .send()
            .await
            .unwrap()
    }

    async fn wait_for_terminal_result(&self) -> Value {
        for _ in 0..200 {
            let snapshot = self.registry.snapshot();
            if let Some(result) = snapshot.last_result {
                let value = serde_json::to_value(&result).unwrap();
                if value["status"] == "success" || value["status"] == "failed" {
                    return value;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no terminal result observed");
    }

    async fn wait_for_drained(&self, cluster: &StubCluster, expected_events: usize) {
        for _ in 0..200 {
            if cluster.events().len() >= expected_events && self.queue.size() == 0 {
                let snapshot = self.registry.snapshot();
                if serde_json::to_value(snapshot.worker_status).unwrap() == "idle" {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("pipeline never drained");
    }
}

// =============================================================================
// Tests
// =============================================================================

/// A plea for help never mutates, even when it mentions scaling.
#[tokio::test]
async fn help_precedence_over_scale() {
    let cluster = StubCluster::new();
    let h = Harness::start(cluster.clone()).await;

    let resp = h.chat(&mint_token("u-1", "FREE"), "help me scale to 3").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "HELP");
    assert!(body["help"]["commands"].is_array());

    assert_eq!(h.queue.size(), 0);
    assert!(cluster.events().is_empty());
}

/// Out-of-bounds dry run warns about the replica range and does not enqueue.
#[tokio::test]
async fn dry_run_flags_out_of_bounds_scale() {
    let cluster = StubCluster::new(); // reports 2 replicas
    let h = Harness::start(cluster.clone()).await;

    let resp = h
        .chat(&mint_token("u-1", "NORMAL"), "dry run scale loadlab to 9")
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "DRY_RUN");
    assert_eq!(body["simulation"]["wouldExecute"], false);
    assert_eq!(body["preview"]["currentReplicas"], 2);
    let warnings = body["simulation"]["warnings"].to_string();
    assert!(warnings.contains("1-5"));

    assert_eq!(h.queue.size(), 0);
    assert!(cluster.events().is_empty());
}

/// An admin command submitted later overtakes a waiting normal command.
#[tokio::test]
async fn admin_overtakes_normal_in_queue() {
    let cluster = StubCluster::new();
    let h = Harness::start(cluster.clone()).await;

    let resp = h
        .chat(&mint_token("u-normal", "NORMAL"), "scale loadlab to 4")
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["execution"]["priority"], 3);
    assert_eq!(body["execution"]["queuePosition"], 1);

    let resp = h.chat(&mint_token("u-admin", "ADMIN"), "restart").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["execution"]["priority"], 1);
    // The admin command jumps ahead of the waiting normal one.
    assert_eq!(body["execution"]["queuePosition"], 1);

    h.worker.start();
    h.wait_for_drained(&cluster, 2).await;
    h.worker.stop();

    assert_eq!(cluster.events(), ["restart", "scale:4"]);
}

/// Free tier: three accepted commands counting down the quota, then 429.
#[tokio::test]
async fn free_tier_quota_exhaustion() {
    let cluster = StubCluster::new();
    let h = Harness::start(cluster.clone()).await;
    let token = mint_token("u-free", "FREE");

    for expected_remaining in [2, 1, 0] {
        let resp = h.chat(&token, "restart").await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["user"]["quotaRemaining"], expected_remaining);
        assert_eq!(body["user"]["role"], "FREE");
        assert_eq!(body["execution"]["priority"], 2);
    }

    let resp = h.chat(&token, "restart").await;
    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorType"], "QUOTA_EXCEEDED");

    // The rejected command was never enqueued.
    assert_eq!(h.queue.size(), 3);
}

/// A scale the cluster accepts but does not reflect is reported FAILED,
/// and the pipeline keeps going.
#[tokio::test]
async fn verification_mismatch_is_failed_and_pipeline_continues() {
    let cluster = StubCluster::stale(); // status keeps reporting 2
    let h = Harness::start(cluster.clone()).await;
    h.worker.start();

    let resp = h
        .chat(&mint_token("u-admin", "ADMIN"), "scale loadlab to 3")
        .await;
    assert_eq!(resp.status(), 200);

    let result = h.wait_for_terminal_result().await;
    assert_eq!(result["status"], "failed");
    assert!(result["error"].as_str().unwrap().contains("verification"));

    // Mutex and worker settled; the next command executes.
    let resp = h.chat(&mint_token("u-admin", "ADMIN"), "restart").await;
    assert_eq!(resp.status(), 200);
    h.wait_for_drained(&cluster, 2).await;
    h.worker.stop();

    let health = serde_json::to_value(h.registry.snapshot().mutex_status).unwrap();
    assert_eq!(health, "free");
}

/// Graceful shutdown lets the in-flight command finish and starts nothing
/// new, even for commands accepted during the shutdown window.
#[tokio::test]
async fn graceful_shutdown_mid_execution() {
    let cluster = StubCluster::slow(Duration::from_millis(400));
    let h = Harness::start(cluster.clone()).await;
    h.worker.start();

    let resp = h.chat(&mint_token("u-admin", "ADMIN"), "restart").await;
    assert_eq!(resp.status(), 200);

    // Let the worker pick it up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cluster.events().len(), 1);

    let shutdown = {
        let worker = h.worker.clone();
        tokio::spawn(async move { worker.graceful_shutdown().await })
    };

    // Accepted during the shutdown window; must not start.
    let resp = h.chat(&mint_token("u-admin", "ADMIN"), "restart").await;
    assert_eq!(resp.status(), 200);

    shutdown.await.unwrap();

    let snapshot = h.registry.snapshot();
    assert_eq!(
        serde_json::to_value(snapshot.worker_status).unwrap(),
        "idle"
    );
    let result = serde_json::to_value(snapshot.last_result.unwrap()).unwrap();
    assert!(result["status"] == "success" || result["status"] == "failed");
    assert_eq!(cluster.events().len(), 1);
    assert_eq!(h.queue.size(), 1);
}

/// Mutations never overlap, whatever the submission interleaving.
#[tokio::test]
async fn mutations_are_serialized() {
    let cluster = StubCluster::slow(Duration::from_millis(50));
    let h = Harness::start(cluster.clone()).await;

    let mut submissions = Vec::new();
    for i in 0..6 {
        let role = if i % 2 == 0 { "ADMIN" } else { "NORMAL" };
        let token = mint_token(&format!("u-{i}"), role);
        let h_addr = h.addr;
        let http = h.http.clone();
        submissions.push(tokio::spawn(async move {
            http.post(format!("http://{h_addr}/chat"))
                .bearer_auth(token)
                .json(&json!({ "message": "restart" }))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for s in submissions {
        assert_eq!(s.await.unwrap(), 200);
    }

    h.worker.start();
    h.wait_for_drained(&cluster, 6).await;
    h.worker.stop();

    assert_eq!(cluster.events().len(), 6);
    assert_eq!(cluster.peak.load(Ordering::SeqCst), 1);
}

/// Missing and malformed credentials, and malformed bodies.
#[tokio::test]
async fn auth_and_validation_failures() {
    let h = Harness::start(StubCluster::new()).await;

    // No Authorization header.
    let resp = h
        .http
        .post(format!("http://{}/chat", h.addr))
        .json(&json!({ "message": "help" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorType"], "AUTH_REQUIRED");
    assert!(body["timestamp"].is_string());

    // Forged token.
    let resp = h.chat("deadbeef.deadbeef", "help").await;
    assert_eq!(resp.status(), 401);

    // Valid token, missing message field.
    let resp = h
        .http
        .post(format!("http://{}/chat", h.addr))
        .bearer_auth(mint_token("u-1", "NORMAL"))
        .json(&json!({ "text": "help" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorType"], "VALIDATION_ERROR");

    // Out-of-bounds execute is rejected before enqueue.
    let resp = h
        .chat(&mint_token("u-1", "NORMAL"), "scale loadlab to 9")
        .await;
    assert_eq!(resp.status(), 400);
    assert_eq!(h.queue.size(), 0);
}

/// Reads answer from state and never enqueue.
#[tokio::test]
async fn reads_answer_without_enqueueing() {
    let cluster = StubCluster::new();
    let h = Harness::start(cluster.clone()).await;

    let resp = h
        .chat(&mint_token("u-1", "NORMAL"), "how many pods are running")
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "READ");
    assert_eq!(body["subtype"], "deployment");
    assert_eq!(body["deployment"]["replicas"], 2);

    let resp = h
        .chat(&mint_token("u-1", "NORMAL"), "show me the queue")
        .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "READ");
    assert_eq!(body["subtype"], "queue");

    assert_eq!(h.queue.size(), 0);
    assert!(cluster.events().is_empty());
}

/// The internal surface: status for any caller, health for admins only.
#[tokio::test]
async fn internal_endpoints_enforce_auth() {
    let h = Harness::start(StubCluster::new()).await;

    let resp = h
        .http
        .get(format!("http://{}/internal/status", h.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = h
        .http
        .get(format!("http://{}/internal/status", h.addr))
        .bearer_auth(mint_token("u-1", "NORMAL"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["system"]["workerStatus"], "idle");
    assert_eq!(body["system"]["queueLength"], 0);

    let resp = h
        .http
        .get(format!("http://{}/internal/health", h.addr))
        .bearer_auth(mint_token("u-1", "NORMAL"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorType"], "AUTH_FORBIDDEN");

    let resp = h
        .http
        .get(format!("http://{}/internal/health", h.addr))
        .bearer_auth(mint_token("u-admin", "ADMIN"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["system"]["mutex"], "free");
    assert!(body["system"]["uptimeMs"].is_number());
}

/// The third free-tier command still runs at priority 2 (pre-increment
/// view), and acceptance reports the before snapshot.
#[tokio::test]
async fn third_free_command_keeps_free_priority() {
    let h = Harness::start(StubCluster::new()).await;
    let token = mint_token("u-free", "FREE");

    h.chat(&token, "restart").await;
    h.chat(&token, "restart").await;
    let resp = h.chat(&token, "scale loadlab to 3").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["execution"]["priority"], 2);
    assert_eq!(body["execution"]["priorityLabel"], "free-tier");
    assert_eq!(body["user"]["quotaRemaining"], 0);
    assert_eq!(body["before"]["replicas"], 2);
}
