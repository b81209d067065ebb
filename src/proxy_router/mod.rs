//! ProxyRouter - Probe-and-redirect dispatch over search and file backends
//!
//! ## Responsibilities
//!
//! - Race health probes against every backend of a role
//! - Redirect the client to the first healthy backend (same path and query)
//! - Periodically rebuild the union of backend target features
//!
//! The router never proxies bytes; it only picks a host.

use crate::error::{Error, Result};
use crate::request_pool::{CompletedProbe, ProbeHandle, ProbeRequest, RequestPool};
use reqwest::Url;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const HEALTH_ENDPOINT: &str = "/health";
pub const TARGET_FEATURES_ENDPOINT: &str = "/target_features";
pub const TARGET_FEATURES_KEY: &str = "target_features";

/// Kind of backend a request is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    Search,
    File,
}

impl BackendRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendRole::Search => "search",
            BackendRole::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub host: Url,
    pub role: BackendRole,
}

impl BackendDescriptor {
    /// Parse a comma-separated list of base URLs
    pub fn parse_list(raw: &str, role: BackendRole) -> Result<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Url::parse(s)
                    .map(|host| Self { host, role })
                    .map_err(|e| Error::Config(format!("invalid {} backend {}: {}", role.as_str(), s, e)))
            })
            .collect()
    }
}

/// Per-role probe settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePolicy {
    pub timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_concurrency: 1,
        }
    }
}

/// Builds the outbound probe calls
pub trait Prober: Send + Sync {
    fn probe(&self, url: Url, timeout: Duration) -> ProbeRequest;
}

/// reqwest-backed prober
#[derive(Debug, Clone, Default)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Prober for HttpProber {
    fn probe(&self, url: Url, timeout: Duration) -> ProbeRequest {
        ProbeRequest::get(&self.client, url, Vec::new(), timeout)
    }
}

/// Result of one probe race
pub struct Race {
    pub winner: Option<CompletedProbe>,
    /// One handle per backend, in configuration order
    pub handles: Vec<ProbeHandle>,
}

/// Stateless edge router
pub struct ProxyRouter {
    search_backends: Vec<BackendDescriptor>,
    file_backends: Vec<BackendDescriptor>,
    search_policy: RolePolicy,
    file_policy: RolePolicy,
    prober: Arc<dyn Prober>,
    /// Union of search backend features; held for the whole sync round
    target_features: Mutex<Vec<String>>,
    sync_interval: Duration,
}

impl ProxyRouter {
    pub fn new(
        backends: Vec<BackendDescriptor>,
        search_policy: RolePolicy,
        file_policy: RolePolicy,
        prober: Arc<dyn Prober>,
        sync_interval: Duration,
    ) -> Self {
        let (search_backends, file_backends) = backends
            .into_iter()
            .partition(|b| b.role == BackendRole::Search);

        Self {
            search_backends,
            file_backends,
            search_policy,
            file_policy,
            prober,
            target_features: Mutex::new(Vec::new()),
            sync_interval,
        }
    }

    pub fn backends(&self, role: BackendRole) -> &[BackendDescriptor] {
        match role {
            BackendRole::Search => &self.search_backends,
            BackendRole::File => &self.file_backends,
        }
    }

    fn policy(&self, role: BackendRole) -> RolePolicy {
        match role {
            BackendRole::Search => self.search_policy,
            BackendRole::File => self.file_policy,
        }
    }

    /// Probe `probe_path` on every backend of `role`; the first ok wins
    pub async fn race(&self, role: BackendRole, probe_path: &str, query: Option<&str>) -> Result<Race> {
        let backends = self.backends(role);
        if backends.is_empty() {
            return Err(Error::NotSupported(role.as_str().to_string()));
        }

        let policy = self.policy(role);
        let requests = backends
            .iter()
            .map(|b| -> Result<ProbeRequest> {
                let url = probe_url(&b.host, probe_path, query)?;
                Ok(self.prober.probe(url, policy.timeout))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pool = RequestPool::new(policy.max_concurrency);
        let handles = pool.submit(requests);
        let winner = pool.first_success().await;

        Ok(Race { winner, handles })
    }

    /// Pick a healthy backend and build the redirect target
    ///
    /// The target keeps the winner's scheme and authority and takes the
    /// client's path and query.
    pub async fn resolve_redirect(
        &self,
        role: BackendRole,
        operation: &str,
        probe_path: &str,
        request_path: &str,
        query: Option<&str>,
    ) -> Result<Url> {
        let started = Instant::now();
        let race = self.race(role, probe_path, query).await?;

        let Some(winner) = race.winner else {
            return Err(Error::BackendUnavailable {
                operation: operation.to_string(),
                detail: format!("all {} {} probes failed", race.handles.len(), role.as_str()),
            });
        };

        let backend = &self.backends(role)[winner.handle.index()];
        let mut target = winner
            .outcome
            .url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .unwrap_or_else(|| backend.host.clone());
        target.set_path(request_path);
        target.set_query(query.filter(|q| !q.is_empty()));

        tracing::debug!(
            operation = %operation,
            backend = %backend.host,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Redirecting to backend"
        );
        Ok(target)
    }

    /// Rebuild the target feature set from every search backend
    pub async fn sync_target_features(&self) -> usize {
        let mut target_features = self.target_features.lock().await;
        tracing::debug!(backends = self.search_backends.len(), "Syncing target features");

        let policy = self.search_policy;
        let requests: Vec<ProbeRequest> = self
            .search_backends
            .iter()
            .filter_map(|b| match probe_url(&b.host, TARGET_FEATURES_ENDPOINT, None) {
                Ok(url) => Some(self.prober.probe(url, policy.timeout)),
                Err(e) => {
                    tracing::warn!(backend = %b.host, error = %e, "Skipping backend");
                    None
                }
            })
            .collect();

        let mut pool = RequestPool::new(policy.max_concurrency);
        pool.submit(requests);

        let mut union = BTreeSet::new();
        for completed in pool.collect_all().await {
            if !completed.outcome.ok {
                tracing::debug!(
                    backend = %completed.handle.label(),
                    error = ?completed.outcome.error,
                    "Target features probe failed"
                );
                continue;
            }
            let names = completed
                .outcome
                .payload
                .as_ref()
                .and_then(|p| p.get(TARGET_FEATURES_KEY))
                .and_then(|v| v.as_array());
            if let Some(names) = names {
                union.extend(names.iter().filter_map(|n| n.as_str()).map(str::to_string));
            }
        }

        *target_features = union.into_iter().collect();
        tracing::info!(count = target_features.len(), "Target features synced");
        target_features.len()
    }

    /// Last synced feature set; waits while a sync round is running
    pub async fn target_features(&self) -> Result<Vec<String>> {
        if self.search_backends.is_empty() {
            return Err(Error::NotSupported(BackendRole::Search.as_str().to_string()));
        }
        Ok(self.target_features.lock().await.clone())
    }

    /// Start the periodic sync loop
    pub fn spawn_target_features_sync(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.sync_interval);
            loop {
                interval.tick().await;
                self.sync_target_features().await;
            }
        })
    }
}

fn probe_url(host: &Url, path: &str, query: Option<&str>) -> Result<Url> {
    let mut url = host
        .join(path)
        .map_err(|e| Error::Internal(format!("cannot join {} onto {}: {}", path, host, e)))?;
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_pool::ProbeResponse;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Sets its flag when the owning future is dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    enum Behavior {
        Ok(serde_json::Value),
        Fail(u16),
        Hang(Arc<AtomicBool>),
    }

    /// Answers per host; records every probed URL
    struct FakeProber {
        behaviors: HashMap<String, Behavior>,
        probed: std::sync::Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl FakeProber {
        fn new(behaviors: Vec<(&str, Behavior)>) -> Self {
            Self {
                behaviors: behaviors
                    .into_iter()
                    .map(|(h, b)| (h.to_string(), b))
                    .collect(),
                probed: std::sync::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Prober for FakeProber {
        fn probe(&self, url: Url, _timeout: Duration) -> ProbeRequest {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.probed.lock().unwrap().push(url.to_string());
            let host = url.host_str().unwrap_or_default().to_string();
            let label = url.to_string();
            match self.behaviors.get(&host) {
                Some(Behavior::Ok(body)) => {
                    let body = body.clone();
                    ProbeRequest::new(label.clone(), async move {
                        Ok(ProbeResponse {
                            status: 200,
                            url: label,
                            body: Some(body),
                        })
                    })
                }
                Some(Behavior::Fail(status)) => {
                    let status = *status;
                    ProbeRequest::new(label.clone(), async move {
                        Ok(ProbeResponse {
                            status,
                            url: label,
                            body: None,
                        })
                    })
                }
                Some(Behavior::Hang(flag)) => {
                    let guard = DropFlag(flag.clone());
                    ProbeRequest::new(label, async move {
                        let _guard = guard;
                        futures::future::pending::<()>().await;
                        Err(Error::Internal("unreachable".to_string()))
                    })
                }
                None => ProbeRequest::new(label, async { Err(Error::Internal("connection refused".to_string())) }),
            }
        }
    }

    fn backends(role: BackendRole, hosts: &[&str]) -> Vec<BackendDescriptor> {
        hosts
            .iter()
            .map(|h| BackendDescriptor {
                host: Url::parse(&format!("http://{}:6901", h)).unwrap(),
                role,
            })
            .collect()
    }

    fn router(backends: Vec<BackendDescriptor>, prober: Arc<FakeProber>, max_concurrency: usize) -> ProxyRouter {
        let policy = RolePolicy {
            timeout: Duration::from_secs(1),
            max_concurrency,
        };
        ProxyRouter::new(backends, policy, policy, prober, Duration::from_secs(60))
    }

    #[test]
    fn test_parse_backend_list() {
        let parsed = BackendDescriptor::parse_list(" http://a:1 , ,http://b:2/", BackendRole::File).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].host.as_str(), "http://b:2/");
        assert!(BackendDescriptor::parse_list("not a url", BackendRole::File).is_err());
    }

    #[tokio::test]
    async fn test_redirect_to_only_healthy_backend() {
        let hang1 = Arc::new(AtomicBool::new(false));
        let hang3 = Arc::new(AtomicBool::new(false));
        let prober = Arc::new(FakeProber::new(vec![
            ("s1", Behavior::Hang(hang1.clone())),
            ("s2", Behavior::Ok(json!({"message": "alive"}))),
            ("s3", Behavior::Hang(hang3.clone())),
        ]));
        let router = router(backends(BackendRole::Search, &["s1", "s2", "s3"]), prober.clone(), 3);

        let race = router
            .race(BackendRole::Search, HEALTH_ENDPOINT, Some("q=cat"))
            .await
            .unwrap();
        let winner = race.winner.unwrap();
        assert_eq!(winner.handle.index(), 1);
        assert!(race.handles[0].is_cancelled());
        assert!(race.handles[2].is_cancelled());
        assert!(!race.handles[1].is_cancelled());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(hang1.load(Ordering::SeqCst));
        assert!(hang3.load(Ordering::SeqCst));

        let target = router
            .resolve_redirect(
                BackendRole::Search,
                "search_multimodal",
                HEALTH_ENDPOINT,
                "/search/multimodal",
                Some("q=cat&limit=10"),
            )
            .await
            .unwrap();
        assert_eq!(target.as_str(), "http://s2:6901/search/multimodal?q=cat&limit=10");
        assert!(prober
            .probed
            .lock()
            .unwrap()
            .contains(&"http://s1:6901/health?q=cat".to_string()));
    }

    #[tokio::test]
    async fn test_no_backends_is_not_supported() {
        let prober = Arc::new(FakeProber::new(Vec::new()));
        let router = router(backends(BackendRole::Search, &["s1"]), prober.clone(), 1);

        let err = router
            .resolve_redirect(BackendRole::File, "get_video", "/health/v1", "/file/v1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(ref role) if role == "file"));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_probes_failed() {
        let prober = Arc::new(FakeProber::new(vec![("f1", Behavior::Fail(404))]));
        let router = router(backends(BackendRole::File, &["f1", "f2"]), prober, 2);

        let err = router
            .resolve_redirect(BackendRole::File, "get_frame", "/health/v1/3", "/file/v1/3", None)
            .await
            .unwrap_err();
        let (status, message) = err.status_and_message();
        assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "get_frame errors");
    }

    #[tokio::test]
    async fn test_sync_target_features_union() {
        let prober = Arc::new(FakeProber::new(vec![
            ("s1", Behavior::Ok(json!({"target_features": ["clip", "blip"]}))),
            ("s2", Behavior::Ok(json!({"target_features": ["clip", "ocr_clip"]}))),
            ("s3", Behavior::Fail(500)),
        ]));
        let router = router(backends(BackendRole::Search, &["s1", "s2", "s3", "s4"]), prober, 2);

        assert!(router.target_features().await.unwrap().is_empty());
        assert_eq!(router.sync_target_features().await, 3);
        assert_eq!(
            router.target_features().await.unwrap(),
            vec!["blip".to_string(), "clip".to_string(), "ocr_clip".to_string()]
        );
    }

    #[tokio::test]
    async fn test_target_features_without_search_backends() {
        let prober = Arc::new(FakeProber::new(Vec::new()));
        let router = router(backends(BackendRole::File, &["f1"]), prober, 1);
        assert!(matches!(router.target_features().await, Err(Error::NotSupported(_))));
    }
}
