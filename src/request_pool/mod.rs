//! RequestPool - Bounded fan-out of outbound probes
//!
//! ## Responsibilities
//!
//! - Run submitted probes with at most `max_concurrency` in flight
//! - Hand back finished probes in completion order
//! - Turn transport failures (and panics) into `ok: false` outcomes
//! - Cancel whatever is still outstanding on `cancel_all` or drop
//!
//! Cancellation is best-effort: a probe whose network call already finished
//! may still have its result discarded.

use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

/// Raw answer from a backend
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    /// Final URL of the request (after client-side redirects)
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// Explicit result of one probe; `ok` drives the racing logic
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub status: Option<u16>,
    pub url: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    fn from_response(resp: ProbeResponse) -> Self {
        Self {
            ok: (200..300).contains(&resp.status),
            status: Some(resp.status),
            url: Some(resp.url),
            payload: resp.body,
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: None,
            url: None,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// A network call waiting to be submitted
pub struct ProbeRequest {
    label: String,
    call: BoxFuture<'static, Result<ProbeResponse>>,
}

impl ProbeRequest {
    /// Wrap an arbitrary call (used by non-HTTP probers and tests)
    pub fn new<F>(label: impl Into<String>, call: F) -> Self
    where
        F: std::future::Future<Output = Result<ProbeResponse>> + Send + 'static,
    {
        Self {
            label: label.into(),
            call: call.boxed(),
        }
    }

    /// GET `url` with the given query parameters
    pub fn get(
        client: &reqwest::Client,
        url: reqwest::Url,
        params: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        let label = url.to_string();
        let request = client.get(url).query(&params).timeout(timeout);
        Self::new(label, async move {
            let resp = request.send().await?;
            let status = resp.status().as_u16();
            let url = resp.url().to_string();
            let body = resp.json::<serde_json::Value>().await.ok();
            Ok(ProbeResponse { status, url, body })
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    completed: AtomicBool,
    cancelled: AtomicBool,
}

/// Caller-side view of a submitted probe
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    index: usize,
    label: String,
    state: Arc<ProbeState>,
}

impl ProbeHandle {
    /// Submission index within the pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// A finished probe
#[derive(Debug, Clone)]
pub struct CompletedProbe {
    pub handle: ProbeHandle,
    pub outcome: ProbeOutcome,
}

struct InFlight {
    handle: ProbeHandle,
    task: JoinHandle<()>,
}

/// Bounded-concurrency probe executor
pub struct RequestPool {
    semaphore: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<CompletedProbe>,
    rx: mpsc::UnboundedReceiver<CompletedProbe>,
    in_flight: Vec<InFlight>,
    outstanding: usize,
    /// Never reset, so indices stay unique across `cancel_all`
    next_index: usize,
}

impl RequestPool {
    /// Create a pool; `max_concurrency` below 1 is raised to 1
    pub fn new(max_concurrency: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tx,
            rx,
            in_flight: Vec::new(),
            outstanding: 0,
            next_index: 0,
        }
    }

    /// Start every request; returns one handle per request in submission order
    pub fn submit(&mut self, requests: Vec<ProbeRequest>) -> Vec<ProbeHandle> {
        requests
            .into_iter()
            .map(|request| self.submit_one(request))
            .collect()
    }

    fn submit_one(&mut self, request: ProbeRequest) -> ProbeHandle {
        let index = self.next_index;
        self.next_index += 1;
        let handle = ProbeHandle {
            index,
            label: request.label,
            state: Arc::new(ProbeState::default()),
        };

        let semaphore = self.semaphore.clone();
        let tx = self.tx.clone();
        let task_handle = handle.clone();
        let call = request.call;

        let task = tokio::spawn(async move {
            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(Ok(resp)) => ProbeOutcome::from_response(resp),
                    Ok(Err(e)) => ProbeOutcome::failure(e.to_string()),
                    Err(_) => ProbeOutcome::failure("probe panicked"),
                },
                Err(e) => ProbeOutcome::failure(format!("pool closed: {}", e)),
            };

            if !outcome.ok {
                tracing::debug!(
                    probe = %task_handle.label,
                    status = ?outcome.status,
                    error = ?outcome.error,
                    "Probe did not succeed"
                );
            }

            task_handle.state.completed.store(true, Ordering::SeqCst);
            let _ = tx.send(CompletedProbe {
                handle: task_handle,
                outcome,
            });
        });

        self.in_flight.push(InFlight {
            handle: handle.clone(),
            task,
        });
        self.outstanding += 1;
        handle
    }

    /// Next finished probe in completion order; `None` once nothing is outstanding
    pub async fn await_next_completed(&mut self) -> Option<CompletedProbe> {
        if self.outstanding == 0 {
            return None;
        }
        let completed = self.rx.recv().await?;
        self.outstanding -= 1;
        Some(completed)
    }

    /// Wait for the first `ok` outcome and cancel the rest
    ///
    /// Returns `None` when every probe failed.
    pub async fn first_success(&mut self) -> Option<CompletedProbe> {
        while let Some(completed) = self.await_next_completed().await {
            if completed.outcome.ok {
                self.cancel_all();
                return Some(completed);
            }
        }
        None
    }

    /// Wait for every outstanding probe
    pub async fn collect_all(&mut self) -> Vec<CompletedProbe> {
        let mut all = Vec::with_capacity(self.outstanding);
        while let Some(completed) = self.await_next_completed().await {
            all.push(completed);
        }
        all
    }

    /// Abort every probe that has not completed yet
    pub fn cancel_all(&mut self) {
        for entry in self.in_flight.drain(..) {
            if !entry.handle.is_completed() {
                entry.handle.state.cancelled.store(true, Ordering::SeqCst);
                entry.task.abort();
            }
        }
        self.outstanding = 0;
        while self.rx.try_recv().is_ok() {}
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

impl Drop for RequestPool {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
