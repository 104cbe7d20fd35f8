//! Concurrent readiness probes.
//!
//! Each probe polls one endpoint every [`WAIT_DELAY`] until it answers or the
//! shared [`RunContext`] ends. [`wait_ready`] runs all probes at once and
//! always waits for every one of them, so a failure report covers all
//! endpoints rather than whichever lost the race.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::error::{ProbeError, ProbeFailure, ReadinessError};
use crate::orchestrator::Endpoint;

/// Delay between probe attempts
pub const WAIT_DELAY: Duration = Duration::from_millis(200);

/// Bound on a single HTTP attempt
const HTTP_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// How a probe decides an endpoint is up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// A TCP connection can be opened
    Tcp,
    /// `GET /` answers 200
    Http,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Tcp => f.write_str("tcp"),
            ProbeKind::Http => f.write_str("http"),
        }
    }
}

/// One endpoint to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Probe kind
    pub kind: ProbeKind,
    /// Where to probe
    pub endpoint: Endpoint,
}

impl ProbeTarget {
    /// Probe for an open TCP port
    pub fn tcp(endpoint: Endpoint) -> Self {
        Self {
            kind: ProbeKind::Tcp,
            endpoint,
        }
    }

    /// Probe for an HTTP 200 on `/`
    pub fn http(endpoint: Endpoint) -> Self {
        Self {
            kind: ProbeKind::Http,
            endpoint,
        }
    }

    /// What the probe dials, as shown in logs and errors
    pub fn describe(&self) -> String {
        match self.kind {
            ProbeKind::Tcp => self.endpoint.to_string(),
            ProbeKind::Http => self.url(),
        }
    }

    fn url(&self) -> String {
        format!("{}/", self.endpoint.http_url())
    }
}

/// Outcome of one probe
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// The probe that ran
    pub target: ProbeTarget,
    /// `None` on success
    pub error: Option<ProbeError>,
    /// Time from probe start to outcome
    pub elapsed: Duration,
}

impl ProbeResult {
    /// Returns true if the probe succeeded
    pub fn is_ready(&self) -> bool {
        self.error.is_none()
    }
}

/// Poll `target` until it is up or `ctx` ends
///
/// Attempts are strictly sequential. The first attempt runs immediately,
/// later ones every [`WAIT_DELAY`]. An attempt still in flight when the
/// context ends is abandoned.
pub async fn probe(ctx: &RunContext, target: &ProbeTarget) -> Result<(), ProbeError> {
    let http = http_client()?;
    poll(ctx, target, &http).await
}

fn http_client() -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .timeout(HTTP_ATTEMPT_TIMEOUT)
        .build()
        .map_err(|e| ProbeError::Client(e.to_string()))
}

async fn poll(
    ctx: &RunContext,
    target: &ProbeTarget,
    http: &reqwest::Client,
) -> Result<(), ProbeError> {
    let phase = match target.kind {
        ProbeKind::Tcp => "wait-port",
        ProbeKind::Http => "wait-http",
    };
    let addr = target.describe();
    let started = Instant::now();
    debug!(phase, %addr, "begin");

    let mut ticker = tokio::time::interval(WAIT_DELAY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;
            err = ctx.done() => break Err(ProbeError::from(err)),
            _ = ticker.tick() => {}
        }

        let ready = tokio::select! {
            biased;
            err = ctx.done() => break Err(ProbeError::from(err)),
            ready = attempt(target, http) => ready,
        };
        if ready {
            break Ok(());
        }
    };

    match &outcome {
        Ok(()) => debug!(phase, %addr, elapsed = ?started.elapsed(), "end"),
        Err(e) => debug!(phase, %addr, elapsed = ?started.elapsed(), error = %e, "end"),
    }
    outcome
}

async fn attempt(target: &ProbeTarget, http: &reqwest::Client) -> bool {
    match target.kind {
        ProbeKind::Tcp => {
            let endpoint = &target.endpoint;
            TcpStream::connect((endpoint.address.as_str(), endpoint.port))
                .await
                .is_ok()
        }
        ProbeKind::Http => match http.get(target.url()).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        },
    }
}

/// Run every probe concurrently and wait for all of them
///
/// Returns every result when all probes succeed. Otherwise the error holds
/// each failed probe; the outcome does not depend on completion order.
pub async fn wait_ready(
    ctx: &RunContext,
    targets: Vec<ProbeTarget>,
) -> Result<Vec<ProbeResult>, ReadinessError> {
    let http = match http_client() {
        Ok(http) => http,
        Err(error) => {
            warn!(%error, "Cannot probe without an http client");
            let arrivals = targets
                .iter()
                .cloned()
                .enumerate()
                .map(|(index, target)| {
                    let result = ProbeResult {
                        target,
                        error: Some(error.clone()),
                        elapsed: Duration::ZERO,
                    };
                    (index, result)
                })
                .collect();
            return join(targets, arrivals);
        }
    };

    let expected = targets.len();
    let (tx, mut rx) = mpsc::channel::<(usize, ProbeResult)>(expected.max(1));

    for (index, target) in targets.iter().cloned().enumerate() {
        let tx = tx.clone();
        let ctx = ctx.clone();
        let http = http.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let error = poll(&ctx, &target, &http).await.err();
            let result = ProbeResult {
                target,
                error,
                elapsed: started.elapsed(),
            };
            // Capacity matches the number of senders, so this never waits
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut arrivals = Vec::with_capacity(expected);
    for _ in 0..expected {
        match rx.recv().await {
            Some(arrival) => arrivals.push(arrival),
            // Every sender is gone: the remaining tasks died without reporting
            None => break,
        }
    }

    join(targets, arrivals)
}

/// Combine results, given in arrival order, back into target order
///
/// A target without a result counts as a failed task.
fn join(
    targets: Vec<ProbeTarget>,
    arrivals: Vec<(usize, ProbeResult)>,
) -> Result<Vec<ProbeResult>, ReadinessError> {
    let expected = targets.len();
    let mut slots: Vec<Option<ProbeResult>> = vec![None; expected];
    for (index, result) in arrivals {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(result);
        }
    }

    let mut results = Vec::with_capacity(expected);
    let mut failures = Vec::new();
    for (slot, target) in slots.into_iter().zip(targets) {
        let result = slot.unwrap_or_else(|| {
            warn!(probe = %target.describe(), "Probe task exited without a result");
            ProbeResult {
                target,
                error: Some(ProbeError::TaskFailed("exited without a result".into())),
                elapsed: Duration::ZERO,
            }
        });
        if let Some(error) = &result.error {
            failures.push(ProbeFailure {
                kind: result.target.kind,
                target: result.target.describe(),
                error: error.clone(),
                elapsed: result.elapsed,
            });
        }
        results.push(result);
    }

    if failures.is_empty() {
        Ok(results)
    } else {
        Err(ReadinessError {
            failures,
            rollback: None,
        })
    }
}
