//! Resource state waits
//!
//! [`WaitEngine`] polls a [`StatusSource`] until a caller predicate holds, a
//! terminal failure state is observed, the wall-clock timeout passes, or the
//! wait is cancelled.
//!
//! ```text
//! Pending ──> Polling ──┬──> Succeeded   target predicate holds
//!               ^   │   ├──> Failed      failure predicate holds, or the
//!               └───┘   │                status call fails for good
//!            sleep      └──> TimedOut    deadline passed, or cancelled
//! ```
//!
//! The engine only observes; it never acts on the resource. Remote status
//! values are opaque strings; the predicates decide what they mean.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::retry::RetryPolicy;

/// One observation of a remote resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub resource_id: String,
    pub status: String,
    pub metadata: BTreeMap<String, String>,
}

impl StatusSnapshot {
    pub fn new(resource_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            status: status.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Completion percentage reported by the service, if any
    pub fn progress(&self) -> Option<u8> {
        self.metadata
            .get("progress")
            .and_then(|p| p.trim().parse::<f64>().ok())
            .map(|p| p.clamp(0.0, 100.0) as u8)
    }
}

/// Anything whose status can be polled
///
/// One call should be one request: the engine retries failed polls itself.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn get_status(&self, resource_id: &str) -> Result<StatusSnapshot>;
}

#[async_trait]
impl<T: StatusSource + ?Sized> StatusSource for Arc<T> {
    async fn get_status(&self, resource_id: &str) -> Result<StatusSnapshot> {
        (**self).get_status(resource_id).await
    }
}

/// Reports a vanished resource as a snapshot with a fixed status
///
/// Deleted resources usually start answering `404`; wrapping the source lets
/// a deletion wait see that as a final state instead of an error.
pub struct MissingAs<S> {
    inner: S,
    status: String,
}

impl<S> MissingAs<S> {
    pub fn new(inner: S, status: impl Into<String>) -> Self {
        Self {
            inner,
            status: status.into(),
        }
    }
}

#[async_trait]
impl<S: StatusSource> StatusSource for MissingAs<S> {
    async fn get_status(&self, resource_id: &str) -> Result<StatusSnapshot> {
        match self.inner.get_status(resource_id).await {
            Err(err) if err.is_not_found() => Ok(StatusSnapshot::new(resource_id, &self.status)),
            other => other,
        }
    }
}

/// Predicate matching one status, ignoring ASCII case
pub fn status_is(expected: impl Into<String>) -> impl Fn(&StatusSnapshot) -> bool {
    let expected = expected.into();
    move |snapshot| snapshot.status.eq_ignore_ascii_case(&expected)
}

/// Predicate matching any of several statuses, ignoring ASCII case
pub fn status_in<I, S>(expected: I) -> impl Fn(&StatusSnapshot) -> bool
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let expected: Vec<String> = expected.into_iter().map(Into::into).collect();
    move |snapshot| {
        expected
            .iter()
            .any(|s| snapshot.status.eq_ignore_ascii_case(s))
    }
}

/// Predicate that never matches; for waits with no failure state
pub fn never(_: &StatusSnapshot) -> bool {
    false
}

/// States of a single wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Pending,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

/// Terminal result of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitResult {
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for WaitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// What a finished wait observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    pub result: WaitResult,
    /// Last successfully observed snapshot
    pub final_snapshot: Option<StatusSnapshot>,
    pub elapsed: Duration,
    /// Status calls issued, failed ones included
    pub polls: u32,
    /// The wait ended because it was cancelled
    pub cancelled: bool,
}

impl WaitOutcome {
    pub fn is_success(&self) -> bool {
        self.result == WaitResult::Succeeded
    }

    pub fn final_status(&self) -> Option<&str> {
        self.final_snapshot.as_ref().map(|s| s.status.as_str())
    }
}

/// Wait cadence and budgets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOptions {
    /// Fixed pause between polls
    pub poll_interval: Duration,
    /// Wall-clock budget, measured from the start of the wait
    ///
    /// Checked after each poll, and the pause between polls is not shortened
    /// to fit it, so a wait may report `TimedOut` up to one `poll_interval`
    /// late. A status call still in flight is abandoned at
    /// `timeout + retry_grace`.
    pub timeout: Duration,
    /// Cap on consecutive retryable status failures
    pub retry: RetryPolicy,
    /// How far retries may run past `timeout` before the wait gives up
    pub retry_grace: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::attempts(3),
            retry_grace: Duration::from_secs(30),
        }
    }
}

/// Polling state machine
#[derive(Debug, Clone)]
pub struct WaitEngine {
    options: WaitOptions,
    cancel: CancellationToken,
}

impl Default for WaitEngine {
    fn default() -> Self {
        Self::new(WaitOptions::default())
    }
}

impl WaitEngine {
    pub fn new(options: WaitOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to interrupt waits, in a sleep or mid status call
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &WaitOptions {
        &self.options
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Poll until `target` holds.
    ///
    /// Returns `Err` only when the status call itself fails for good: a
    /// non-retryable error, or the retry cap is exhausted. A resource that
    /// reaches a failure state, or never reaches the target, is reported
    /// through [`WaitOutcome::result`].
    pub async fn wait_until<S, T, F>(
        &self,
        source: &S,
        resource_id: &str,
        target: T,
        failure: F,
    ) -> Result<WaitOutcome>
    where
        S: StatusSource + ?Sized,
        T: Fn(&StatusSnapshot) -> bool,
        F: Fn(&StatusSnapshot) -> bool,
    {
        self.run(source, resource_id, target, failure, |_| {}).await
    }

    /// [`WaitEngine::wait_until`], calling `progress` with every snapshot
    pub async fn wait_until_with_progress<S, T, F, P>(
        &self,
        source: &S,
        resource_id: &str,
        target: T,
        failure: F,
        progress: P,
    ) -> Result<WaitOutcome>
    where
        S: StatusSource + ?Sized,
        T: Fn(&StatusSnapshot) -> bool,
        F: Fn(&StatusSnapshot) -> bool,
        P: FnMut(&StatusSnapshot),
    {
        self.run(source, resource_id, target, failure, progress).await
    }

    /// Poll while `leaving` holds; succeed once it stops holding
    pub async fn wait_while<S, L, F>(
        &self,
        source: &S,
        resource_id: &str,
        leaving: L,
        failure: F,
    ) -> Result<WaitOutcome>
    where
        S: StatusSource + ?Sized,
        L: Fn(&StatusSnapshot) -> bool,
        F: Fn(&StatusSnapshot) -> bool,
    {
        self.run(source, resource_id, |s| !leaving(s), failure, |_| {})
            .await
    }

    /// [`WaitEngine::wait_while`], calling `progress` with every snapshot
    pub async fn wait_while_with_progress<S, L, F, P>(
        &self,
        source: &S,
        resource_id: &str,
        leaving: L,
        failure: F,
        progress: P,
    ) -> Result<WaitOutcome>
    where
        S: StatusSource + ?Sized,
        L: Fn(&StatusSnapshot) -> bool,
        F: Fn(&StatusSnapshot) -> bool,
        P: FnMut(&StatusSnapshot),
    {
        self.run(source, resource_id, |s| !leaving(s), failure, progress)
            .await
    }

    async fn run<S, T, F, P>(
        &self,
        source: &S,
        resource_id: &str,
        target: T,
        failure: F,
        mut progress: P,
    ) -> Result<WaitOutcome>
    where
        S: StatusSource + ?Sized,
        T: Fn(&StatusSnapshot) -> bool,
        F: Fn(&StatusSnapshot) -> bool,
        P: FnMut(&StatusSnapshot),
    {
        let options = &self.options;
        let start = Instant::now();
        let mut state = WaitState::Pending;
        let mut last: Option<StatusSnapshot> = None;
        let mut polls = 0u32;
        let mut failures = 0u32;

        let finish = |result: WaitResult,
                      snapshot: Option<StatusSnapshot>,
                      polls: u32,
                      cancelled: bool| WaitOutcome {
            result,
            final_snapshot: snapshot,
            elapsed: start.elapsed(),
            polls,
            cancelled,
        };

        debug!(resource_id, ?state, "wait starting");
        state = WaitState::Polling;
        debug!(
            resource_id,
            ?state,
            poll_interval = ?options.poll_interval,
            timeout = ?options.timeout,
            "polling"
        );

        let deadline = start + options.timeout + options.retry_grace;

        loop {
            polls += 1;
            let polled = tokio::select! {
                biased;
                polled = tokio::time::timeout_at(deadline, source.get_status(resource_id)) => polled,
                _ = self.cancel.cancelled() => {
                    state = WaitState::TimedOut;
                    info!(resource_id, ?state, "wait cancelled during status call");
                    return Ok(finish(WaitResult::TimedOut, last, polls, true));
                }
            };
            let Ok(polled) = polled else {
                state = WaitState::TimedOut;
                warn!(resource_id, ?state, polls, "status call still running at the deadline");
                return Ok(finish(WaitResult::TimedOut, last, polls, false));
            };

            match polled {
                Ok(snapshot) => {
                    failures = 0;
                    progress(&snapshot);
                    debug!(resource_id, status = %snapshot.status, polls, "polled");

                    if target(&snapshot) {
                        state = WaitState::Succeeded;
                        info!(resource_id, ?state, polls, "wait finished");
                        return Ok(finish(WaitResult::Succeeded, Some(snapshot), polls, false));
                    }
                    if failure(&snapshot) {
                        state = WaitState::Failed;
                        info!(resource_id, ?state, status = %snapshot.status, "wait finished");
                        return Ok(finish(WaitResult::Failed, Some(snapshot), polls, false));
                    }
                    last = Some(snapshot);

                    if start.elapsed() >= options.timeout {
                        state = WaitState::TimedOut;
                        info!(resource_id, ?state, polls, "wait finished");
                        return Ok(finish(WaitResult::TimedOut, last, polls, false));
                    }
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if failures >= options.retry.max_attempts {
                        state = WaitState::Failed;
                        warn!(resource_id, ?state, failures, "giving up on status: {}", err);
                        return Err(err);
                    }
                    if start.elapsed() >= options.timeout + options.retry_grace {
                        state = WaitState::TimedOut;
                        warn!(resource_id, ?state, "retry grace exhausted: {}", err);
                        return Ok(finish(WaitResult::TimedOut, last, polls, false));
                    }
                    debug!(
                        resource_id,
                        failures, "status call failed, retrying: {}", err
                    );
                }
                Err(err) => {
                    state = WaitState::Failed;
                    warn!(resource_id, ?state, "status call failed: {}", err);
                    return Err(err);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    state = WaitState::TimedOut;
                    info!(resource_id, ?state, "wait cancelled");
                    return Ok(finish(WaitResult::TimedOut, last, polls, true));
                }
                _ = tokio::time::sleep(options.poll_interval) => {}
            }
        }
    }
}
