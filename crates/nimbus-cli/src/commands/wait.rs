//! Shared `--wait` support: spinners, Ctrl-C and outcome reporting

use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use nimbus_client::{status_in, status_is, StatusSnapshot, StatusSource, WaitOutcome, WaitResult};
use tracing::debug;

use super::Completion;
use crate::context::Session;
use crate::output::WaitRow;

/// Statuses that end a wait as failed
pub const FAILURE_STATES: [&str; 1] = ["ERROR"];

/// What a wait is looking for
pub struct WaitSpec<'a> {
    pub target: &'a str,
    pub timeout: Option<Duration>,
}

impl<'a> WaitSpec<'a> {
    pub fn until(target: &'a str) -> Self {
        Self {
            target,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Wait for every id concurrently and report how each wait ended
pub async fn wait_for<S>(
    session: &Session,
    source: &S,
    ids: &[String],
    spec: WaitSpec<'_>,
) -> Result<Completion>
where
    S: StatusSource + ?Sized,
{
    install_ctrlc(session);
    let engine = session.wait_engine(spec.timeout);
    let bars = MultiProgress::new();
    let target = spec.target;

    let waits = ids.iter().map(|id| {
        let bar = spinner(&bars, session.out.quiet, id, target);
        let engine = &engine;
        async move {
            let outcome = engine
                .wait_until_with_progress(
                    source,
                    id,
                    status_is(target),
                    status_in(FAILURE_STATES),
                    |snapshot| bar.set_message(describe(id, snapshot)),
                )
                .await;
            match &outcome {
                Ok(outcome) => bar.finish_with_message(format!("{id}: {}", outcome.result)),
                Err(err) => bar.abandon_with_message(format!("{id}: {err}")),
            }
            (id.clone(), outcome)
        }
    });
    let results = join_all(waits).await;

    let mut rows = Vec::new();
    let mut completion = Completion::Success;
    for (id, outcome) in results {
        let outcome = outcome?;
        completion = completion.max(Completion::from(outcome.result));
        rows.push(wait_row(&id, &outcome));
    }

    if !session.out.quiet {
        session.out.print(&rows);
    }
    Ok(completion)
}

fn install_ctrlc(session: &Session) {
    let token = session.cancellation_token().clone();
    if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
        debug!("Ctrl-C handler not installed: {}", err);
    }
}

fn spinner(bars: &MultiProgress, quiet: bool, id: &str, target: &str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = bars.add(ProgressBar::new_spinner());
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}")
    {
        bar.set_style(style);
    }
    bar.set_message(format!("{id}: waiting for {target}"));
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn describe(id: &str, snapshot: &StatusSnapshot) -> String {
    match snapshot.progress() {
        Some(progress) => format!("{id}: {} ({progress}%)", snapshot.status),
        None => format!("{id}: {}", snapshot.status),
    }
}

fn wait_row(id: &str, outcome: &WaitOutcome) -> WaitRow {
    let result = if outcome.cancelled {
        "Cancelled".to_string()
    } else {
        outcome.result.to_string()
    };
    WaitRow {
        id: id.to_string(),
        result,
        status: outcome.final_status().unwrap_or("-").to_string(),
        polls: outcome.polls,
        elapsed_secs: outcome.elapsed.as_secs(),
    }
}

impl From<WaitResult> for Completion {
    fn from(result: WaitResult) -> Self {
        match result {
            WaitResult::Succeeded => Self::Success,
            WaitResult::Failed => Self::Failed,
            WaitResult::TimedOut => Self::TimedOut,
        }
    }
}
