//! Process-wide pacing for language model calls.
//!
//! Every call, whatever its kind, goes through [`RateBudget::call`]. Calls are
//! serialized, each one starting no earlier than the configured interval after
//! the previous one completed, and the rolling one-minute window never holds
//! more starts than the per-minute quota.

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::config::PacingConfig;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateBudget {
    pacing: PacingConfig,
    /// Completion instant of the previous call; held for the whole call.
    call_gate: tokio::sync::Mutex<Option<Instant>>,
    /// Start instant of the previous question
    question_gate: tokio::sync::Mutex<Option<Instant>>,
    window: Mutex<VecDeque<Instant>>,
    calls_issued: AtomicU64,
    rate_limited: AtomicU64,
    exhausted_questions: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub calls_issued: u64,
    pub rate_limited_responses: u64,
    pub exhausted_questions: u64,
    pub calls_last_minute: usize,
    /// `None` when the per-minute quota is disabled
    pub remaining_this_minute: Option<u32>,
    pub min_call_interval_ms: u64,
    pub question_interval_ms: u64,
}

impl RateBudget {
    #[inline]
    pub fn new(pacing: PacingConfig) -> Self {
        Self {
            pacing,
            call_gate: tokio::sync::Mutex::new(None),
            question_gate: tokio::sync::Mutex::new(None),
            window: Mutex::new(VecDeque::new()),
            calls_issued: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            exhausted_questions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    /// Wait until a new question may start, then mark it started.
    #[inline]
    pub async fn begin_question(&self) {
        let mut last_start = self.question_gate.lock().await;
        if let Some(previous) = *last_start {
            let ready_at = previous + self.pacing.question_interval();
            if ready_at > Instant::now() {
                debug!("Question pacing: waiting {:?}", ready_at - Instant::now());
                sleep_until(ready_at).await;
            }
        }
        *last_start = Some(Instant::now());
    }

    /// Run one paced call. The gate stays held until `call` completes, so no
    /// two calls overlap anywhere in the process.
    #[inline]
    pub async fn call<F, Fut, T>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last_completion = self.call_gate.lock().await;

        if let Some(previous) = *last_completion {
            let ready_at = previous + self.pacing.min_call_interval();
            if ready_at > Instant::now() {
                sleep_until(ready_at).await;
            }
        }
        self.wait_for_window().await;

        self.calls_issued.fetch_add(1, Ordering::Relaxed);
        let output = call().await;
        *last_completion = Some(Instant::now());
        output
    }

    #[inline]
    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exhausted(&self) {
        self.exhausted_questions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn snapshot(&self) -> BudgetSnapshot {
        let calls_last_minute = {
            let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
            prune(&mut window, Instant::now());
            window.len()
        };

        let quota = self.pacing.requests_per_minute;
        let used = u32::try_from(calls_last_minute).unwrap_or(u32::MAX);

        BudgetSnapshot {
            calls_issued: self.calls_issued.load(Ordering::Relaxed),
            rate_limited_responses: self.rate_limited.load(Ordering::Relaxed),
            exhausted_questions: self.exhausted_questions.load(Ordering::Relaxed),
            calls_last_minute,
            remaining_this_minute: (quota > 0).then(|| quota.saturating_sub(used)),
            min_call_interval_ms: self.pacing.min_call_interval_ms,
            question_interval_ms: self.pacing.question_interval_ms,
        }
    }

    /// Block until the rolling window has room, then record a start in it.
    async fn wait_for_window(&self) {
        let quota = self.pacing.requests_per_minute as usize;

        loop {
            let wait_until = {
                let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                prune(&mut window, now);

                if quota == 0 || window.len() < quota {
                    window.push_back(now);
                    None
                } else {
                    window.front().map(|oldest| *oldest + WINDOW)
                }
            };

            match wait_until {
                Some(instant) => {
                    debug!("Per-minute quota reached, waiting until window frees up");
                    sleep_until(instant).await;
                }
                None => return,
            }
        }
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while window
        .front()
        .is_some_and(|start| now.duration_since(*start) >= WINDOW)
    {
        window.pop_front();
    }
}
