//! Run-wide budget for transient transport retries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::fetch::{AbortSignal, FetchError, FetchRequest, FetchResult, Fetcher, ProgressCallback};

/// Number of transient failures a run may still absorb.
///
/// Only transport errors draw on the budget; every other error is returned
/// immediately. Attempts are separated by a fixed, cancellable delay.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: AtomicU32,
    delay: Duration,
    signal: AbortSignal,
}

impl RetryBudget {
    pub fn new(retries: u32, delay: Duration, signal: AbortSignal) -> Self {
        Self {
            remaining: AtomicU32::new(retries),
            delay,
            signal,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn reset(&self, retries: u32) {
        self.remaining.store(retries, Ordering::SeqCst);
    }

    fn try_consume(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Run `op`, retrying transport failures while budget remains.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> FetchResult<T>) -> FetchResult<T> {
        loop {
            match op() {
                Err(e) if e.is_transient() => {
                    if !self.try_consume() {
                        warn!(what, error = %e, "Retry budget exhausted");
                        return Err(e);
                    }
                    warn!(what, error = %e, remaining = self.remaining(), "Transient failure, retrying");
                    if !self.signal.sleep(self.delay) {
                        return Err(FetchError::Cancelled {
                            url: what.to_string(),
                        });
                    }
                }
                other => return other,
            }
        }
    }
}

/// Fetcher decorator that retries through a [`RetryBudget`].
pub struct RetryingFetcher<'a> {
    inner: &'a dyn Fetcher,
    budget: &'a RetryBudget,
}

impl<'a> RetryingFetcher<'a> {
    pub fn new(inner: &'a dyn Fetcher, budget: &'a RetryBudget) -> Self {
        Self { inner, budget }
    }
}

impl Fetcher for RetryingFetcher<'_> {
    fn fetch_feed(&self) -> FetchResult<String> {
        self.budget.run("feed", || self.inner.fetch_feed())
    }

    fn fetch_data(
        &self,
        request: &FetchRequest<'_>,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> FetchResult<PathBuf> {
        self.budget
            .run(request.url, || self.inner.fetch_data(request, on_progress))
    }
}
