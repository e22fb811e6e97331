use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors crossing the worker/hook boundary are opaque to the coordinator
/// and surfaced unchanged.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Gate function invoked before a phase; an error aborts the phase
pub type Hook = Box<dyn Fn(&CancellationToken) -> Result<(), BoxError> + Send + Sync>;

/// Two-phase commit worker contract.
///
/// A worker holds at most one in-flight transaction and maps the three
/// phases onto it. The contract is typed over the batch it accepts.
#[async_trait]
pub trait Worker<B: Send + Sync>: Send + Sync {
    async fn prepare(&self, ctx: &CancellationToken, batch: &B) -> Result<(), BoxError>;
    async fn commit(&self, ctx: &CancellationToken, batch: &B) -> Result<(), BoxError>;
    async fn rollback(&self, ctx: &CancellationToken, batch: &B) -> Result<(), BoxError>;
}

/// Coordinator configuration: the wall-clock deadline for a whole `put`,
/// plus optional pre-phase gates
pub struct Options {
    timeout: Duration,
    before_prepare: Option<Hook>,
    before_commit: Option<Hook>,
    before_rollback: Option<Hook>,
}

impl Options {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            before_prepare: None,
            before_commit: None,
            before_rollback: None,
        }
    }

    pub fn with_before_prepare<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CancellationToken) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.before_prepare = Some(Box::new(hook));
        self
    }

    pub fn with_before_commit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CancellationToken) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.before_commit = Some(Box::new(hook));
        self
    }

    pub fn with_before_rollback<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CancellationToken) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.before_rollback = Some(Box::new(hook));
        self
    }
}

/// Phase of an in-flight `put`, for tracing only; nothing persists across calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preparing,
    Committing,
    RollingBack,
}

/// Two-phase commit coordinator: applies one write batch across a static
/// set of workers with all-or-nothing semantics under a deadline
pub struct Coordinator {
    opts: Options,
}

impl Coordinator {
    pub fn new(opts: Options) -> Self {
        Self { opts }
    }

    /// Atomically apply `batch` to all `workers`.
    ///
    /// Returns the first prepare- or commit-phase error, or the error of the
    /// hook that gated the failing phase. Rollback is attempted on any
    /// failure after prepare was dispatched; rollback errors are logged,
    /// never surfaced over an earlier error.
    pub async fn put<B: Send + Sync>(
        &self,
        workers: &[Arc<dyn Worker<B>>],
        batch: &B,
    ) -> Result<(), BoxError> {
        let ctx = CancellationToken::new();
        let timer = {
            let ctx = ctx.clone();
            let timeout = self.opts.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                ctx.cancel();
            })
        };

        let result = self.run(&ctx, workers, batch).await;
        timer.abort();
        result
    }

    async fn run<B: Send + Sync>(
        &self,
        ctx: &CancellationToken,
        workers: &[Arc<dyn Worker<B>>],
        batch: &B,
    ) -> Result<(), BoxError> {
        if let Some(hook) = &self.opts.before_prepare {
            hook(ctx)?;
        }

        debug!(workers = workers.len(), phase = ?Phase::Preparing, "dispatching prepare");
        let results = join_all(workers.iter().map(|w| w.prepare(ctx, batch))).await;

        if let Some(err) = first_error(results) {
            warn!("prepare failed: {}", err);
            self.rollback_all(ctx, workers, batch).await;
            return Err(err);
        }

        if let Some(hook) = &self.opts.before_commit {
            if let Err(err) = hook(ctx) {
                self.rollback_all(ctx, workers, batch).await;
                return Err(err);
            }
        }

        debug!(workers = workers.len(), phase = ?Phase::Committing, "dispatching commit");
        let results = join_all(workers.iter().map(|w| w.commit(ctx, batch))).await;

        if let Some(err) = first_error(results) {
            warn!("commit failed: {}", err);
            self.rollback_all(ctx, workers, batch).await;
            return Err(err);
        }

        Ok(())
    }

    /// Best-effort rollback on every worker; errors are logged, not surfaced
    async fn rollback_all<B: Send + Sync>(
        &self,
        ctx: &CancellationToken,
        workers: &[Arc<dyn Worker<B>>],
        batch: &B,
    ) {
        if let Some(hook) = &self.opts.before_rollback {
            if let Err(err) = hook(ctx) {
                warn!("before-rollback hook failed, skipping rollback: {}", err);
                return;
            }
        }

        debug!(workers = workers.len(), phase = ?Phase::RollingBack, "dispatching rollback");
        let results = join_all(workers.iter().map(|w| w.rollback(ctx, batch))).await;

        for result in results {
            if let Err(err) = result {
                warn!("rollback failed: {}", err);
            }
        }
    }
}

fn first_error(results: Vec<Result<(), BoxError>>) -> Option<BoxError> {
    results.into_iter().find_map(Result::err)
}
