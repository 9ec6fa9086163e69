//! Fixed-interval condition polling.
//!
//! [`for_condition`] calls a condition on every tick until it reports
//! `Ok(true)`, returns an error, the deadline passes, the optional stop
//! token fires, or the context is cancelled. Polls never overlap: a slow
//! check pushes the next tick back instead of queueing extra ones.

pub mod conditions;

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{Result, WaitError};

/// Default spacing between polls.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
/// Default overall deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Stand-in deadline for offsets that overflow `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A boxed, re-callable condition as produced by [`conditions`].
pub type Condition = Box<dyn FnMut() -> BoxFuture<'static, Result<bool>> + Send>;

/// How a wait polls and when it gives up.
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
    pub timeout: Duration,
    /// Check once before the first interval elapses.
    pub immediate: bool,
    /// When set, poll until this token is cancelled and ignore `timeout`.
    pub stop: Option<CancellationToken>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            immediate: false,
            stop: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn with_stop_signal(mut self, stop: CancellationToken) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Poll `condition` according to `options`, returning how many times it
/// was called on success.
///
/// A condition error ends the wait immediately and is not retried.
///
/// # Errors
///
/// - [`WaitError::Timeout`] when the deadline passes first (timeout mode).
/// - [`WaitError::Stopped`] when the stop token fires (stop-signal mode).
/// - [`WaitError::Cancelled`] when `ctx` is cancelled.
/// - [`WaitError::Condition`] when the condition returns an error.
pub async fn poll<F, Fut>(ctx: &Context, options: &Options, mut condition: F) -> Result<u32, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let interval = options.interval.max(Duration::from_millis(1));
    let stop_mode = options.stop.is_some();
    let stop = options.stop.clone().unwrap_or_default();

    let first_tick = if options.immediate { start } else { after(start, interval) };
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let deadline = tokio::time::sleep_until(after(start, options.timeout));
    tokio::pin!(deadline);

    let mut attempts: u32 = 0;
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(WaitError::Cancelled),
            _ = stop.cancelled(), if stop_mode => return Err(WaitError::Stopped),
            _ = &mut deadline, if !stop_mode => {
                return Err(WaitError::Timeout { waited: start.elapsed() });
            }
            _ = ticker.tick() => {}
        }

        attempts += 1;
        trace!(attempt = attempts, "polling condition");
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(WaitError::Cancelled),
            _ = stop.cancelled(), if stop_mode => return Err(WaitError::Stopped),
            _ = &mut deadline, if !stop_mode => {
                return Err(WaitError::Timeout { waited: start.elapsed() });
            }
            outcome = condition() => outcome,
        };

        match outcome {
            Ok(true) => {
                debug!(attempts, elapsed = ?start.elapsed(), "condition met");
                return Ok(attempts);
            }
            Ok(false) => {}
            Err(e) => return Err(WaitError::Condition(Box::new(e))),
        }
    }
}

/// `start + by`, saturating to a far-future instant instead of panicking
/// for durations like [`Duration::MAX`].
fn after(start: Instant, by: Duration) -> Instant {
    start
        .checked_add(by)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Wait until `condition` reports `Ok(true)`.
///
/// ```no_run
/// # async fn example(ctx: kube_e2e::context::Context, res: kube_e2e::klient::Resources) -> kube_e2e::Result<()> {
/// use std::time::Duration;
/// use k8s_openapi::api::apps::v1::Deployment;
/// use kube_e2e::wait::{self, conditions::Conditions, Options};
///
/// let dep: Deployment = res.get("web", "e2e").await?;
/// wait::for_condition(
///     &ctx,
///     Conditions::new(res).resource_scaled(&dep, |d: &Deployment| {
///         d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0)
///     }, 3),
///     Options::new().with_timeout(Duration::from_secs(60)),
/// )
/// .await
/// # }
/// ```
///
/// # Errors
///
/// See [`poll`]; the [`WaitError`] is wrapped in [`crate::Error::Wait`].
pub async fn for_condition<F, Fut>(ctx: &Context, condition: F, options: Options) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    poll(ctx, &options, condition).await?;
    Ok(())
}
