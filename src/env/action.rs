//! Ordered lists of environment functions sharing one lifecycle role.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::envconf::Config;
use crate::error::Error;

/// When an [`Action`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Setup,
    BeforeEachTest,
    BeforeEachFeature,
    AfterEachFeature,
    AfterEachTest,
    Finish,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::BeforeEachTest => write!(f, "before-each-test"),
            Self::BeforeEachFeature => write!(f, "before-each-feature"),
            Self::AfterEachFeature => write!(f, "after-each-feature"),
            Self::AfterEachTest => write!(f, "after-each-test"),
            Self::Finish => write!(f, "finish"),
        }
    }
}

/// Error returned by an [`EnvFunc`].
///
/// A function that changed the context before failing can attach it with
/// [`FuncError::with_context`]; the sequencer then hands that context back
/// instead of the one the function received.
pub struct FuncError {
    pub error: Error,
    pub context: Option<Context>,
}

impl FuncError {
    pub fn new(error: impl Into<Error>) -> Self {
        Self {
            error: error.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }
}

impl<E: Into<Error>> From<E> for FuncError {
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for FuncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncError")
            .field("error", &self.error)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

impl fmt::Display for FuncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

/// A context-transforming lifecycle function.
pub type EnvFunc =
    Arc<dyn Fn(Context, Arc<Config>) -> BoxFuture<'static, Result<Context, FuncError>> + Send + Sync>;

/// Box an async closure into an [`EnvFunc`].
///
/// ```
/// use kube_e2e::env::action::env_func;
///
/// let noop = env_func(|ctx, _cfg| async move { Ok(ctx) });
/// # let _ = noop;
/// ```
pub fn env_func<F, Fut>(f: F) -> EnvFunc
where
    F: Fn(Context, Arc<Config>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context, FuncError>> + Send + 'static,
{
    Arc::new(move |ctx, cfg| f(ctx, cfg).boxed())
}

/// Where and why an [`Action`] stopped.
#[derive(Debug)]
pub struct ActionFailure {
    pub role: Role,
    /// Position of the failing function in its action.
    pub index: usize,
    pub error: Error,
    /// The failing function's own context if it attached one, otherwise the
    /// context it was called with.
    pub context: Context,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} function #{} failed: {}", self.role, self.index + 1, self.error)
    }
}

/// One registration of lifecycle functions for a role.
#[derive(Clone)]
pub struct Action {
    role: Role,
    funcs: Vec<Option<EnvFunc>>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("role", &self.role)
            .field("funcs", &self.funcs.len())
            .finish()
    }
}

impl Action {
    pub fn new(role: Role, funcs: Vec<Option<EnvFunc>>) -> Self {
        Self { role, funcs }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Run every function in order, threading the context through.
    /// `None` entries are skipped. Stops at the first error.
    ///
    /// # Errors
    ///
    /// Returns an [`ActionFailure`] for the first failing function; later
    /// functions are not called.
    pub async fn run(&self, mut ctx: Context, cfg: &Arc<Config>) -> Result<Context, ActionFailure> {
        for (index, func) in self.funcs.iter().enumerate() {
            let Some(func) = func else {
                trace!(role = %self.role, index, "skipping empty function");
                continue;
            };
            debug!(role = %self.role, index, "running environment function");
            match func(ctx.clone(), Arc::clone(cfg)).await {
                Ok(next) => ctx = next,
                Err(FuncError { error, context }) => {
                    return Err(ActionFailure {
                        role: self.role,
                        index,
                        error,
                        context: context.unwrap_or(ctx),
                    });
                }
            }
        }
        Ok(ctx)
    }

    /// Run every function in order even when some fail, collecting each
    /// failure. A failing function's context, if it attached one, is
    /// threaded on to the next function. Used for the finish role, where
    /// every cleanup function must get its chance.
    pub async fn run_to_end(&self, mut ctx: Context, cfg: &Arc<Config>) -> (Context, Vec<ActionFailure>) {
        let mut failures = Vec::new();
        for (index, func) in self.funcs.iter().enumerate() {
            let Some(func) = func else {
                trace!(role = %self.role, index, "skipping empty function");
                continue;
            };
            debug!(role = %self.role, index, "running environment function");
            match func(ctx.clone(), Arc::clone(cfg)).await {
                Ok(next) => ctx = next,
                Err(FuncError { error, context }) => {
                    if let Some(context) = context {
                        ctx = context;
                    }
                    warn!(role = %self.role, index, %error, "environment function failed, continuing");
                    failures.push(ActionFailure {
                        role: self.role,
                        index,
                        error,
                        context: ctx.clone(),
                    });
                }
            }
        }
        (ctx, failures)
    }
}
