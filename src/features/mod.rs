//! Features: named, labelled bundles of setup, assessment and teardown
//! steps.
//!
//! A [`FeatureBuilder`] collects steps; [`FeatureBuilder::feature`] freezes
//! them into a [`Feature`] that no later builder call can change.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::context::Context;
use crate::envconf::Config;
use crate::envconf::filter::Labels;
use crate::testing::TestHandle;

/// Where a step sits in a feature's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Setup,
    Assess,
    Teardown,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Assess => write!(f, "assess"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// A step body. Receives the current context and returns the context for
/// the next step. Failures are reported through the [`TestHandle`].
pub type StepFunc =
    Arc<dyn Fn(Context, TestHandle, Arc<Config>) -> BoxFuture<'static, Context> + Send + Sync>;

/// Box an async closure into a [`StepFunc`].
pub fn step_fn<F, Fut>(f: F) -> StepFunc
where
    F: Fn(Context, TestHandle, Arc<Config>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Context> + Send + 'static,
{
    Arc::new(move |ctx, t, cfg| f(ctx, t, cfg).boxed())
}

/// One named step. A step without a function is a no-op.
#[derive(Clone)]
pub struct Step {
    name: String,
    level: Level,
    func: Option<StepFunc>,
}

impl Step {
    pub fn new(name: impl Into<String>, level: Level, func: Option<StepFunc>) -> Self {
        Self {
            name: name.into(),
            level,
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn func(&self) -> Option<&StepFunc> {
        self.func.as_ref()
    }

    pub fn is_noop(&self) -> bool {
        self.func.is_none()
    }

    /// Run the step body, or hand `ctx` straight back for a no-op.
    pub async fn run(&self, ctx: Context, t: TestHandle, cfg: Arc<Config>) -> Context {
        match &self.func {
            Some(func) => func(ctx, t, cfg).await,
            None => ctx,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("noop", &self.func.is_none())
            .finish()
    }
}

/// Accumulates the steps and labels of a feature.
///
/// ```
/// use kube_e2e::features::FeatureBuilder;
///
/// let feature = FeatureBuilder::new("deployment")
///     .with_label("type", "apps")
///     .setup(|ctx, _t, _cfg| async move { ctx })
///     .assess("replicas ready", |ctx, _t, _cfg| async move { ctx })
///     .teardown(|ctx, _t, _cfg| async move { ctx })
///     .feature();
///
/// assert_eq!(feature.steps().len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    name: String,
    labels: Labels,
    setup: Option<Step>,
    assessments: Vec<Step>,
    teardown: Option<Step>,
}

impl FeatureBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            setup: None,
            assessments: Vec::new(),
            teardown: None,
        }
    }

    /// Add a label. Repeating a key keeps every value.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key, value);
        self
    }

    /// Set the setup step, replacing any earlier one.
    pub fn setup<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Context, TestHandle, Arc<Config>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Context> + Send + 'static,
    {
        self.with_step("setup", Level::Setup, Some(step_fn(f)))
    }

    /// Append a named assessment.
    pub fn assess<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Context, TestHandle, Arc<Config>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Context> + Send + 'static,
    {
        self.with_step(name, Level::Assess, Some(step_fn(f)))
    }

    /// Set the teardown step, replacing any earlier one.
    pub fn teardown<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Context, TestHandle, Arc<Config>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Context> + Send + 'static,
    {
        self.with_step("teardown", Level::Teardown, Some(step_fn(f)))
    }

    /// Register a step at any level. `None` registers a no-op.
    pub fn with_step(mut self, name: impl Into<String>, level: Level, func: Option<StepFunc>) -> Self {
        let step = Step::new(name, level, func);
        match level {
            Level::Setup => self.setup = Some(step),
            Level::Assess => self.assessments.push(step),
            Level::Teardown => self.teardown = Some(step),
        }
        self
    }

    /// Freeze the current state into a [`Feature`]. The builder stays usable
    /// and later changes to it do not reach the returned value.
    pub fn feature(&self) -> Feature {
        let steps = self
            .setup
            .iter()
            .chain(&self.assessments)
            .chain(&self.teardown)
            .cloned()
            .collect();
        Feature {
            inner: Arc::new(FeatureInner {
                name: self.name.clone(),
                labels: self.labels.clone(),
                steps,
            }),
        }
    }
}

#[derive(Debug)]
struct FeatureInner {
    name: String,
    labels: Labels,
    steps: Vec<Step>,
}

/// An immutable feature. Cloning shares the same steps.
#[derive(Debug, Clone)]
pub struct Feature {
    inner: Arc<FeatureInner>,
}

impl Feature {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn labels(&self) -> &Labels {
        &self.inner.labels
    }

    /// Setup, then assessments in registration order, then teardown.
    /// No-op steps are included.
    pub fn steps(&self) -> &[Step] {
        &self.inner.steps
    }

    pub fn steps_at(&self, level: Level) -> impl Iterator<Item = &Step> {
        self.inner.steps.iter().filter(move |s| s.level == level)
    }

    pub fn setup(&self) -> Option<&Step> {
        self.steps_at(Level::Setup).next()
    }

    pub fn assessments(&self) -> impl Iterator<Item = &Step> {
        self.steps_at(Level::Assess)
    }

    pub fn teardown(&self) -> Option<&Step> {
        self.steps_at(Level::Teardown).next()
    }
}
