//! The environment drives a suite run: setup actions, the tests, then
//! finish actions.
//!
//! ```no_run
//! use std::process::ExitCode;
//!
//! use kube_e2e::env::Environment;
//! use kube_e2e::envfuncs;
//! use kube_e2e::features::FeatureBuilder;
//! use kube_e2e::provider::kind::KindCluster;
//! use kube_e2e::testing::Suite;
//!
//! #[tokio::main]
//! async fn main() -> ExitCode {
//!     let env = match Environment::from_flags() {
//!         Ok(env) => env,
//!         Err(e) => {
//!             eprintln!("error: {e}");
//!             return ExitCode::from(kube_e2e::env::EXIT_CONFIG_ERROR);
//!         }
//!     };
//!     kube_e2e::telemetry::init_tracing(env.config().verbosity());
//!
//!     let cluster = KindCluster::new("e2e");
//!     env.setup([envfuncs::create_cluster(cluster.clone()), envfuncs::create_namespace("e2e")])
//!         .finish([envfuncs::delete_namespace("e2e"), envfuncs::destroy_cluster(cluster)]);
//!
//!     let tests = env.clone();
//!     let suite = Suite::new("e2e").test("TestPods", move |t| {
//!         let env = tests.clone();
//!         async move {
//!             let feature = FeatureBuilder::new("pods")
//!                 .assess("listed", |ctx, _t, _cfg| async move { ctx })
//!                 .feature();
//!             env.test(&t, [feature]).await;
//!         }
//!     });
//!
//!     env.run_and_report(&suite).await
//! }
//! ```

pub mod action;
mod executor;

use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::context::{Context, ContextKey};
use crate::emit;
use crate::env::action::{Action, ActionFailure, EnvFunc, Role};
use crate::envconf::{Config, ReportOptions};
use crate::error::{Error, Result};
use crate::features::Feature;
use crate::testing::Suite;
use crate::testing::report::{RunMetadata, SuiteReport, to_report};
use crate::testing::result::SuiteResult;

/// Every selected test passed.
pub const EXIT_SUCCESS: u8 = 0;
/// At least one test failed.
pub const EXIT_TESTS_FAILED: u8 = 1;
/// Flags or filters could not be parsed.
pub const EXIT_CONFIG_ERROR: u8 = 2;
/// A setup action failed; no tests ran.
pub const EXIT_SETUP_FAILED: u8 = 3;

/// Context key holding the feature currently being executed. Set before
/// the before-each-feature hooks run.
pub struct CurrentFeature;

impl ContextKey for CurrentFeature {
    type Value = Feature;
}

struct EnvInner {
    cfg: Arc<Config>,
    ctx: RwLock<Context>,
    actions: RwLock<Vec<Action>>,
}

/// A test environment. Cloning shares the same registrations, context
/// and configuration.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.inner.cfg)
            .field("actions", &*self.inner.actions.read())
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// An environment with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::new())
    }

    pub fn with_config(cfg: Config) -> Self {
        Self::with_context(Context::new(), cfg)
    }

    /// An environment whose runs start from `ctx`.
    pub fn with_context(ctx: Context, cfg: Config) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                cfg: Arc::new(cfg),
                ctx: RwLock::new(ctx),
                actions: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Build from the process arguments.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown flags, malformed regexes or
    /// malformed labels. Nothing touches the cluster before this succeeds.
    pub fn from_flags() -> Result<Self> {
        Self::from_args(std::env::args_os())
    }

    /// Build from an explicit argument list (first item is the program name).
    pub fn from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::with_config(Config::from_args(args)?))
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.inner.cfg
    }

    /// The context tests start from. Updated once setup succeeds.
    pub fn context(&self) -> Context {
        self.inner.ctx.read().clone()
    }

    fn set_context(&self, ctx: Context) {
        *self.inner.ctx.write() = ctx;
    }

    // ── registration ───────────────────────────────────────

    fn register<I>(&self, role: Role, funcs: I) -> &Self
    where
        I: IntoIterator,
        I::Item: Into<Option<EnvFunc>>,
    {
        let funcs: Vec<Option<EnvFunc>> = funcs.into_iter().map(Into::into).collect();
        if !funcs.is_empty() {
            self.inner.actions.write().push(Action::new(role, funcs));
        }
        self
    }

    /// Functions run once before any test. A failure aborts the run.
    pub fn setup<I>(&self, funcs: I) -> &Self
    where
        I: IntoIterator,
        I::Item: Into<Option<EnvFunc>>,
    {
        self.register(Role::Setup, funcs)
    }

    /// Functions run at the start of every `test` call.
    pub fn before_each_test<I>(&self, funcs: I) -> &Self
    where
        I: IntoIterator,
        I::Item: Into<Option<EnvFunc>>,
    {
        self.register(Role::BeforeEachTest, funcs)
    }

    /// Functions run before each selected feature.
    pub fn before_each_feature<I>(&self, funcs: I) -> &Self
    where
        I: IntoIterator,
        I::Item: Into<Option<EnvFunc>>,
    {
        self.register(Role::BeforeEachFeature, funcs)
    }

    /// Functions run after each selected feature.
    pub fn after_each_feature<I>(&self, funcs: I) -> &Self
    where
        I: IntoIterator,
        I::Item: Into<Option<EnvFunc>>,
    {
        self.register(Role::AfterEachFeature, funcs)
    }

    /// Functions run at the end of every `test` call.
    pub fn after_each_test<I>(&self, funcs: I) -> &Self
    where
        I: IntoIterator,
        I::Item: Into<Option<EnvFunc>>,
    {
        self.register(Role::AfterEachTest, funcs)
    }

    /// Functions run once after all tests. Every finish function runs even
    /// if an earlier one, in this action or another, failed.
    pub fn finish<I>(&self, funcs: I) -> &Self
    where
        I: IntoIterator,
        I::Item: Into<Option<EnvFunc>>,
    {
        self.register(Role::Finish, funcs)
    }

    fn actions(&self, role: Role) -> Vec<Action> {
        self.inner
            .actions
            .read()
            .iter()
            .filter(|a| a.role() == role)
            .cloned()
            .collect()
    }

    /// Run the actions of `role` in order, stopping at the first failure.
    async fn run_role(&self, role: Role, mut ctx: Context) -> std::result::Result<Context, ActionFailure> {
        for action in self.actions(role) {
            ctx = action.run(ctx, &self.inner.cfg).await?;
        }
        Ok(ctx)
    }

    /// Run every function of every finish action, collecting failures
    /// instead of stopping.
    async fn run_finish(&self, mut ctx: Context) -> Vec<ActionFailure> {
        let mut failures = Vec::new();
        for action in self.actions(Role::Finish) {
            let (next, failed) = action.run_to_end(ctx, &self.inner.cfg).await;
            for failure in &failed {
                error!(error = %failure, "finish function failed, continuing cleanup");
            }
            ctx = next;
            failures.extend(failed);
        }
        failures
    }

    // ── running ────────────────────────────────────────────

    /// Run setup, every test in `suite`, then finish.
    ///
    /// A setup failure skips the tests and the finish actions. A panicking
    /// test is recorded as failed and the run carries on, unless graceful
    /// teardown is disabled. Finish failures are logged and reported but do
    /// not change the exit code.
    /// In dry-run mode no environment function is called.
    pub async fn run(&self, suite: &Suite) -> RunOutcome {
        let start = Instant::now();
        let cfg = &self.inner.cfg;
        info!(suite = suite.name(), tests = suite.len(), dry_run = cfg.dry_run(), "starting run");

        let ctx = self.context();
        if cfg.dry_run() {
            info!("dry run: environment functions are not called");
        } else {
            match self.run_role(Role::Setup, ctx).await {
                Ok(ctx) => self.set_context(ctx),
                Err(failure) => {
                    error!(error = %failure, "setup failed, skipping tests and finish");
                    self.set_context(failure.context.clone());
                    return RunOutcome {
                        exit_code: EXIT_SETUP_FAILED,
                        duration: start.elapsed(),
                        result: SuiteResult::new(suite.name(), Duration::ZERO, Vec::new()),
                        setup_error: Some(failure),
                        finish_errors: Vec::new(),
                    };
                }
            }
        }

        let result = suite.run(cfg.run_filter(), !cfg.graceful_teardown_disabled()).await;

        let finish_errors = if cfg.dry_run() {
            Vec::new()
        } else {
            self.run_finish(self.context()).await
        };

        let exit_code = if result.success() {
            EXIT_SUCCESS
        } else {
            EXIT_TESTS_FAILED
        };
        info!(
            passed = result.summary.passed,
            failed = result.summary.failed,
            skipped = result.summary.skipped,
            finish_errors = finish_errors.len(),
            "run complete"
        );
        RunOutcome {
            exit_code,
            duration: start.elapsed(),
            result,
            setup_error: None,
            finish_errors,
        }
    }

    /// [`Environment::run`], then write the report the configuration asks
    /// for and turn the outcome into a process exit code.
    pub async fn run_and_report(&self, suite: &Suite) -> ExitCode {
        let outcome = self.run(suite).await;
        if let Err(e) = outcome.write_report(self.inner.cfg.report()) {
            warn!(error = %e, "failed to write report");
        }
        ExitCode::from(outcome.exit_code)
    }
}

/// What a suite run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub exit_code: u8,
    pub duration: Duration,
    pub result: SuiteResult,
    pub setup_error: Option<ActionFailure>,
    pub finish_errors: Vec<ActionFailure>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }

    pub fn report(&self) -> SuiteReport {
        to_report(
            &self.result,
            RunMetadata {
                duration_ms: self.duration.as_millis() as u64,
                exit_code: i32::from(self.exit_code),
                setup_error: self.setup_error.as_ref().map(ToString::to_string),
                finish_errors: self.finish_errors.iter().map(ToString::to_string).collect(),
            },
        )
    }

    /// Render the report and write it to the configured file, or stdout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the report file cannot be written.
    pub fn write_report(&self, options: &ReportOptions) -> Result<()> {
        let rendered = emit::render(&self.result, &self.report(), options.format);
        match &options.file {
            Some(path) => {
                std::fs::write(path, rendered).map_err(|source| Error::Io {
                    path: path.clone(),
                    source,
                })?;
                info!(path = %path.display(), "report written");
            }
            None => println!("{rendered}"),
        }
        Ok(())
    }
}
