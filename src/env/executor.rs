use std::panic::resume_unwind;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::env::action::Role;
use crate::env::{CurrentFeature, Environment};
use crate::features::{Feature, Step};
use crate::testing::result::TestResult;
use crate::testing::{Interrupt, TestHandle, catch_interrupt, panic_message};

impl Environment {
    /// Run `features` as sub-tests of `t`, starting from
    /// [`Environment::context`].
    ///
    /// Features rejected by the name or label filters are dropped without a
    /// trace in the results. If any survive, the before-each-test hooks run
    /// once, then every feature, then the after-each-test hooks once.
    /// Dispatches to [`Environment::test_in_parallel`] when the
    /// configuration enables parallel mode.
    pub async fn test<I>(&self, t: &TestHandle, features: I) -> Context
    where
        I: IntoIterator<Item = Feature>,
    {
        self.test_with(self.context(), t, features).await
    }

    /// [`Environment::test`] starting from `ctx` instead of the environment
    /// context, e.g. one carrying its own cancellation token.
    pub async fn test_with<I>(&self, ctx: Context, t: &TestHandle, features: I) -> Context
    where
        I: IntoIterator<Item = Feature>,
    {
        if self.config().parallel() {
            return self.test_in_parallel_with(ctx, t, features).await;
        }

        let features = self.select(features);
        if features.is_empty() {
            return ctx;
        }

        let mut ctx = match self.before_test(t, ctx).await {
            Ok(ctx) => ctx,
            Err(ctx) => return ctx,
        };
        for feature in features {
            ctx = self.execute_feature(t, ctx, feature).await;
        }
        self.after_test(t, ctx).await
    }

    /// Like [`Environment::test`], but every feature runs in its own task.
    ///
    /// Before/after-each-test hooks still run exactly once, around the whole
    /// batch. Feature hooks may run concurrently with each other.
    pub async fn test_in_parallel<I>(&self, t: &TestHandle, features: I) -> Context
    where
        I: IntoIterator<Item = Feature>,
    {
        self.test_in_parallel_with(self.context(), t, features).await
    }

    /// [`Environment::test_in_parallel`] starting from `ctx`.
    pub async fn test_in_parallel_with<I>(&self, ctx: Context, t: &TestHandle, features: I) -> Context
    where
        I: IntoIterator<Item = Feature>,
    {
        let features = self.select(features);
        if features.is_empty() {
            return ctx;
        }

        let ctx = match self.before_test(t, ctx).await {
            Ok(ctx) => ctx,
            Err(ctx) => return ctx,
        };

        let mut tasks = JoinSet::new();
        for feature in features {
            let env = self.clone();
            let t = t.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                env.execute_feature(&t, ctx, feature).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    resume_unwind(e.into_panic());
                }
                t.error(format!("feature task did not complete: {e}"));
            }
        }

        self.after_test(t, ctx).await
    }

    fn select<I>(&self, features: I) -> Vec<Feature>
    where
        I: IntoIterator<Item = Feature>,
    {
        let filters = self.config().filters();
        features
            .into_iter()
            .filter(|feature| match filters.feature_skip_reason(feature.name(), feature.labels()) {
                Some(reason) => {
                    debug!(feature = feature.name(), %reason, "feature filtered out");
                    false
                }
                None => true,
            })
            .collect()
    }

    /// Run the hooks of `role`, reporting a failure or a recovered panic
    /// on `t`. On error the context to continue from comes back in `Err`.
    ///
    /// With graceful teardown disabled, a panic keeps unwinding.
    async fn run_hooks(&self, t: &TestHandle, role: Role, ctx: Context) -> Result<Context, Context> {
        if self.config().dry_run() {
            return Ok(ctx);
        }
        match catch_interrupt(self.run_role(role, ctx.clone())).await {
            Ok(Ok(next)) => Ok(next),
            Ok(Err(failure)) => {
                t.error(&failure);
                Err(failure.context)
            }
            Err(Interrupt::Panicked(payload)) => {
                if self.config().graceful_teardown_disabled() {
                    resume_unwind(payload);
                }
                let message = panic_message(payload.as_ref());
                warn!(test = t.name(), %role, "recovered panic: {message}");
                t.error(format!("panic in {role} hook: {message}"));
                Err(ctx)
            }
            Err(Interrupt::Failed | Interrupt::Skipped) => {
                t.error(format!("{role} hook stopped early"));
                Err(ctx)
            }
        }
    }

    async fn before_test(&self, t: &TestHandle, ctx: Context) -> Result<Context, Context> {
        self.run_hooks(t, Role::BeforeEachTest, ctx).await
    }

    async fn after_test(&self, t: &TestHandle, ctx: Context) -> Context {
        let ctx = match self.run_hooks(t, Role::AfterEachTest, ctx).await {
            Ok(ctx) | Err(ctx) => ctx,
        };
        ctx.without_value::<CurrentFeature>()
    }

    /// Run one feature as a sub-test of `t` and return its final context.
    async fn execute_feature(&self, t: &TestHandle, ctx: Context, feature: Feature) -> Context {
        let mut out = ctx.clone();
        let slot = &mut out;
        let name = feature.name().to_owned();
        t.run(&name, move |ft| async move {
            *slot = self.feature_body(&ft, ctx, &feature).await;
        })
        .await;
        out
    }

    async fn feature_body(&self, ft: &TestHandle, ctx: Context, feature: &Feature) -> Context {
        let cfg = self.config();
        info!(feature = feature.name(), "running feature");

        let mut ctx = match self
            .run_hooks(ft, Role::BeforeEachFeature, ctx.with_value::<CurrentFeature>(feature.clone()))
            .await
        {
            Ok(ctx) => ctx,
            Err(ctx) => return ctx,
        };

        let mut skip_reason = None;
        if let Some(setup) = feature.setup() {
            match self.run_step(ft, setup, ctx.clone()).await {
                Some(next) => ctx = next,
                None => skip_reason = Some("setup failed"),
            }
        }

        for step in feature.assessments() {
            if let Some(reason) = cfg.filters().assessment_skip_reason(step.name()) {
                debug!(feature = feature.name(), assessment = step.name(), %reason, "assessment filtered out");
                continue;
            }
            if let Some(reason) = skip_reason {
                ft.record(TestResult::skipped(step.name(), reason));
                continue;
            }

            let mut next = None;
            let slot = &mut next;
            let input = ctx.clone();
            let passed = ft
                .run(step.name(), move |at| async move {
                    *slot = self.run_step(&at, step, input).await;
                })
                .await;
            if let Some(next) = next {
                ctx = next;
            }
            if !passed && cfg.fail_fast() {
                info!(feature = feature.name(), assessment = step.name(), "fail-fast: skipping remaining assessments");
                skip_reason = Some("skipped by fail-fast");
            }
        }

        if let Some(teardown) = feature.teardown()
            && let Some(next) = self.run_step(ft, teardown, ctx.clone()).await
        {
            ctx = next;
        }

        match self.run_hooks(ft, Role::AfterEachFeature, ctx).await {
            Ok(ctx) | Err(ctx) => ctx,
        }
    }

    /// Run one step body under `t`. Returns `None` if the body stopped early
    /// (fatal, skip or a recovered panic); the caller keeps its context.
    ///
    /// With graceful teardown disabled, a panic keeps unwinding and no
    /// further steps of the feature run.
    async fn run_step(&self, t: &TestHandle, step: &Step, ctx: Context) -> Option<Context> {
        let cfg = self.config();
        if cfg.dry_run() || step.is_noop() {
            return Some(ctx);
        }

        debug!(test = t.name(), step = step.name(), level = %step.level(), "running step");
        match catch_interrupt(step.run(ctx, t.clone(), cfg.clone())).await {
            Ok(next) => Some(next),
            Err(Interrupt::Failed | Interrupt::Skipped) => None,
            Err(Interrupt::Panicked(payload)) => {
                if cfg.graceful_teardown_disabled() {
                    resume_unwind(payload);
                }
                let message = panic_message(payload.as_ref());
                warn!(test = t.name(), step = step.name(), "recovered panic: {message}");
                t.error(format!("panic in {} step {:?}: {message}", step.level(), step.name()));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::context::Context;
    use crate::env::Environment;
    use crate::env::action::{EnvFunc, FuncError, env_func};
    use crate::envconf::Config;
    use crate::envconf::filter::Filters;
    use crate::error::Error;
    use crate::features::FeatureBuilder;
    use crate::testing::TestHandle;
    use crate::testing::result::TestStatus;

    type Log = Arc<Mutex<Vec<String>>>;

    fn hook(label: &'static str, log: &Log) -> EnvFunc {
        let log = Arc::clone(log);
        env_func(move |ctx, _cfg| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(label.to_owned());
                Ok(ctx)
            }
        })
    }

    fn feature(name: &str, log: &Log) -> crate::features::Feature {
        let (s, a, d) = (Arc::clone(log), Arc::clone(log), Arc::clone(log));
        let prefix = name.to_owned();
        let (p1, p2, p3) = (prefix.clone(), prefix.clone(), prefix);
        FeatureBuilder::new(name)
            .setup(move |ctx, _t, _cfg| {
                s.lock().push(format!("{p1}:setup"));
                async move { ctx }
            })
            .assess("check", move |ctx, _t, _cfg| {
                a.lock().push(format!("{p2}:assess"));
                async move { ctx }
            })
            .teardown(move |ctx, _t, _cfg| {
                d.lock().push(format!("{p3}:teardown"));
                async move { ctx }
            })
            .feature()
    }

    #[tokio::test]
    async fn test_hooks_bracket_the_whole_call() {
        let log = Log::default();
        let env = Environment::new();
        env.before_each_test([hook("before-test", &log)])
            .after_each_test([hook("after-test", &log)])
            .before_each_feature([hook("before-feature", &log)])
            .after_each_feature([hook("after-feature", &log)]);
        let t = TestHandle::root("TestX");
        env.test(&t, [feature("a", &log), feature("b", &log)]).await;
        assert_eq!(
            *log.lock(),
            [
                "before-test",
                "before-feature",
                "a:setup",
                "a:assess",
                "a:teardown",
                "after-feature",
                "before-feature",
                "b:setup",
                "b:assess",
                "b:teardown",
                "after-feature",
                "after-test",
            ]
        );
        assert!(!t.failed());
    }

    #[tokio::test]
    async fn all_filtered_skips_test_hooks() {
        let log = Log::default();
        let filters = Filters::new().with_feature_regex("^nothing$").unwrap();
        let env = Environment::with_config(Config::new().with_filters(filters));
        env.before_each_test([hook("before-test", &log)]);
        let t = TestHandle::root("TestX");
        env.test(&t, [feature("a", &log)]).await;
        assert!(log.lock().is_empty());
        assert!(t.result().children.is_empty());
    }

    #[tokio::test]
    async fn before_test_failure_stops_the_call() {
        let log = Log::default();
        let env = Environment::new();
        env.before_each_test([env_func(|_ctx, _cfg| async move {
            Err::<Context, _>(FuncError::new(Error::cluster("no cluster")))
        })]);
        let t = TestHandle::root("TestX");
        env.test(&t, [feature("a", &log)]).await;
        assert!(t.failed());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn before_feature_failure_fails_only_that_feature() {
        let log = Log::default();
        let env = Environment::new();
        env.before_each_feature([env_func(|ctx: Context, _cfg| async move {
            let name = ctx
                .value::<crate::env::CurrentFeature>()
                .map(|f| f.name().to_owned())
                .unwrap_or_default();
            if name == "a" {
                Err(FuncError::new(Error::cluster("hook refused a")))
            } else {
                Ok(ctx)
            }
        })]);
        let t = TestHandle::root("TestX");
        env.test(&t, [feature("a", &log), feature("b", &log)]).await;
        let result = t.result();
        assert_eq!(result.child("a").unwrap().status, TestStatus::Failed);
        assert_eq!(result.child("b").unwrap().status, TestStatus::Passed);
        assert_eq!(*log.lock(), ["b:setup", "b:assess", "b:teardown"]);
    }

    #[tokio::test]
    async fn setup_fatal_skips_assessments_but_tears_down() {
        let log = Log::default();
        let teardown_log = Arc::clone(&log);
        let env = Environment::new();
        let f = FeatureBuilder::new("broken")
            .setup(|_ctx, t, _cfg| async move {
                t.require::<Context, _>(Err("cannot create deployment"))
            })
            .assess("never", |ctx, _t, _cfg| async move { ctx })
            .teardown(move |ctx, _t, _cfg| {
                teardown_log.lock().push("teardown".to_owned());
                async move { ctx }
            })
            .feature();
        let t = TestHandle::root("TestX");
        env.test(&t, [f]).await;
        let feature = t.result().children.remove(0);
        assert_eq!(feature.status, TestStatus::Failed);
        assert_eq!(feature.child("never").unwrap().status, TestStatus::Skipped);
        assert_eq!(*log.lock(), ["teardown"]);
    }

    #[tokio::test]
    async fn panics_are_recovered_as_failures() {
        let log = Log::default();
        let teardown_log = Arc::clone(&log);
        let env = Environment::new();
        let f = FeatureBuilder::new("panicky")
            .assess("explodes", |ctx: Context, _t, _cfg| async move {
                if !ctx.is_cancelled() {
                    panic!("index out of range");
                }
                ctx
            })
            .teardown(move |ctx, _t, _cfg| {
                teardown_log.lock().push("teardown".to_owned());
                async move { ctx }
            })
            .feature();
        let t = TestHandle::root("TestX");
        env.test(&t, [f]).await;
        let result = t.result();
        let assess = result.find("panicky/explodes").unwrap();
        assert_eq!(assess.status, TestStatus::Failed);
        assert!(assess.messages[0].contains("index out of range"));
        assert_eq!(*log.lock(), ["teardown"]);
    }

    #[tokio::test]
    async fn panics_propagate_when_graceful_teardown_disabled() {
        let env = Environment::with_config(Config::new().with_graceful_teardown_disabled(true));
        let f = FeatureBuilder::new("panicky")
            .assess("explodes", |ctx: Context, _t, _cfg| async move {
                if !ctx.is_cancelled() {
                    panic!("boom");
                }
                ctx
            })
            .feature();
        let t = TestHandle::root("TestX");
        let outcome = crate::testing::catch_interrupt(env.test(&t, [f])).await;
        assert!(matches!(outcome, Err(crate::testing::Interrupt::Panicked(_))));
    }

    #[tokio::test]
    async fn context_flows_between_steps() {
        struct Seen;
        impl crate::context::ContextKey for Seen {
            type Value = u32;
        }

        let env = Environment::new();
        let f = FeatureBuilder::new("counter")
            .setup(|ctx: Context, _t, _cfg| async move { ctx.with_value::<Seen>(1) })
            .assess("bump", |ctx: Context, _t, _cfg| async move {
                let n = ctx.value::<Seen>().copied().unwrap_or_default();
                ctx.with_value::<Seen>(n + 1)
            })
            .teardown(|ctx: Context, t: TestHandle, _cfg| async move {
                let n = ctx.value::<Seen>().copied().unwrap_or_default();
                if n != 2 {
                    t.error(format!("teardown saw {n}"));
                }
                ctx
            })
            .feature();
        let t = TestHandle::root("TestX");
        let ctx = env.test(&t, [f]).await;
        assert!(!t.failed());
        assert_eq!(ctx.value::<Seen>(), Some(&2));
        assert!(!ctx.contains::<crate::env::CurrentFeature>());
    }

    fn panicking_hook() -> EnvFunc {
        env_func(|ctx: Context, _cfg| async move {
            if !ctx.is_cancelled() {
                panic!("hook exploded");
            }
            Ok::<_, FuncError>(ctx)
        })
    }

    #[tokio::test]
    async fn hook_panic_fails_only_its_feature() {
        let log = Log::default();
        let env = Environment::new();
        env.before_each_feature([env_func(|ctx: Context, _cfg| async move {
            let current = ctx.value::<crate::env::CurrentFeature>().map(|f| f.name().to_owned());
            if current.as_deref() == Some("a") {
                panic!("hook exploded");
            }
            Ok::<_, FuncError>(ctx)
        })]);
        let t = TestHandle::root("TestX");
        env.test(&t, [feature("a", &log), feature("b", &log)]).await;

        let result = t.result();
        let a = result.child("a").unwrap();
        assert_eq!(a.status, TestStatus::Failed);
        assert_eq!(a.messages, ["panic in before-each-feature hook: hook exploded"]);
        assert_eq!(result.child("b").unwrap().status, TestStatus::Passed);
        assert_eq!(*log.lock(), ["b:setup", "b:assess", "b:teardown"]);
    }

    #[tokio::test]
    async fn after_test_hook_panic_fails_the_test() {
        let log = Log::default();
        let env = Environment::new();
        env.after_each_test([panicking_hook()]);
        let t = TestHandle::root("TestX");
        env.test(&t, [feature("a", &log)]).await;
        assert!(t.failed());
        assert_eq!(t.result().child("a").unwrap().status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn hook_panic_propagates_when_graceful_teardown_disabled() {
        let log = Log::default();
        let env = Environment::with_config(Config::new().with_graceful_teardown_disabled(true));
        env.after_each_feature([panicking_hook()]);
        let t = TestHandle::root("TestX");
        let outcome = crate::testing::catch_interrupt(env.test(&t, [feature("a", &log)])).await;
        assert!(matches!(outcome, Err(crate::testing::Interrupt::Panicked(_))));
    }

    #[tokio::test]
    async fn explicit_context_is_used_instead_of_environment_context() {
        struct Tag;
        impl crate::context::ContextKey for Tag {
            type Value = &'static str;
        }

        let seen: Arc<Mutex<Option<&'static str>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let env = Environment::new();
        let f = FeatureBuilder::new("tagged")
            .assess("reads tag", move |ctx: Context, _t, _cfg| {
                *sink.lock() = ctx.value::<Tag>().copied();
                async move { ctx }
            })
            .feature();
        let t = TestHandle::root("TestX");
        let ctx = env.test_with(Context::new().with_value::<Tag>("call-local"), &t, [f]).await;
        assert_eq!(*seen.lock(), Some("call-local"));
        assert_eq!(ctx.value::<Tag>(), Some(&"call-local"));
        assert!(!env.context().contains::<Tag>());
    }
}
