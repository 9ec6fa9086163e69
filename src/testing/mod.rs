//! In-process test runner.
//!
//! A [`Suite`] holds named top-level test functions. Each one receives a
//! [`TestHandle`] for reporting failures and opening named sub-tests, and
//! the results form a tree (`Test/feature/assessment`).

pub mod display;
pub mod report;
pub mod result;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::testing::result::{SuiteResult, TestResult, TestStatus};

/// Unwind payload for [`TestHandle::fatal`].
struct FailNow;

/// Unwind payload for [`TestHandle::skip`].
struct SkipNow;

/// Why a test body stopped before returning.
pub enum Interrupt {
    /// [`TestHandle::fatal`] or [`TestHandle::fail_now`] was called.
    Failed,
    /// [`TestHandle::skip`] was called.
    Skipped,
    /// The body panicked.
    Panicked(Box<dyn Any + Send>),
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => write!(f, "Failed"),
            Self::Skipped => write!(f, "Skipped"),
            Self::Panicked(payload) => write!(f, "Panicked({:?})", panic_message(payload.as_ref())),
        }
    }
}

/// Drive `fut` to completion, turning an unwind into an [`Interrupt`].
pub async fn catch_interrupt<F: Future>(fut: F) -> Result<F::Output, Interrupt> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(|payload| {
        if payload.is::<FailNow>() {
            Interrupt::Failed
        } else if payload.is::<SkipNow>() {
            Interrupt::Skipped
        } else {
            Interrupt::Panicked(payload)
        }
    })
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[derive(Default)]
struct HandleState {
    failed: bool,
    skipped: bool,
    messages: Vec<String>,
    children: Vec<TestResult>,
}

struct HandleInner {
    name: String,
    path: String,
    started: Instant,
    state: Mutex<HandleState>,
}

/// Handle to one running test or sub-test.
///
/// Cloning yields another handle to the same test, so handles can move
/// into spawned tasks. All methods are safe to call concurrently.
#[derive(Clone)]
pub struct TestHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for TestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestHandle")
            .field("name", &self.inner.path)
            .field("failed", &self.failed())
            .finish()
    }
}

impl TestHandle {
    /// A top-level test with no parent.
    pub fn root(name: &str) -> Self {
        Self::with_path(name, name.to_owned())
    }

    fn with_path(name: &str, path: String) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name: name.to_owned(),
                path,
                started: Instant::now(),
                state: Mutex::new(HandleState::default()),
            }),
        }
    }

    fn child(&self, name: &str) -> Self {
        Self::with_path(name, format!("{}/{name}", self.inner.path))
    }

    /// Full `/`-separated name, e.g. `TestDeploy/nginx/pods ready`.
    pub fn name(&self) -> &str {
        &self.inner.path
    }

    /// Name of this level only.
    pub fn short_name(&self) -> &str {
        &self.inner.name
    }

    pub fn log(&self, message: impl fmt::Display) {
        let message = message.to_string();
        info!(test = %self.inner.path, "{message}");
        self.inner.state.lock().messages.push(message);
    }

    /// Record a failure and keep running.
    pub fn error(&self, message: impl fmt::Display) {
        let message = message.to_string();
        warn!(test = %self.inner.path, "{message}");
        let mut state = self.inner.state.lock();
        state.failed = true;
        state.messages.push(message);
    }

    /// Mark the test failed without a message.
    pub fn fail(&self) {
        self.inner.state.lock().failed = true;
    }

    /// Mark the test failed and stop its body.
    pub fn fail_now(&self) -> ! {
        self.fail();
        resume_unwind(Box::new(FailNow))
    }

    /// Record a failure and stop the test body.
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        self.error(message);
        resume_unwind(Box::new(FailNow))
    }

    /// Unwrap `result`, or fail the test with the error.
    pub fn require<T, E: fmt::Display>(&self, result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => self.fatal(e),
        }
    }

    /// Mark the test skipped and stop its body.
    pub fn skip(&self, reason: impl fmt::Display) -> ! {
        self.mark_skipped(reason);
        resume_unwind(Box::new(SkipNow))
    }

    /// Mark the test skipped without stopping the caller.
    pub fn mark_skipped(&self, reason: impl fmt::Display) {
        let reason = reason.to_string();
        debug!(test = %self.inner.path, "skipped: {reason}");
        let mut state = self.inner.state.lock();
        state.skipped = true;
        state.messages.push(reason);
    }

    pub fn failed(&self) -> bool {
        self.inner.state.lock().failed
    }

    pub fn skipped(&self) -> bool {
        self.inner.state.lock().skipped
    }

    /// Attach a finished child result. A failed child fails this test.
    pub fn record(&self, child: TestResult) {
        let mut state = self.inner.state.lock();
        if child.status == TestStatus::Failed {
            state.failed = true;
        }
        state.children.push(child);
    }

    /// Run `f` as a named sub-test and record its result. Returns whether
    /// the sub-test did not fail.
    ///
    /// Fatal and skip calls inside `f` end the sub-test only. Any other
    /// panic keeps unwinding.
    pub async fn run<F, Fut>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(TestHandle) -> Fut,
        Fut: Future<Output = ()>,
    {
        let child = self.child(name);
        debug!(test = %child.name(), "=== RUN");
        if let Err(Interrupt::Panicked(payload)) = catch_interrupt(f(child.clone())).await {
            resume_unwind(payload);
        }
        let result = child.result();
        let passed = result.status != TestStatus::Failed;
        self.record(result);
        passed
    }

    /// Snapshot of this test's result so far.
    pub fn result(&self) -> TestResult {
        let state = self.inner.state.lock();
        let status = if state.failed {
            TestStatus::Failed
        } else if state.skipped {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        };
        TestResult {
            name: self.inner.name.clone(),
            status,
            duration: self.inner.started.elapsed(),
            messages: state.messages.clone(),
            children: state.children.clone(),
        }
    }
}

/// A top-level test function.
pub type TestFn = Arc<dyn Fn(TestHandle) -> BoxFuture<'static, ()> + Send + Sync>;

/// An ordered set of named top-level tests.
#[derive(Clone)]
pub struct Suite {
    name: String,
    tests: Vec<(String, TestFn)>,
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("tests", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    /// Add a test. Tests run in the order they are added.
    pub fn test<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TestHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tests
            .push((name.into(), Arc::new(move |t| f(t).boxed())));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tests.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Run every test whose name matches `filter` (all when `None`).
    ///
    /// The filter applies to top-level names only; feature and assessment
    /// filtering happens in the environment. With `recover_panics`, a test
    /// body that panics is recorded as failed and the next test runs;
    /// otherwise the panic keeps unwinding.
    pub async fn run(&self, filter: Option<&Regex>, recover_panics: bool) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(self.tests.len());

        for (name, test) in &self.tests {
            if let Some(re) = filter
                && !re.is_match(name)
            {
                debug!(test = %name, "not selected by --run");
                continue;
            }

            info!(test = %name, "=== RUN");
            let handle = TestHandle::root(name);
            if let Err(Interrupt::Panicked(payload)) = catch_interrupt(test(handle.clone())).await {
                if !recover_panics {
                    resume_unwind(payload);
                }
                let message = panic_message(payload.as_ref());
                warn!(test = %name, "recovered panic: {message}");
                handle.error(format!("panic: {message}"));
            }
            let result = handle.result();
            info!(test = %name, status = %result.status, duration = ?result.duration, "--- DONE");
            results.push(result);
        }

        SuiteResult::new(&self.name, start.elapsed(), results)
    }
}
