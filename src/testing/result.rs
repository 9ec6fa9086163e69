use std::fmt;
use std::time::Duration;

/// The outcome of one test or sub-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of one node in the test tree: a top-level test, a feature, or an
/// assessment.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub duration: Duration,
    /// Log, error and skip messages in the order they were recorded.
    pub messages: Vec<String>,
    pub children: Vec<TestResult>,
}

impl TestResult {
    pub fn passed(name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_owned(),
            status: TestStatus::Passed,
            duration,
            messages: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn failed(name: &str, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            status: TestStatus::Failed,
            duration,
            messages: vec![message.into()],
            children: Vec::new(),
        }
    }

    /// A skipped result with zero duration.
    pub fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            status: TestStatus::Skipped,
            duration: Duration::ZERO,
            messages: vec![reason.into()],
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TestResult>) -> Self {
        self.children = children;
        self
    }

    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&TestResult> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Find a descendant by `/`-separated path relative to this node.
    pub fn find(&self, path: &str) -> Option<&TestResult> {
        path.split('/')
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Visit this node and every descendant, depth first, with each node's
    /// full `/`-joined path.
    pub fn walk<'a>(&'a self, prefix: &str, visit: &mut dyn FnMut(&str, &'a TestResult)) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{prefix}/{}", self.name)
        };
        visit(&path, self);
        for child in &self.children {
            child.walk(&path, visit);
        }
    }
}

/// Counts over every node of a run's result tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            result.walk("", &mut |_, node| {
                summary.total += 1;
                match node.status {
                    TestStatus::Passed => summary.passed += 1,
                    TestStatus::Failed => summary.failed += 1,
                    TestStatus::Skipped => summary.skipped += 1,
                }
            });
        }
        summary
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Everything a suite run produced.
#[derive(Debug, Clone)]
pub struct SuiteResult {
    pub name: String,
    pub duration: Duration,
    pub results: Vec<TestResult>,
    pub summary: RunSummary,
}

impl SuiteResult {
    pub fn new(name: &str, duration: Duration, results: Vec<TestResult>) -> Self {
        let summary = RunSummary::from_results(&results);
        Self {
            name: name.to_owned(),
            duration,
            results,
            summary,
        }
    }

    /// Find a result by full path, e.g. `TestDeploy/nginx/pods ready`.
    pub fn find(&self, path: &str) -> Option<&TestResult> {
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let top = self.results.iter().find(|r| r.name == head)?;
        match rest {
            Some(rest) => top.find(rest),
            None => Some(top),
        }
    }

    pub fn success(&self) -> bool {
        self.summary.success()
    }
}
