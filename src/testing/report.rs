use serde::{Deserialize, Serialize};

use crate::testing::result::{SuiteResult, TestResult};

/// Serializable suite report for emitter output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub run: RunMetadata,
    pub results: Vec<TestReport>,
    pub summary: SummaryReport,
}

/// Metadata about the run execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub duration_ms: u64,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finish_errors: Vec<String>,
}

/// One node of the result tree in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub status: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestReport>,
}

/// Summary statistics in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success: bool,
}

fn to_test_report(result: &TestResult) -> TestReport {
    TestReport {
        name: result.name.clone(),
        status: result.status.to_string(),
        duration_ms: result.duration.as_millis() as u64,
        messages: result.messages.clone(),
        children: result.children.iter().map(to_test_report).collect(),
    }
}

/// Convert a [`SuiteResult`] into a serializable [`SuiteReport`].
pub fn to_report(result: &SuiteResult, run: RunMetadata) -> SuiteReport {
    SuiteReport {
        suite: result.name.clone(),
        run,
        results: result.results.iter().map(to_test_report).collect(),
        summary: SummaryReport {
            total: result.summary.total,
            passed: result.summary.passed,
            failed: result.summary.failed,
            skipped: result.summary.skipped,
            success: result.summary.success(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run_meta() -> RunMetadata {
        RunMetadata {
            duration_ms: 1500,
            exit_code: 1,
            setup_error: None,
            finish_errors: vec!["delete namespace: timed out".into()],
        }
    }

    fn suite() -> SuiteResult {
        SuiteResult::new(
            "e2e",
            Duration::from_millis(1500),
            vec![
                TestResult::failed("TestApps", Duration::from_millis(900), "boom").with_children(
                    vec![
                        TestResult::passed("ready", Duration::from_millis(400)),
                        TestResult::skipped("scale", "fail-fast"),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn report_nests_children() {
        let report = to_report(&suite(), run_meta());
        assert_eq!(report.results.len(), 1);
        let top = &report.results[0];
        assert_eq!(top.status, "failed");
        assert_eq!(top.children[0].status, "passed");
        assert_eq!(top.children[1].status, "skipped");
        assert_eq!(top.children[1].messages, ["fail-fast"]);
    }

    #[test]
    fn report_includes_timing() {
        let report = to_report(&suite(), run_meta());
        assert_eq!(report.run.duration_ms, 1500);
        assert_eq!(report.results[0].duration_ms, 900);
        assert_eq!(report.results[0].children[0].duration_ms, 400);
    }

    #[test]
    fn report_summary() {
        let report = to_report(&suite(), run_meta());
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.failed, 1);
        assert!(!report.summary.success);
        assert_eq!(report.run.exit_code, 1);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let report = to_report(
            &SuiteResult::new(
                "e2e",
                Duration::ZERO,
                vec![TestResult::passed("TestA", Duration::ZERO)],
            ),
            RunMetadata {
                duration_ms: 0,
                exit_code: 0,
                setup_error: None,
                finish_errors: vec![],
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["run"].get("setup_error").is_none());
        assert!(json["run"].get("finish_errors").is_none());
        assert!(json["results"][0].get("children").is_none());
        assert!(json["results"][0].get("messages").is_none());
    }
}
