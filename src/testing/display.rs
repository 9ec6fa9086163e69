use crate::testing::result::{SuiteResult, TestResult, TestStatus};

/// Format a status label for terminal output.
fn status_label(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "PASSED",
        TestStatus::Failed => "FAILED",
        TestStatus::Skipped => "SKIPPED",
    }
}

/// Format one result and its children, indented by depth.
pub fn format_test_result(result: &TestResult, depth: usize) -> String {
    let indent = "  ".repeat(depth + 1);
    let status = status_label(result.status);
    let duration_secs = result.duration.as_secs_f64();
    let mut out = format!("{indent}[{status}] {} ({duration_secs:.1}s)", result.name);

    if result.status != TestStatus::Passed {
        for message in &result.messages {
            out.push_str(&format!("\n{indent}       → {message}"));
        }
    }

    for child in &result.children {
        out.push('\n');
        out.push_str(&format_test_result(child, depth + 1));
    }

    out
}

/// Format the final summary line.
pub fn format_summary(result: &SuiteResult) -> String {
    let duration_secs = result.duration.as_secs_f64();
    let mut parts = Vec::new();

    if result.summary.passed > 0 {
        parts.push(format!("{} passed", result.summary.passed));
    }
    if result.summary.failed > 0 {
        parts.push(format!("{} failed", result.summary.failed));
    }
    if result.summary.skipped > 0 {
        parts.push(format!("{} skipped", result.summary.skipped));
    }

    if parts.is_empty() {
        parts.push("0 tests".into());
    }

    format!("\nResults: {} ({:.1}s)", parts.join(", "), duration_secs)
}

/// Format the run header line.
pub fn format_run_header(suite: &str, tests: usize) -> String {
    format!("Running {suite} ({tests} tests)...\n")
}

/// Format a whole suite: every result tree, then the summary.
pub fn format_suite(result: &SuiteResult) -> String {
    let mut out = format_run_header(&result.name, result.results.len());
    for test in &result.results {
        out.push_str(&format_test_result(test, 0));
        out.push('\n');
    }
    out.push_str(&format_summary(result));
    out
}
