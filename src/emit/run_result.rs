use std::fmt::Write;

use crate::testing::report::{SuiteReport, TestReport};

/// Emit a suite report as YAML.
pub fn emit_run_yaml(report: &SuiteReport) -> String {
    serde_yaml::to_string(report).unwrap_or_else(|e| format!("# Error serializing report: {e}"))
}

/// Emit a suite report as JSON.
pub fn emit_run_json(report: &SuiteReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{ \"error\": \"{}\" }}", e))
}

/// Emit a suite report as JUnit XML.
///
/// Each top-level test becomes a `<testsuite>`. Every leaf of its tree
/// (an assessment, or a feature without assessments) becomes a
/// `<testcase>` whose classname is the path of its parents.
pub fn emit_run_junit(report: &SuiteReport) -> String {
    let mut out = String::new();
    let name = xml_escape(&report.suite);
    let tests = report.summary.total;
    let failures = report.summary.failed;
    let skipped = report.summary.skipped;
    let time_secs = report.run.duration_ms as f64 / 1000.0;

    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#).unwrap();
    writeln!(
        out,
        r#"<testsuites name="{name}" tests="{tests}" failures="{failures}" skipped="{skipped}" time="{time_secs:.1}">"#
    )
    .unwrap();

    for test in &report.results {
        let mut cases = Vec::new();
        collect_leaves(test, "", &mut cases);
        let failed = cases.iter().filter(|(_, c)| c.status == "failed").count();
        let skipped = cases.iter().filter(|(_, c)| c.status == "skipped").count();
        let suite_time = test.duration_ms as f64 / 1000.0;
        writeln!(
            out,
            r#"  <testsuite name="{}" tests="{}" failures="{failed}" skipped="{skipped}" time="{suite_time:.1}">"#,
            xml_escape(&test.name),
            cases.len()
        )
        .unwrap();

        for (classname, case) in &cases {
            write_case(&mut out, classname, case);
        }

        writeln!(out, "  </testsuite>").unwrap();
    }

    writeln!(out, "</testsuites>").unwrap();

    out
}

fn collect_leaves<'a>(node: &'a TestReport, parent: &str, out: &mut Vec<(String, &'a TestReport)>) {
    if node.children.is_empty() {
        out.push((parent.to_owned(), node));
        return;
    }
    let path = if parent.is_empty() {
        node.name.clone()
    } else {
        format!("{parent}/{}", node.name)
    };
    for child in &node.children {
        collect_leaves(child, &path, out);
    }
}

fn write_case(out: &mut String, classname: &str, case: &TestReport) {
    let step_time = case.duration_ms as f64 / 1000.0;
    writeln!(
        out,
        r#"    <testcase name="{}" classname="{}" time="{step_time:.1}">"#,
        xml_escape(&case.name),
        xml_escape(classname)
    )
    .unwrap();

    match case.status.as_str() {
        "failed" => {
            let message = case
                .messages
                .last()
                .map_or("test failed", String::as_str);
            writeln!(out, r#"      <failure message="{}"/>"#, xml_escape(message)).unwrap();
        }
        "skipped" => writeln!(out, r#"      <skipped/>"#).unwrap(),
        _ => {}
    }

    if !case.messages.is_empty() {
        writeln!(out, "      <system-out>").unwrap();
        for message in &case.messages {
            writeln!(out, "        {}", xml_escape(message)).unwrap();
        }
        writeln!(out, "      </system-out>").unwrap();
    }

    writeln!(out, "    </testcase>").unwrap();
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::report::{RunMetadata, SummaryReport};

    fn node(name: &str, status: &str, ms: u64, children: Vec<TestReport>) -> TestReport {
        TestReport {
            name: name.into(),
            status: status.into(),
            duration_ms: ms,
            messages: if status == "failed" {
                vec!["want 3 replicas, got 1".into()]
            } else {
                vec![]
            },
            children,
        }
    }

    fn make_report(results: Vec<TestReport>, summary: SummaryReport) -> SuiteReport {
        SuiteReport {
            suite: "e2e".into(),
            run: RunMetadata {
                duration_ms: 5000,
                exit_code: if summary.success { 0 } else { 1 },
                setup_error: None,
                finish_errors: vec![],
            },
            results,
            summary,
        }
    }

    fn summary(passed: usize, failed: usize, skipped: usize) -> SummaryReport {
        SummaryReport {
            total: passed + failed + skipped,
            passed,
            failed,
            skipped,
            success: failed == 0,
        }
    }

    fn mixed() -> SuiteReport {
        make_report(
            vec![node(
                "TestApps",
                "failed",
                4000,
                vec![node(
                    "deploy",
                    "failed",
                    3000,
                    vec![
                        node("ready", "passed", 1500, vec![]),
                        node("scaled", "failed", 500, vec![]),
                        node("service", "skipped", 0, vec![]),
                    ],
                )],
            )],
            summary(1, 3, 1),
        )
    }

    // ── YAML / JSON ────────────────────────────────────────────────

    #[test]
    fn emit_run_yaml_statuses() {
        let yaml = emit_run_yaml(&mixed());
        assert!(yaml.contains("suite: e2e"));
        assert!(yaml.contains("status: passed"));
        assert!(yaml.contains("status: failed"));
        assert!(yaml.contains("status: skipped"));
        assert!(yaml.contains("success: false"));
    }

    #[test]
    fn emit_run_yaml_includes_timing() {
        let yaml = emit_run_yaml(&mixed());
        assert!(yaml.contains("duration_ms: 5000"));
        assert!(yaml.contains("duration_ms: 1500"));
    }

    #[test]
    fn emit_run_json_structure() {
        let json = emit_run_json(&mixed());
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["suite"].is_string());
        assert!(parsed["results"][0]["children"].is_array());
        assert!(parsed["summary"]["success"].is_boolean());
        assert_eq!(parsed["run"]["exit_code"], 1);
    }

    #[test]
    fn emit_run_json_parses_back() {
        let json = emit_run_json(&mixed());
        let parsed: SuiteReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.results[0].children[0].children.len(), 3);
        assert_eq!(parsed.summary.failed, 3);
    }

    // ── JUnit ──────────────────────────────────────────────────────

    #[test]
    fn junit_all_passed() {
        let report = make_report(
            vec![node(
                "TestA",
                "passed",
                200,
                vec![node("f", "passed", 100, vec![node("a1", "passed", 50, vec![])])],
            )],
            summary(3, 0, 0),
        );
        let xml = emit_run_junit(&report);
        assert!(xml.contains(r#"<?xml version="1.0""#));
        assert!(xml.contains(r#"<testsuite name="TestA" tests="1""#));
        assert!(xml.contains(r#"<testcase name="a1" classname="TestA/f""#));
        assert!(!xml.contains("<failure"));
        assert!(!xml.contains("<skipped"));
    }

    #[test]
    fn junit_leaves_become_cases() {
        let xml = emit_run_junit(&mixed());
        assert!(xml.contains(r#"tests="3" failures="1" skipped="1""#));
        assert!(xml.contains(r#"<testcase name="ready" classname="TestApps/deploy""#));
        assert!(xml.contains(r#"<failure message="want 3 replicas, got 1"/>"#));
        assert!(xml.contains("<skipped/>"));
        assert!(!xml.contains(r#"<testcase name="deploy""#));
    }

    #[test]
    fn junit_test_without_children_is_a_case() {
        let report = make_report(vec![node("TestLonely", "passed", 10, vec![])], summary(1, 0, 0));
        let xml = emit_run_junit(&report);
        assert!(xml.contains(r#"<testcase name="TestLonely" classname="""#));
    }

    #[test]
    fn junit_timing_in_seconds() {
        let xml = emit_run_junit(&mixed());
        assert!(xml.contains(r#"time="5.0""#));
        assert!(xml.contains(r#"time="1.5""#));
    }

    #[test]
    fn junit_escapes_names() {
        let report = make_report(
            vec![node("Test<&>", "passed", 0, vec![node("a \"b\"", "passed", 0, vec![])])],
            summary(2, 0, 0),
        );
        let xml = emit_run_junit(&report);
        assert!(xml.contains("Test&lt;&amp;&gt;"));
        assert!(xml.contains("a &quot;b&quot;"));
    }
}
