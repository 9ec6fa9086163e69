pub mod run_result;

use crate::envconf::flags::ReportFormat;
use crate::testing::display;
use crate::testing::report::SuiteReport;
use crate::testing::result::SuiteResult;

/// Render a finished run in the requested format.
pub fn render(result: &SuiteResult, report: &SuiteReport, format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => display::format_suite(result),
        ReportFormat::Json => run_result::emit_run_json(report),
        ReportFormat::Yaml => run_result::emit_run_yaml(report),
        ReportFormat::Junit => run_result::emit_run_junit(report),
    }
}
