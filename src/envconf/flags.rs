use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::envconf::filter::Labels;
use crate::error::Result;

/// Output format for the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// `go test -v` style lines on stdout.
    #[default]
    Text,
    Json,
    Yaml,
    Junit,
}

/// Command-line flags recognised by a suite binary.
///
/// Parse with [`Flags::parse`] (process arguments) or
/// [`Flags::try_parse_from`]; convert into a [`Config`](crate::envconf::Config)
/// with [`Config::from_flags`](crate::envconf::Config::from_flags). Label
/// flags are validated here so a malformed pair fails before any cluster
/// work starts.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "kube-e2e", about = "Run end-to-end features against a Kubernetes cluster")]
pub struct Flags {
    /// Regular expression selecting features to run
    #[arg(long, value_name = "REGEX")]
    pub feature: Option<String>,

    /// Regular expression selecting assessments to run
    #[arg(long, value_name = "REGEX")]
    pub assess: Option<String>,

    /// Comma-separated key=value labels a feature must carry (repeatable)
    #[arg(long, value_name = "K=V,...", value_parser = parse_labels)]
    pub labels: Vec<Labels>,

    /// Comma-separated key=value labels that exclude a feature (repeatable)
    #[arg(long = "skip-labels", value_name = "K=V,...", value_parser = parse_labels)]
    pub skip_labels: Vec<Labels>,

    /// Regular expression of feature names to skip
    #[arg(long = "skip-features", value_name = "REGEX")]
    pub skip_features: Option<String>,

    /// Regular expression of assessment names to skip
    #[arg(long = "skip-assessment", value_name = "REGEX")]
    pub skip_assessment: Option<String>,

    /// Regular expression selecting top-level tests to run
    #[arg(long, value_name = "REGEX")]
    pub run: Option<String>,

    /// Namespace used by the suite
    #[arg(long)]
    pub namespace: Option<String>,

    /// Path to the kubeconfig file used to reach the cluster
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Run the features of each test concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Report the suite structure without invoking any step or hook
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Stop running assessments of a feature after the first failure
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    /// Let panics propagate instead of recovering and running teardown
    #[arg(long = "disable-graceful-teardown")]
    pub disable_graceful_teardown: bool,

    /// Log verbosity (0 = warnings, 1 = info, 2 = debug, 3+ = trace)
    #[arg(long = "v", default_value_t = 0)]
    pub verbosity: u8,

    /// Format of the final report
    #[arg(long = "report-format", value_enum, default_value_t = ReportFormat::Text)]
    pub report_format: ReportFormat,

    /// Write the report to this file instead of stdout
    #[arg(long = "report-file", value_name = "PATH")]
    pub report_file: Option<PathBuf>,
}

fn parse_labels(input: &str) -> Result<Labels, String> {
    input.parse::<Labels>().map_err(|e| e.to_string())
}

impl Flags {
    /// All `--labels` occurrences merged into one multimap.
    pub fn merged_labels(&self) -> Labels {
        merge(&self.labels)
    }

    /// All `--skip-labels` occurrences merged into one multimap.
    pub fn merged_skip_labels(&self) -> Labels {
        merge(&self.skip_labels)
    }

    /// Parse flags from an explicit argument list (first item is the program name).
    ///
    /// # Errors
    ///
    /// Returns the clap error for unknown flags, malformed labels, or
    /// missing values.
    pub fn parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
    }
}

fn merge(all: &[Labels]) -> Labels {
    let mut merged = Labels::new();
    for labels in all {
        merged.extend(labels.clone());
    }
    merged
}
