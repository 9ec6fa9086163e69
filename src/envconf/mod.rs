//! Environment-wide configuration shared by every hook and step.

pub mod filter;
pub mod flags;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use crate::envconf::filter::{Filters, Labels};
use crate::envconf::flags::{Flags, ReportFormat};
use crate::error::{Error, Result};
use crate::klient::kube::KubeClient;
use crate::klient::{ClusterClient, Resources};

/// Where and how the final run report is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOptions {
    pub format: ReportFormat,
    /// `None` writes to stdout.
    pub file: Option<PathBuf>,
}

/// Shared settings for one environment.
///
/// Filters and run-mode flags are fixed at construction. The kubeconfig
/// path, namespace and client can be changed by setup functions (for
/// example after creating a cluster), so they sit behind locks and the
/// whole value is shared as `Arc<Config>` across concurrent features.
pub struct Config {
    kubeconfig: RwLock<Option<PathBuf>>,
    namespace: RwLock<String>,
    client: RwLock<Option<Resources>>,
    filters: Filters,
    run_filter: Option<Regex>,
    parallel: bool,
    dry_run: bool,
    fail_fast: bool,
    disable_graceful_teardown: bool,
    verbosity: u8,
    report: ReportOptions,
}

impl Config {
    /// A configuration with no filters, no cluster, and sequential
    /// execution.
    pub fn new() -> Self {
        Self {
            kubeconfig: RwLock::new(None),
            namespace: RwLock::new(String::new()),
            client: RwLock::new(None),
            filters: Filters::default(),
            run_filter: None,
            parallel: false,
            dry_run: false,
            fail_fast: false,
            disable_graceful_teardown: false,
            verbosity: 0,
            report: ReportOptions::default(),
        }
    }

    /// Build a configuration from parsed flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if any regex flag fails to compile.
    pub fn from_flags(flags: Flags) -> Result<Self> {
        let filters = Filters::new()
            .with_feature_regex(flags.feature.as_deref().unwrap_or_default())?
            .with_skip_feature_regex(flags.skip_features.as_deref().unwrap_or_default())?
            .with_assessment_regex(flags.assess.as_deref().unwrap_or_default())?
            .with_skip_assessment_regex(flags.skip_assessment.as_deref().unwrap_or_default())?
            .with_labels(flags.merged_labels())
            .with_skip_labels(flags.merged_skip_labels());

        let mut config = Self::new().with_filters(filters);
        config.run_filter = match flags.run.as_deref() {
            Some(pattern) if !pattern.is_empty() => Some(
                Regex::new(pattern).map_err(|source| Error::InvalidPattern { flag: "run", source })?,
            ),
            _ => None,
        };
        config.parallel = flags.parallel;
        config.dry_run = flags.dry_run;
        config.fail_fast = flags.fail_fast;
        config.disable_graceful_teardown = flags.disable_graceful_teardown;
        config.verbosity = flags.verbosity;
        config.report = ReportOptions {
            format: flags.report_format,
            file: flags.report_file,
        };
        if let Some(ns) = flags.namespace {
            config = config.with_namespace(ns);
        }
        if let Some(path) = flags.kubeconfig {
            config = config.with_kubeconfig_file(path);
        }
        Ok(config)
    }

    /// Parse process-style arguments and build a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparseable flags and
    /// [`Error::InvalidPattern`] for malformed regexes.
    pub fn from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let flags = Flags::parse_args(args).map_err(|e| Error::config(e.to_string()))?;
        Self::from_flags(flags)
    }

    // ── builder ────────────────────────────────────────────

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        *self.namespace.write() = namespace.into();
        self
    }

    pub fn with_kubeconfig_file(self, path: impl Into<PathBuf>) -> Self {
        self.set_kubeconfig_file(path);
        self
    }

    /// Use an already-built cluster client instead of one derived from the
    /// kubeconfig.
    pub fn with_client(self, client: Arc<dyn ClusterClient>) -> Self {
        self.set_client(client);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_graceful_teardown_disabled(mut self, disabled: bool) -> Self {
        self.disable_graceful_teardown = disabled;
        self
    }

    pub fn with_report(mut self, report: ReportOptions) -> Self {
        self.report = report;
        self
    }

    // ── mutable state ──────────────────────────────────────

    /// Point the configuration at a new kubeconfig. Drops any client built
    /// from the previous one.
    pub fn set_kubeconfig_file(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(kubeconfig = %path.display(), "kubeconfig updated");
        *self.kubeconfig.write() = Some(path);
        *self.client.write() = None;
    }

    pub fn set_namespace(&self, namespace: impl Into<String>) {
        *self.namespace.write() = namespace.into();
    }

    pub fn set_client(&self, client: Arc<dyn ClusterClient>) {
        *self.client.write() = Some(Resources::new(client));
    }

    pub fn kubeconfig_file(&self) -> Option<PathBuf> {
        self.kubeconfig.read().clone()
    }

    pub fn namespace(&self) -> String {
        self.namespace.read().clone()
    }

    /// The cluster client, built from the kubeconfig on first use.
    ///
    /// Safe to call from concurrent features. Two racing first calls may
    /// both connect; only the first stored client is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if no client was injected and connecting with the
    /// kubeconfig (or the inferred in-cluster/default config) fails.
    pub async fn client(&self) -> Result<Resources> {
        if let Some(client) = self.client.read().as_ref() {
            return Ok(client.clone());
        }

        let kubeconfig = self.kubeconfig_file();
        let built = KubeClient::connect(kubeconfig.as_deref()).await?;
        let mut slot = self.client.write();
        let client = slot.get_or_insert_with(|| Resources::new(Arc::new(built)));
        Ok(client.clone())
    }

    /// The client if one is already available, without connecting.
    pub fn client_if_ready(&self) -> Option<Resources> {
        self.client.read().clone()
    }

    // ── read-only settings ─────────────────────────────────

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    /// Host-level filter on top-level test names (`--run`).
    pub fn run_filter(&self) -> Option<&Regex> {
        self.run_filter.as_ref()
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    pub fn graceful_teardown_disabled(&self) -> bool {
        self.disable_graceful_teardown
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    pub fn report(&self) -> &ReportOptions {
        &self.report
    }

    pub fn feature_labels(&self) -> &Labels {
        self.filters.labels()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("kubeconfig", &self.kubeconfig_file())
            .field("namespace", &self.namespace())
            .field("has_client", &self.client.read().is_some())
            .field("filters", &self.filters)
            .field("parallel", &self.parallel)
            .field("dry_run", &self.dry_run)
            .field("fail_fast", &self.fail_fast)
            .field("disable_graceful_teardown", &self.disable_graceful_teardown)
            .finish()
    }
}

/// Generate a DNS-1123 compatible name: `prefix-` followed by `len` random
/// lowercase hex characters (at most 32).
pub fn random_name(prefix: &str, len: usize) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let len = len.clamp(1, suffix.len());
    format!("{prefix}-{}", &suffix[..len])
}

/// Where a provider writes the kubeconfig of `cluster_name` inside `dir`.
pub fn kubeconfig_path(dir: &Path, cluster_name: &str) -> PathBuf {
    dir.join(format!("kubeconfig-{cluster_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klient::memory::MemoryCluster;

    #[test]
    fn config_new_defaults() {
        let cfg = Config::new();
        assert!(cfg.kubeconfig_file().is_none());
        assert_eq!(cfg.namespace(), "");
        assert!(cfg.client_if_ready().is_none());
        assert!(!cfg.parallel());
        assert!(!cfg.dry_run());
        assert!(!cfg.fail_fast());
        assert!(!cfg.graceful_teardown_disabled());
        assert!(cfg.run_filter().is_none());
    }

    #[test]
    fn config_from_args_compiles_filters() {
        let cfg = Config::from_args([
            "suite",
            "--feature",
            "^pods",
            "--labels",
            "env=dev",
            "--run",
            "TestPods",
            "--namespace",
            "e2e",
            "--fail-fast",
        ])
        .unwrap();
        assert_eq!(cfg.filters().feature_regex().unwrap().as_str(), "^pods");
        assert!(cfg.feature_labels().contains("env", "dev"));
        assert!(cfg.run_filter().unwrap().is_match("TestPods"));
        assert_eq!(cfg.namespace(), "e2e");
        assert!(cfg.fail_fast());
    }

    #[test]
    fn config_from_args_rejects_bad_regex() {
        let err = Config::from_args(["suite", "--assess", "[oops"]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { flag: "assess", .. }));
    }

    #[test]
    fn config_from_args_rejects_bad_label() {
        let err = Config::from_args(["suite", "--labels", "novalue"]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn config_set_kubeconfig_drops_client() {
        let cfg = Config::new().with_client(Arc::new(MemoryCluster::new()));
        assert!(cfg.client_if_ready().is_some());
        cfg.set_kubeconfig_file("/tmp/kubeconfig");
        assert!(cfg.client_if_ready().is_none());
        assert_eq!(cfg.kubeconfig_file(), Some(PathBuf::from("/tmp/kubeconfig")));
    }

    #[tokio::test]
    async fn config_client_returns_injected_client() {
        let cfg = Config::new().with_client(Arc::new(MemoryCluster::new()));
        assert!(cfg.client().await.is_ok());
    }

    #[test]
    fn config_namespace_is_mutable_through_shared_reference() {
        let cfg = Arc::new(Config::new().with_namespace("a"));
        let shared = Arc::clone(&cfg);
        shared.set_namespace("b");
        assert_eq!(cfg.namespace(), "b");
    }

    #[test]
    fn random_name_has_prefix_and_length() {
        let name = random_name("e2e-ns", 8);
        assert!(name.starts_with("e2e-ns-"));
        assert_eq!(name.len(), "e2e-ns-".len() + 8);
        assert_ne!(random_name("e2e-ns", 8), name);
    }

    #[test]
    fn kubeconfig_path_joins_cluster_name() {
        let path = kubeconfig_path(Path::new("/tmp"), "kind-e2e");
        assert_eq!(path, PathBuf::from("/tmp/kubeconfig-kind-e2e"));
    }
}
