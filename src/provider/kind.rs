//! [kind](https://kind.sigs.k8s.io) clusters driven through the `kind` binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::info;

use crate::envconf::kubeconfig_path;
use crate::error::{Error, Result};
use crate::provider::{ClusterProvider, run_command, run_command_output};

const PROVIDER: &str = "kind";

/// A kind cluster. Clones refer to the same cluster.
#[derive(Debug, Clone)]
pub struct KindCluster {
    name: String,
    binary: PathBuf,
    image: Option<String>,
    config_file: Option<PathBuf>,
    kubeconfig_dir: PathBuf,
    kubeconfig: Arc<Mutex<Option<PathBuf>>>,
}

impl KindCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: PathBuf::from("kind"),
            image: None,
            config_file: None,
            kubeconfig_dir: std::env::temp_dir(),
            kubeconfig: Arc::new(Mutex::new(None)),
        }
    }

    /// Node image passed as `--image`.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Cluster config passed as `--config`.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Path of the `kind` executable. Defaults to `kind` on `PATH`.
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = path.into();
        self
    }

    /// Directory the kubeconfig is written to. Defaults to the system
    /// temp dir.
    pub fn with_kubeconfig_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.kubeconfig_dir = dir.into();
        self
    }

    pub fn cluster_name(&self) -> &str {
        &self.name
    }

    fn kubeconfig_target(&self) -> PathBuf {
        kubeconfig_path(&self.kubeconfig_dir, &self.name)
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    async fn exists(&self) -> Result<bool> {
        let mut command = self.command();
        command.args(["get", "clusters"]);
        let out = run_command_output(PROVIDER, command).await?;
        Ok(out.lines().any(|line| line.trim() == self.name))
    }

    async fn export_kubeconfig(&self, path: &Path) -> Result<()> {
        let mut command = self.command();
        command.args(["get", "kubeconfig", "--name", self.name.as_str()]);
        let kubeconfig = run_command_output(PROVIDER, command).await?;
        tokio::fs::write(path, kubeconfig)
            .await
            .map_err(|source| Error::Io {
                path: path.to_owned(),
                source,
            })
    }

    fn create_command(&self, kubeconfig: &Path) -> Command {
        let mut command = self.command();
        command
            .args(["create", "cluster", "--name", self.name.as_str(), "--kubeconfig"])
            .arg(kubeconfig);
        if let Some(image) = &self.image {
            command.args(["--image", image.as_str()]);
        }
        if let Some(config) = &self.config_file {
            command.arg("--config").arg(config);
        }
        command
    }
}

#[async_trait]
impl ClusterProvider for KindCluster {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn create(&self) -> Result<PathBuf> {
        let kubeconfig = self.kubeconfig_target();
        if self.exists().await? {
            info!(cluster = %self.name, "reusing existing kind cluster");
            self.export_kubeconfig(&kubeconfig).await?;
        } else {
            info!(cluster = %self.name, "creating kind cluster");
            run_command(PROVIDER, self.create_command(&kubeconfig)).await?;
        }
        *self.kubeconfig.lock() = Some(kubeconfig.clone());
        Ok(kubeconfig)
    }

    async fn destroy(&self) -> Result<()> {
        info!(cluster = %self.name, "deleting kind cluster");
        let mut command = self.command();
        command.args(["delete", "cluster", "--name", self.name.as_str()]);
        if let Some(kubeconfig) = self.kubeconfig() {
            command.arg("--kubeconfig").arg(kubeconfig);
        }
        run_command(PROVIDER, command).await?;
        *self.kubeconfig.lock() = None;
        Ok(())
    }

    fn kubeconfig(&self) -> Option<PathBuf> {
        self.kubeconfig.lock().clone()
    }
}
