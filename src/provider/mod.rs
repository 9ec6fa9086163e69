//! Cluster providers create and destroy the cluster a suite runs against.

pub mod kind;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Something that can bring a cluster up and tear it down again.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Short name used in logs and errors, e.g. `kind`.
    fn name(&self) -> &str;

    /// Create the cluster, or reuse an existing one with the same name.
    /// Returns the path of a kubeconfig that reaches it.
    async fn create(&self) -> Result<PathBuf>;

    async fn destroy(&self) -> Result<()>;

    /// Kubeconfig written by the last successful [`create`](Self::create).
    fn kubeconfig(&self) -> Option<PathBuf>;
}

fn describe(command: &Command) -> String {
    let command = command.as_std();
    let mut out = command.get_program().to_string_lossy().into_owned();
    for arg in command.get_args() {
        out.push(' ');
        out.push_str(&arg.to_string_lossy());
    }
    out
}

/// Run `command` to completion, failing on a non-zero exit.
pub(crate) async fn run_command(provider: &str, command: Command) -> Result<()> {
    run_command_output(provider, command).await.map(drop)
}

/// Run `command` to completion and return its stdout.
pub(crate) async fn run_command_output(provider: &str, mut command: Command) -> Result<String> {
    let line = describe(&command);
    debug!(provider, command = %line, "exec");
    let output = command.output().await.map_err(|e| Error::Provider {
        provider: provider.to_owned(),
        message: format!("exec {line}: {e}"),
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Provider {
            provider: provider.to_owned(),
            message: format!("exec failed: {line} ({}): {}", output.status, stderr.trim()),
        });
    }
    String::from_utf8(output.stdout).map_err(|e| Error::Provider {
        provider: provider.to_owned(),
        message: format!("non-utf8 output from {line}: {e}"),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_is_returned() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo hello"]);
        let out = run_command_output("test", command).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_provider_error() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo nope >&2; exit 3"]);
        let err = run_command("test", command).await.unwrap_err();
        let Error::Provider { provider, message } = err else {
            panic!("expected provider error");
        };
        assert_eq!(provider, "test");
        assert!(message.contains("sh -c"));
        assert!(message.ends_with("nope"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_provider_error() {
        let command = Command::new("/definitely/not/a/binary");
        let err = run_command("test", command).await.unwrap_err();
        assert!(err.to_string().starts_with("provider test failed: exec /definitely/not/a/binary"));
    }
}
