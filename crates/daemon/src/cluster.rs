use std::path::Path;

use async_trait::async_trait;
use common::prelude::{ClusterSync, VaultError};
use tokio::process::Command;

/// Replicates record directories by running an operator supplied command,
/// e.g. `rsync -a --relative` wrapped in a script, with the changed directory
/// appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandClusterSync {
    program: String,
    args: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterSyncError {
    #[error("cluster sync command is empty")]
    EmptyCommand,

    #[error("cluster sync command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

impl CommandClusterSync {
    /// Split a whitespace separated command line into program and arguments.
    pub fn parse(command: &str) -> Result<Self, ClusterSyncError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ClusterSyncError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl ClusterSync for CommandClusterSync {
    async fn push_directory(&self, dir: &Path) -> Result<(), VaultError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(dir)
            .output()
            .await?;

        if !output.status.success() {
            let err = ClusterSyncError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            };
            tracing::error!(dir = %dir.display(), error = %err, "cluster propagation failed");
            return Err(VaultError::backend(err));
        }

        tracing::debug!(dir = %dir.display(), "propagated record directory");
        Ok(())
    }
}
