use std::path::PathBuf;

use clap::Args;
use common::prelude::{Passphrase, ProductLine};

use casevault_daemon::state::{AppConfig, AppState, StateError, StorageConfig};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Product line ops act on by default (gtt, soc, mn, mcsc, dp)
    #[arg(long, default_value = "gtt")]
    pub product_line: ProductLine,

    /// Project secret documents are sealed under (generated if not given)
    #[arg(long)]
    pub secret_key: Option<String>,

    /// Command that replicates a changed record directory to the cluster
    #[arg(long)]
    pub cluster_sync_command: Option<String>,

    /// Directory for log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let secret_key = match &self.secret_key {
            Some(secret) => Passphrase::new(secret),
            None => Passphrase::generate(),
        };
        let config = AppConfig {
            product_line: self.product_line,
            secret_key,
            storage: StorageConfig::Filesystem {
                path: None,
                cluster_sync_command: self.cluster_sync_command.clone(),
            },
            log_dir: self.log_dir.clone(),
            ..Default::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let output = format!(
            "Initialized vault directory at: {}\n\
             - Database: {}\n\
             - Files: {}\n\
             - Staging: {}\n\
             - Exports: {}\n\
             - Config: {}\n\
             - Product line: {}",
            state.vault_dir.display(),
            state.db_path.display(),
            state.files_root().display(),
            state.staging_path.display(),
            state.exports_path.display(),
            state.config_path.display(),
            state.config.product_line,
        );

        Ok(output)
    }
}
