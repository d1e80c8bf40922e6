use std::path::PathBuf;

use clap::Args;
use common::prelude::*;

use crate::cli::op::{product_line, Failure, OpContext, SetupError};
use casevault_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Reconcile {
    /// Record whose attachments are reconciled
    #[arg(long)]
    pub record: String,

    /// JSON file holding the desired attachment list
    #[arg(long)]
    pub manifest: PathBuf,

    /// Directory holding the uploads named in the manifest (defaults to the
    /// vault's staging directory)
    #[arg(long)]
    pub staging: Option<PathBuf>,

    /// Export session whose download keys are dropped for deleted files
    #[arg(long)]
    pub session: Option<String>,

    /// Product line (defaults to the configured one)
    #[arg(long)]
    pub product_line: Option<ProductLine>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("failed to read manifest: {0}")]
    Manifest(#[from] std::io::Error),

    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] serde_json::Error),

    #[error(transparent)]
    Session(#[from] StateError),

    #[error(transparent)]
    Vault(#[from] Failure),
}

impl From<VaultError> for ReconcileError {
    fn from(err: VaultError) -> Self {
        ReconcileError::Vault(err.into())
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Reconcile {
    type Error = ReconcileError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let manifest = tokio::fs::read(&self.manifest).await?;
        let desired: Vec<AttachmentDescriptor> = serde_json::from_slice(&manifest)?;

        let service = ctx.service().await?;
        let product = product_line(self.product_line, &service);
        let staging = self
            .staging
            .clone()
            .unwrap_or_else(|| service.state().staging_path.clone());

        let session = match &self.session {
            Some(name) => Some(SessionExports::open(service.state().session_dir(name)?)?),
            None => None,
        };

        let report = service
            .reconcile(
                product,
                &self.record,
                &desired,
                &staging,
                session.as_ref().map(|s| s as &dyn ExportRegistry),
            )
            .await?;

        let mut output = format!("Reconciled record {}: {}", self.record, report);
        for id in &report.added {
            output.push_str(&format!("\n+ {}", id));
        }
        for id in &report.deleted {
            output.push_str(&format!("\n- {}", id));
        }
        Ok(output)
    }
}
