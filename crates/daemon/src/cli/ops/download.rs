use clap::Args;
use common::prelude::*;

use crate::cli::op::{product_line, Failure, OpContext, SetupError};
use casevault_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Download {
    /// Attachment to export
    #[arg(long)]
    pub attachment: String,

    /// Export session the artifact is registered with
    #[arg(long)]
    pub session: String,

    /// Product line (defaults to the configured one)
    #[arg(long)]
    pub product_line: Option<ProductLine>,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Session(#[from] StateError),

    #[error(transparent)]
    Vault(#[from] Failure),
}

impl From<VaultError> for DownloadError {
    fn from(err: VaultError) -> Self {
        DownloadError::Vault(err.into())
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Download {
    type Error = DownloadError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let service = ctx.service().await?;
        let product = product_line(self.product_line, &service);
        let session = SessionExports::open(service.state().session_dir(&self.session)?)?;

        let key = service
            .vault()
            .download(product, &self.attachment, &session)
            .await?;
        let path = session
            .lookup(&key)
            .map(|entry| entry.path.display().to_string())
            .unwrap_or_default();

        Ok(format!(
            "Download key: {}\n\
             - Path: {}\n\
             - Passphrase: {}",
            key,
            path,
            session.passphrase().expose()
        ))
    }
}
