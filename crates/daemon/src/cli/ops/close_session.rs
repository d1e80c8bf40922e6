use clap::Args;
use common::prelude::{SessionExports, VaultError};

use crate::cli::op::{Failure, OpContext};
use casevault_daemon::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct CloseSession {
    /// Export session to close
    #[arg(long)]
    pub session: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CloseSessionError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Vault(#[from] Failure),
}

impl From<VaultError> for CloseSessionError {
    fn from(err: VaultError) -> Self {
        CloseSessionError::Vault(err.into())
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for CloseSession {
    type Error = CloseSessionError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.load_state()?;
        let dir = state.session_dir(&self.session)?;
        if !dir.exists() {
            return Ok(format!("No open session named {}", self.session));
        }

        let deleted = SessionExports::open(dir)?.close()?;
        Ok(format!(
            "Closed session {}, deleted {} artifact(s)",
            self.session, deleted
        ))
    }
}
