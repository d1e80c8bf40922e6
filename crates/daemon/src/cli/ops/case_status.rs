use clap::Args;
use common::prelude::ProductLine;

use crate::cli::op::{product_line, OpContext, SetupError};

#[derive(Args, Debug, Clone)]
pub struct CaseStatus {
    /// Record the case belongs to
    #[arg(long)]
    pub record: String,

    /// Case whose workflow moves
    #[arg(long = "case")]
    pub case_id: String,

    /// New workflow step status, e.g. not_started, in_progress, completed
    #[arg(long)]
    pub status: String,

    /// Product line (defaults to the configured one)
    #[arg(long)]
    pub product_line: Option<ProductLine>,
}

#[derive(Debug, thiserror::Error)]
pub enum CaseStatusError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("status must not be empty")]
    EmptyStatus,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for CaseStatus {
    type Error = CaseStatusError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let status = self.status.trim();
        if status.is_empty() {
            return Err(CaseStatusError::EmptyStatus);
        }

        let service = ctx.service().await?;
        let product = product_line(self.product_line, &service);
        let database = service.database();
        database
            .set_case_status(product, &self.record, &self.case_id, status)
            .await?;

        let cases = database.case_statuses(product, &self.record).await?;
        let mut output = format!("Cases of record {}:", self.record);
        for case in &cases {
            output.push_str(&format!(
                "\n- {}: {}{}",
                case.case_id,
                case.step_status,
                if case.is_assigned() { " (assigned)" } else { "" }
            ));
        }
        Ok(output)
    }
}
