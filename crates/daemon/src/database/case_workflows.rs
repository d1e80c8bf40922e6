use chrono::{DateTime, Utc};
use common::attachment::ProductLine;
use sqlx::Row;

use super::Database;

/// Workflow steps in which a case counts as assigned to a reviewer.
pub const ASSIGNED_STATUSES: [&str; 3] = ["not_started", "in_progress", "completed"];

/// Latest workflow status of one case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseStatus {
    pub case_id: String,
    pub record_id: String,
    pub step_status: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CaseStatus {
    pub fn is_assigned(&self) -> bool {
        ASSIGNED_STATUSES.contains(&self.step_status.as_str())
    }
}

const LATEST_CASE_STATUSES: &str = r#"
    SELECT cw.case_id, cw.record_id, cw.step_status, cw.created_at
    FROM case_workflows cw
    WHERE cw.product_line = ?
      AND cw.record_id = ?
      AND cw.id = (
          SELECT MAX(latest.id)
          FROM case_workflows latest
          WHERE latest.product_line = cw.product_line
            AND latest.case_id = cw.case_id
      )
"#;

impl Database {
    /// Append a workflow step for a case.
    pub async fn set_case_status(
        &self,
        product: ProductLine,
        record_id: &str,
        case_id: &str,
        step_status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO case_workflows (product_line, record_id, case_id, step_status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(product.as_str())
        .bind(record_id)
        .bind(case_id)
        .bind(step_status)
        .bind(Utc::now().timestamp_millis())
        .execute(&**self)
        .await?;
        Ok(())
    }

    /// Latest status of every case of a record, by case id.
    pub async fn case_statuses(
        &self,
        product: ProductLine,
        record_id: &str,
    ) -> Result<Vec<CaseStatus>, sqlx::Error> {
        let rows = sqlx::query(&format!("{} ORDER BY cw.case_id", LATEST_CASE_STATUSES))
            .bind(product.as_str())
            .bind(record_id)
            .fetch_all(&**self)
            .await?;

        rows.iter()
            .map(|row| -> Result<CaseStatus, sqlx::Error> {
                let created_at: i64 = row.try_get("created_at")?;
                Ok(CaseStatus {
                    case_id: row.try_get("case_id")?,
                    record_id: row.try_get("record_id")?,
                    step_status: row.try_get("step_status")?,
                    updated_at: DateTime::from_timestamp_millis(created_at),
                })
            })
            .collect()
    }

    pub(crate) async fn count_assigned_cases(
        &self,
        product: ProductLine,
        record_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let placeholders = vec!["?"; ASSIGNED_STATUSES.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM ({}) assigned WHERE assigned.step_status IN ({})",
            LATEST_CASE_STATUSES, placeholders
        );

        let mut query = sqlx::query_scalar::<_, i64>(&sql)
            .bind(product.as_str())
            .bind(record_id);
        for status in ASSIGNED_STATUSES {
            query = query.bind(status);
        }
        query.fetch_one(&**self).await
    }
}
