use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::attachment::{Attachment, ProductLine};
use common::error::VaultError;
use common::records::RecordStore;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use super::Database;

const SELECT_RECORD_FILE: &str = r#"
    SELECT id, record_id, file_name, category, show_nurse_review, deleted_at
    FROM record_files
"#;

/// Map a query failure, reporting the active-name index as a conflict.
fn persistence(e: sqlx::Error) -> VaultError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return VaultError::conflict("File name already in use on this record");
        }
    }
    VaultError::persistence(e)
}

fn attachment_from_row(row: &SqliteRow) -> Result<Attachment, sqlx::Error> {
    let deleted_at: Option<i64> = row.try_get("deleted_at")?;
    Ok(Attachment {
        id: row.try_get("id")?,
        record_id: row.try_get("record_id")?,
        file_name: row.try_get("file_name")?,
        category: row.try_get("category")?,
        tags: Vec::new(),
        show_nurse_review: row.try_get("show_nurse_review")?,
        deleted_at: deleted_at.and_then(DateTime::from_timestamp_millis),
    })
}

/// Replace the case links of a record file with one row per case id.
async fn link_cases(
    tx: &mut Transaction<'_, Sqlite>,
    record_file_id: &str,
    case_ids: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM record_file_cases WHERE record_file_id = ?")
        .bind(record_file_id)
        .execute(&mut **tx)
        .await?;
    for case_id in case_ids {
        sqlx::query("INSERT INTO record_file_cases (id, record_file_id, case_id) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(record_file_id)
            .bind(case_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

impl Database {
    async fn load_case_links(&self, attachment: &mut Attachment) -> Result<(), sqlx::Error> {
        attachment.tags = sqlx::query_scalar(
            "SELECT case_id FROM record_file_cases WHERE record_file_id = ? ORDER BY rowid",
        )
        .bind(&attachment.id)
        .fetch_all(&**self)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn load_current_attachments(
        &self,
        product: ProductLine,
        record_id: &str,
    ) -> Result<Vec<Attachment>, VaultError> {
        let rows = sqlx::query(&format!(
            "{} WHERE product_line = ? AND record_id = ? AND deleted_at IS NULL ORDER BY file_name",
            SELECT_RECORD_FILE
        ))
        .bind(product.as_str())
        .bind(record_id)
        .fetch_all(&**self)
        .await
        .map_err(persistence)?;

        let mut attachments = rows
            .iter()
            .map(attachment_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(persistence)?;
        if product.tracks_case_associations() {
            for attachment in &mut attachments {
                self.load_case_links(attachment).await.map_err(persistence)?;
            }
        }
        Ok(attachments)
    }

    async fn get_attachment(
        &self,
        product: ProductLine,
        attachment_id: &str,
    ) -> Result<Option<Attachment>, VaultError> {
        let row = sqlx::query(&format!(
            "{} WHERE product_line = ? AND id = ?",
            SELECT_RECORD_FILE
        ))
        .bind(product.as_str())
        .bind(attachment_id)
        .fetch_optional(&**self)
        .await
        .map_err(persistence)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut attachment = attachment_from_row(&row).map_err(persistence)?;
        if product.tracks_case_associations() {
            self.load_case_links(&mut attachment).await.map_err(persistence)?;
        }
        Ok(Some(attachment))
    }

    async fn insert_attachments(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.begin().await.map_err(persistence)?;
        for attachment in attachments {
            sqlx::query(
                r#"
                INSERT INTO record_files
                    (id, product_line, record_id, file_name, category, show_nurse_review, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&attachment.id)
            .bind(product.as_str())
            .bind(&attachment.record_id)
            .bind(&attachment.file_name)
            .bind(&attachment.category)
            .bind(attachment.show_nurse_review)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(persistence)?;

            if product.tracks_case_associations() {
                link_cases(&mut tx, &attachment.id, &attachment.tags)
                    .await
                    .map_err(persistence)?;
            }
        }
        tx.commit().await.map_err(persistence)?;

        tracing::debug!(product = %product, count = attachments.len(), "inserted record files");
        Ok(())
    }

    async fn soft_delete_attachments(
        &self,
        product: ProductLine,
        ids: &[String],
        deleted_at: DateTime<Utc>,
    ) -> Result<(), VaultError> {
        let at = deleted_at.timestamp_millis();
        let mut tx = self.begin().await.map_err(persistence)?;
        for id in ids {
            sqlx::query(
                "UPDATE record_files SET deleted_at = ?, updated_at = ? WHERE product_line = ? AND id = ?",
            )
            .bind(at)
            .bind(at)
            .bind(product.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(persistence)?;
        }
        tx.commit().await.map_err(persistence)
    }

    async fn update_category(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.begin().await.map_err(persistence)?;
        for attachment in attachments {
            sqlx::query(
                "UPDATE record_files SET category = ?, updated_at = ? WHERE product_line = ? AND id = ?",
            )
            .bind(&attachment.category)
            .bind(now)
            .bind(product.as_str())
            .bind(&attachment.id)
            .execute(&mut *tx)
            .await
            .map_err(persistence)?;
        }
        tx.commit().await.map_err(persistence)
    }

    async fn update_associations(
        &self,
        product: ProductLine,
        attachments: &[Attachment],
    ) -> Result<(), VaultError> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.begin().await.map_err(persistence)?;
        for attachment in attachments {
            sqlx::query(
                "UPDATE record_files SET show_nurse_review = ?, updated_at = ? WHERE product_line = ? AND id = ?",
            )
            .bind(attachment.show_nurse_review)
            .bind(now)
            .bind(product.as_str())
            .bind(&attachment.id)
            .execute(&mut *tx)
            .await
            .map_err(persistence)?;

            link_cases(&mut tx, &attachment.id, &attachment.tags)
                .await
                .map_err(persistence)?;
        }
        tx.commit().await.map_err(persistence)
    }

    async fn has_assigned_cases(
        &self,
        product: ProductLine,
        record_id: &str,
    ) -> Result<bool, VaultError> {
        let assigned = self
            .count_assigned_cases(product, record_id)
            .await
            .map_err(persistence)?;
        Ok(assigned > 0)
    }
}
