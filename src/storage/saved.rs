use async_trait::async_trait;
use chrono::Utc;

use super::schema::Database;
use super::types::DatabaseError;
use crate::saved::SavedIdStore;

#[async_trait]
impl SavedIdStore for Database {
    async fn contains(&self, id: &str) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM saved_articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(row.is_some())
    }

    async fn add(&self, id: &str) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO saved_articles (id, saved_at) VALUES (?, ?) ON CONFLICT(id) DO NOTHING")
            .bind(id)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        tracing::debug!(id = %id, "Article saved");
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM saved_articles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        tracing::debug!(id = %id, "Article unsaved");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, DatabaseError> {
        // rowid breaks ties between saves within the same millisecond
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM saved_articles ORDER BY saved_at DESC, rowid DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn clear(&self) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM saved_articles")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        tracing::info!(removed = result.rows_affected(), "Saved articles cleared");
        Ok(())
    }
}
