//! SQLite-backed [`DocumentStore`] implementation.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{Row, SqlitePool};

use sovereign_rag_core::embedding::{blob_to_vec, vec_to_blob};
use sovereign_rag_core::models::{Document, DocumentMetadata};
use sovereign_rag_core::store::DocumentStore;

/// SQLite implementation of the [`DocumentStore`] trait.
///
/// Wraps a [`SqlitePool`]; the schema is created by [`crate::db::migrate`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let uploaded_ms: i64 = row.try_get("uploaded_at")?;
    let uploaded_at = DateTime::from_timestamp_millis(uploaded_ms)
        .ok_or_else(|| anyhow!("invalid uploaded_at timestamp: {}", uploaded_ms))?;
    let size: i64 = row.try_get("size")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;

    Ok(Document {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        content: row.try_get("content")?,
        embedding: embedding.map(|blob| blob_to_vec(&blob)),
        metadata: DocumentMetadata {
            size: size.max(0) as u64,
            mime_type: row.try_get("mime_type")?,
            uploaded_at,
        },
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn put(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, content, mime_type, size, uploaded_at, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                content = excluded.content,
                mime_type = excluded.mime_type,
                size = excluded.size,
                uploaded_at = excluded.uploaded_at,
                embedding = excluded.embedding
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.content)
        .bind(&doc.metadata.mime_type)
        .bind(doc.metadata.size as i64)
        .bind(doc.metadata.uploaded_at.timestamp_millis())
        .bind(doc.embedding.as_deref().map(vec_to_blob))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, filename, content, mime_type, size, uploaded_at, embedding FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_to_set(&self, set: &str, id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO set_members (set_name, member) VALUES (?, ?)")
            .bind(set)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_from_set(&self, set: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM set_members WHERE set_name = ? AND member = ?")
            .bind(set)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT member FROM set_members WHERE set_name = ? ORDER BY seq")
            .bind(set)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("member").map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::open(&tmp.path().join("data/srag.sqlite"))
            .await
            .unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn doc(id: &str, embedding: Option<Vec<f32>>) -> Document {
        Document {
            id: id.to_string(),
            filename: "notes.md".to_string(),
            content: "héllo wörld".to_string(),
            embedding,
            metadata: DocumentMetadata {
                size: 13,
                mime_type: "text/markdown".to_string(),
                uploaded_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            },
        }
    }

    #[tokio::test]
    async fn test_put_get_preserves_fields() {
        let (_tmp, store) = store().await;
        let original = doc("doc:1", Some(vec![0.25, -1.5, 3.0]));
        store.put(&original).await.unwrap();

        let fetched = store.get("doc:1").await.unwrap().unwrap();
        assert_eq!(fetched, original);
        assert!(store.get("doc:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_document_without_embedding() {
        let (_tmp, store) = store().await;
        store.put(&doc("doc:2", None)).await.unwrap();
        assert!(store.get("doc:2").await.unwrap().unwrap().embedding.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_tmp, store) = store().await;
        store.put(&doc("doc:3", None)).await.unwrap();
        assert!(store.delete("doc:3").await.unwrap());
        assert!(!store.delete("doc:3").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_membership_order_and_dedup() {
        let (_tmp, store) = store().await;
        for id in ["b", "a", "c", "a"] {
            store.add_to_set("documents:all", id).await.unwrap();
        }
        store.add_to_set("other", "z").await.unwrap();
        assert_eq!(
            store.members("documents:all").await.unwrap(),
            vec!["b", "a", "c"]
        );

        assert!(store.remove_from_set("documents:all", "a").await.unwrap());
        assert!(!store.remove_from_set("documents:all", "a").await.unwrap());
        assert_eq!(store.members("documents:all").await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.members("other").await.unwrap(), vec!["z"]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("srag.sqlite");
        {
            let store = SqliteStore::new(crate::db::open(&path).await.unwrap());
            store.put(&doc("doc:p", Some(vec![1.0]))).await.unwrap();
            store.add_to_set("documents:all", "doc:p").await.unwrap();
        }
        let store = SqliteStore::new(crate::db::open(&path).await.unwrap());
        assert_eq!(store.members("documents:all").await.unwrap(), vec!["doc:p"]);
        assert!(store.get("doc:p").await.unwrap().is_some());
    }
}
