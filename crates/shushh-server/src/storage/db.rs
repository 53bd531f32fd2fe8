//! SQLite database layer (embedded, no external dependencies)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use shushh_core::ports::TransportKeyStore;
use shushh_core::{CoreError, SessionKey, StoredKey};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

pub struct Database {
    pool: Arc<SqlitePool>,
}

impl Database {
    pub async fn new(database_path: &str) -> Result<Self> {
        tracing::info!("Opening SQLite database at: {}", database_path);

        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| {
                format!("Failed to connect to SQLite database at: {}", database_path)
            })?;

        Self::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        tracing::info!("Database initialization complete");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transport_keys (
                user_id TEXT PRIMARY KEY,
                key_hex TEXT NOT NULL,
                iv_hex TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn get_transport_key(&self, user_id: &str) -> Result<Option<StoredKey>> {
        let row = sqlx::query("SELECT key_hex, iv_hex FROM transport_keys WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(|row| StoredKey {
            key: row.get("key_hex"),
            iv: row.get("iv_hex"),
        }))
    }

    pub async fn upsert_transport_key(&self, user_id: &str, stored: &StoredKey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transport_keys (user_id, key_hex, iv_hex, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                key_hex = excluded.key_hex,
                iv_hex = excluded.iv_hex,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&stored.key)
        .bind(&stored.iv)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TransportKeyStore for Database {
    async fn load_transport_key(&self, user_id: &str) -> shushh_core::Result<Option<SessionKey>> {
        let stored = self
            .get_transport_key(user_id)
            .await
            .map_err(|e| CoreError::Storage(format!("{:#}", e)))?;

        stored.as_ref().map(SessionKey::from_stored).transpose()
    }

    async fn save_transport_key(&self, user_id: &str, key: &SessionKey) -> shushh_core::Result<()> {
        self.upsert_transport_key(user_id, &key.to_stored())
            .await
            .map_err(|e| CoreError::Storage(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    async fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_missing_key() {
        let (_dir, db) = temp_db().await;
        assert!(db.load_transport_key("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_overwrite() {
        let (_dir, db) = temp_db().await;

        let first = SessionKey::new([1u8; 32], [2u8; 32]);
        assert_ok!(db.save_transport_key("7", &first).await);
        assert_eq!(db.load_transport_key("7").await.unwrap(), Some(first));

        let second = SessionKey::new([3u8; 32], [4u8; 32]);
        assert_ok!(db.save_transport_key("7", &second).await);
        assert_eq!(db.load_transport_key("7").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let key = SessionKey::new([9u8; 32], [8u8; 32]);

        {
            let db = Database::new(path.to_str().unwrap()).await.unwrap();
            db.save_transport_key("3", &key).await.unwrap();
        }

        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        assert_eq!(db.load_transport_key("3").await.unwrap(), Some(key));
    }

    #[tokio::test]
    async fn test_corrupt_row_is_an_error() {
        let (_dir, db) = temp_db().await;
        db.upsert_transport_key(
            "4",
            &StoredKey {
                key: "zz".to_string(),
                iv: "00".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            db.load_transport_key("4").await,
            Err(CoreError::KeyDecode(_))
        ));
    }
}
