//! Database backups.
//!
//! Writes timestamped snapshots of the SQLite store with VACUUM INTO.
//! Backups run independently of any scrape pass and share nothing with it
//! beyond the store itself.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use diesel_async::SimpleAsyncConnection;
use tracing::info;

use crate::repository::AsyncSqlitePool;

/// Creates snapshot files of the database.
pub struct BackupService {
    pool: AsyncSqlitePool,
    backup_dir: PathBuf,
}

impl BackupService {
    pub fn new(pool: AsyncSqlitePool, backup_dir: PathBuf) -> Self {
        Self { pool, backup_dir }
    }

    /// Write a new snapshot and return its path.
    pub async fn create_dump(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.backup_dir)
            .with_context(|| format!("creating backup directory {}", self.backup_dir.display()))?;

        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = self.backup_dir.join(format!("backup_{timestamp}.sqlite3"));

        let mut conn = self
            .pool
            .get()
            .await
            .context("opening database for backup")?;
        let statement = format!("VACUUM INTO '{}'", path.display());
        conn.batch_execute(&statement)
            .await
            .context("writing backup snapshot")?;

        info!("backup created: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn dump_writes_a_snapshot_file() {
        let dir = tempdir().unwrap();
        let pool = AsyncSqlitePool::from_path(&dir.path().join("live.db"));

        // Give the database some content to snapshot.
        let mut conn = pool.get().await.unwrap();
        conn.batch_execute("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .await
            .unwrap();
        drop(conn);

        let service = BackupService::new(pool, dir.path().join("dumps"));
        let path = service.create_dump().await.unwrap();

        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("backup_"));
    }
}
