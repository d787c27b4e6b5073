use anyhow::{Context, Result};
use async_trait::async_trait;
use libsql::params;
use std::path::Path;

use crate::monitoring::Target;
use crate::pool::{LibsqlManager, LibsqlPool, open_pool};

/// Settings key holding the serialized target list
pub const TARGETS_KEY: &str = "targets";

/// Durable storage of the target list
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Load every persisted target; an empty store yields an empty list
    async fn load_targets(&self) -> Result<Vec<Target>>;

    /// Replace the persisted list with `targets`
    async fn save_targets(&self, targets: &[Target]) -> Result<()>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Open the database file at `path` and run migrations
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = open_pool(path, 4)
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        let conn = pool.get().await?;
        super::initialize_database(&conn).await?;
        drop(conn);

        Ok(Self::new_from_pool(pool))
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT value FROM settings WHERE key = ?", params![key]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().timestamp()],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TargetRepository for DatabaseImpl {
    async fn load_targets(&self) -> Result<Vec<Target>> {
        match self.get_setting(TARGETS_KEY).await? {
            Some(json) => serde_json::from_str(&json).context("decoding persisted targets"),
            None => Ok(Vec::new()),
        }
    }

    async fn save_targets(&self, targets: &[Target]) -> Result<()> {
        let json = serde_json::to_string(targets)?;
        self.set_setting(TARGETS_KEY, &json).await?;
        tracing::debug!(count = targets.len(), "persisted targets");
        Ok(())
    }
}
