use crate::health::BuildStore;
use crate::models::BuildRow;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

/// Reads the `builds` table written by the history collector.
#[derive(Clone)]
pub struct SqliteBuildStore {
    pool: Pool<Sqlite>,
}

impl SqliteBuildStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildStore for SqliteBuildStore {
    async fn pipeline_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT DISTINCT pipeline_name FROM builds ORDER BY pipeline_name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn builds_for_pipeline(&self, pipeline_name: &str) -> Result<Vec<BuildRow>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT pipeline_name, build_number, status, duration, timestamp, triggered_by, branch, url
            FROM builds
            WHERE pipeline_name = ?
            ORDER BY timestamp DESC
            "#,
        )
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn recent_builds(&self, pipeline_name: &str, limit: usize) -> Result<Vec<BuildRow>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT pipeline_name, build_number, status, duration, timestamp, triggered_by, branch, url
            FROM builds
            WHERE pipeline_name = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(pipeline_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn all_builds(&self) -> Result<Vec<BuildRow>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            "SELECT pipeline_name, build_number, status, duration, timestamp, triggered_by, branch, url FROM builds",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
