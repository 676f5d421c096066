//! PostgreSQL status backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use crate::errors::StatusError;
use crate::models::deployment::DeploymentStatus;
use crate::status::backend::{StatusBackend, StatusRow};

/// PostgreSQL-backed status store
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect and make sure the table exists
    pub async fn connect(url: &str) -> Result<Self, StatusError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        let backend = Self { pool };
        backend.ensure_schema().await?;
        info!("Connected to status database");

        Ok(backend)
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<(), StatusError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                logs TEXT NOT NULL DEFAULT '',
                error_message TEXT,
                deployment_url TEXT,
                started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                completed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_status(row: &PgRow) -> Result<DeploymentStatus, StatusError> {
        let started_at: DateTime<Utc> = row.try_get("started_at")?;
        let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;

        StatusRow {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            logs: row.try_get("logs")?,
            error_message: row.try_get("error_message")?,
            deployment_url: row.try_get("deployment_url")?,
            started_at,
            completed_at,
        }
        .into_status()
    }
}

#[async_trait]
impl StatusBackend for PostgresBackend {
    async fn insert(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        let row = StatusRow::from_status(status);

        let result = sqlx::query(
            r#"
            INSERT INTO deployments (
                id, status, logs, error_message, deployment_url, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&row.id)
        .bind(&row.status)
        .bind(&row.logs)
        .bind(&row.error_message)
        .bind(&row.deployment_url)
        .bind(row.started_at)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StatusError::AlreadyExists(row.id));
        }

        Ok(())
    }

    async fn update(&self, status: &DeploymentStatus) -> Result<(), StatusError> {
        let row = StatusRow::from_status(status);

        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET status = $2, logs = $3, error_message = $4, deployment_url = $5,
                completed_at = $6
            WHERE id = $1
            "#,
        )
        .bind(&row.id)
        .bind(&row.status)
        .bind(&row.logs)
        .bind(&row.error_message)
        .bind(&row.deployment_url)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StatusError::NotFound(row.id));
        }

        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<DeploymentStatus>, StatusError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, logs, error_message, deployment_url, started_at, completed_at
            FROM deployments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_status).transpose()
    }
}
