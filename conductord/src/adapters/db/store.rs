// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use std::{path::Path, str::FromStr, time::Duration};
use thiserror::Error;

use crate::app::ports::StateUpdate;
use crate::app::types::{
    AccessToken, BackendMetadata, JobState, NormalizedPagination, Page, VerifiedJob,
    VerifiedJobWithAccessToken,
};

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("empty job id")]
    EmptyId,
    #[error("job already exists: {0}")]
    DuplicateId(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("invalid job state in store: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, JobStoreError>;

const JOB_COLUMNS: &str = "id, owner, state, status, failed_state, scheduler_id, \
     working_directory, access_token, job_json, created_at, modified_at, started_at";

/// SQLite-backed job records.
///
/// The immutable job description is kept as JSON; the mutable slice lives in
/// its own columns and is overlaid when a row is read back.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (or create) a file-backed SQLite DB.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let url = format!("sqlite://{}", path_ref.to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Open an in-memory store (handy for tests).
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Improve concurrency for file DBs.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;
        self.ensure_jobs_table().await
    }

    async fn ensure_jobs_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
              id TEXT PRIMARY KEY,
              owner TEXT NOT NULL,
              application_name TEXT NOT NULL,
              application_version TEXT NOT NULL,
              backend TEXT NOT NULL,
              state TEXT NOT NULL,
              status TEXT NOT NULL,
              failed_state TEXT,
              scheduler_id TEXT,
              working_directory TEXT,
              access_token TEXT NOT NULL,
              job_json TEXT NOT NULL,
              created_at INTEGER NOT NULL,  -- unix millis
              modified_at INTEGER NOT NULL,
              started_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_owner_created ON jobs(owner, created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_job(&self, record: &VerifiedJobWithAccessToken) -> Result<()> {
        let job = &record.job;
        if job.id.trim().is_empty() {
            return Err(JobStoreError::EmptyId);
        }
        let job_json = serde_json::to_string(job)?;
        let result = sqlx::query(
            r#"
            insert into jobs(
                id, owner, application_name, application_version, backend, state, status,
                failed_state, scheduler_id, working_directory, access_token, job_json,
                created_at, modified_at, started_at
            )
            values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner)
        .bind(&job.application.application.name)
        .bind(&job.application.application.version)
        .bind(&job.backend)
        .bind(job.current_state.as_str())
        .bind(&job.status)
        .bind(job.failed_state.map(JobState::as_str))
        .bind(job.scheduler_id.as_deref())
        .bind(job.working_directory.as_deref())
        .bind(record.access_token.expose())
        .bind(job_json)
        .bind(job.created_at_ms)
        .bind(job.modified_at_ms)
        .bind(job.started_at_ms)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(JobStoreError::DuplicateId(job.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_job(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> Result<Option<VerifiedJobWithAccessToken>> {
        let row = sqlx::query(&format!(
            "select {JOB_COLUMNS} from jobs where id = ?1 and (?2 is null or owner = ?2)"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_job).transpose()
    }

    /// Single conditional UPDATE; SQLite serializes writers so two callers
    /// expecting the same state cannot both succeed.
    pub async fn transition_job(
        &self,
        id: &str,
        expected: JobState,
        next: JobState,
        update: &StateUpdate,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            update jobs
            set state = ?3,
                status = coalesce(?4, status),
                modified_at = ?5,
                started_at = coalesce(?6, started_at),
                failed_state = coalesce(?7, failed_state)
            where id = ?1 and state = ?2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(update.status.as_deref())
        .bind(update.modified_at_ms)
        .bind(update.started_at_ms)
        .bind(update.failed_state.map(JobState::as_str))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn update_status(
        &self,
        id: &str,
        expected: JobState,
        status: &str,
        modified_at_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "update jobs set status = ?3, modified_at = ?4 where id = ?1 and state = ?2",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(status)
        .bind(modified_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn update_backend_metadata(
        &self,
        id: &str,
        metadata: &BackendMetadata,
        modified_at_ms: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            update jobs
            set scheduler_id = coalesce(?2, scheduler_id),
                working_directory = coalesce(?3, working_directory),
                modified_at = ?4
            where id = ?1
            "#,
        )
        .bind(id)
        .bind(metadata.scheduler_id.as_deref())
        .bind(metadata.working_directory.as_deref())
        .bind(modified_at_ms)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn list_jobs_for_owner(
        &self,
        owner: &str,
        pagination: NormalizedPagination,
    ) -> Result<Page<VerifiedJobWithAccessToken>> {
        let total: i64 = sqlx::query("select count(*) as total from jobs where owner = ?1")
            .bind(owner)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;
        let rows = sqlx::query(&format!(
            "select {JOB_COLUMNS} from jobs where owner = ?1 \
             order by created_at desc, rowid desc limit ?2 offset ?3"
        ))
        .bind(owner)
        .bind(i64::from(pagination.items_per_page))
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page {
            items_in_total: total.max(0) as u64,
            items_per_page: pagination.items_per_page,
            page_number: pagination.page,
            items: rows.into_iter().map(row_to_job).collect::<Result<_>>()?,
        })
    }

    pub async fn list_unfinished_created_before(
        &self,
        created_before_ms: i64,
    ) -> Result<Vec<VerifiedJobWithAccessToken>> {
        let rows = sqlx::query(&format!(
            "select {JOB_COLUMNS} from jobs \
             where created_at < ?1 and state not in (?2, ?3) order by created_at"
        ))
        .bind(created_before_ms)
        .bind(JobState::Success.as_str())
        .bind(JobState::Failure.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn list_in_states(
        &self,
        states: &[JobState],
    ) -> Result<Vec<VerifiedJobWithAccessToken>> {
        let names: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query(&format!(
            "select {JOB_COLUMNS} from jobs \
             where state in (select value from json_each(?1)) order by created_at"
        ))
        .bind(serde_json::to_string(&names)?)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn latest_for_owner(
        &self,
        owner: &str,
        limit: u32,
    ) -> Result<Vec<VerifiedJobWithAccessToken>> {
        let rows = sqlx::query(&format!(
            "select {JOB_COLUMNS} from jobs where owner = ?1 \
             order by created_at desc, rowid desc limit ?2"
        ))
        .bind(owner)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }
}

fn parse_state(raw: &str) -> Result<JobState> {
    raw.parse()
        .map_err(|_| JobStoreError::InvalidState(raw.to_string()))
}

fn row_to_job(row: SqliteRow) -> Result<VerifiedJobWithAccessToken> {
    let mut job: VerifiedJob = serde_json::from_str(row.try_get::<&str, _>("job_json")?)?;
    job.id = row.try_get("id")?;
    job.owner = row.try_get("owner")?;
    job.current_state = parse_state(row.try_get::<&str, _>("state")?)?;
    job.status = row.try_get("status")?;
    job.failed_state = row
        .try_get::<Option<&str>, _>("failed_state")?
        .map(parse_state)
        .transpose()?;
    job.scheduler_id = row.try_get("scheduler_id")?;
    job.working_directory = row.try_get("working_directory")?;
    job.created_at_ms = row.try_get("created_at")?;
    job.modified_at_ms = row.try_get("modified_at")?;
    job.started_at_ms = row.try_get("started_at")?;
    Ok(VerifiedJobWithAccessToken {
        job,
        access_token: AccessToken::new(row.try_get::<String, _>("access_token")?),
    })
}
