//! SQLite-backed job store implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    Artifact, ContentAnalysis, CreateJobRequest, FileKind, Job, JobDetail, JobError, JobFile,
    JobFilter, JobStatistics, JobStatus, JobStore, JobUpdate, LogEntry, LogLevel, PublishStatus,
    PublishingOutcome, VideoMetadata,
};

const JOB_COLUMNS: &str = "id, uuid, source_url, video_id, status, progress, created_at, \
     started_at, completed_at, error_message, cancelled";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("connection lock poisoned".to_string()))
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                source_url TEXT NOT NULL,
                video_id TEXT,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                cancelled INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_video_id ON jobs(video_id);

            CREATE TABLE IF NOT EXISTS job_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                stage TEXT,
                message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_job_logs_job_id ON job_logs(job_id, id);

            CREATE TABLE IF NOT EXISTS job_metadata (
                job_id INTEGER PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
                title TEXT,
                channel_name TEXT,
                channel_id TEXT,
                upload_date TEXT,
                duration_secs INTEGER,
                view_count INTEGER,
                like_count INTEGER,
                thumbnail_url TEXT,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS job_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                path TEXT NOT NULL,
                size_mb REAL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_job_files_job_id ON job_files(job_id);

            CREATE TABLE IF NOT EXISTS job_analysis (
                job_id INTEGER PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
                summary TEXT,
                key_insights TEXT NOT NULL,
                highlights TEXT NOT NULL,
                topics TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_publishing (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                platform TEXT NOT NULL,
                status TEXT NOT NULL,
                post_id TEXT,
                url TEXT,
                error_message TEXT,
                published_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_job_publishing_job_id ON job_publishing(job_id);
            "#,
        )?;

        Ok(())
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let uuid_str: String = row.get(1)?;
        let status_str: String = row.get(4)?;
        let created_at_str: String = row.get(6)?;
        let started_at_str: Option<String> = row.get(7)?;
        let completed_at_str: Option<String> = row.get(8)?;

        Ok(Job {
            id: row.get(0)?,
            uuid: Uuid::parse_str(&uuid_str).map_err(|e| conversion_error(1, e))?,
            source_url: row.get(2)?,
            video_id: row.get(3)?,
            status: status_str
                .parse::<JobStatus>()
                .map_err(|e| conversion_error(4, e))?,
            progress: row.get(5)?,
            created_at: parse_timestamp(6, &created_at_str)?,
            started_at: started_at_str
                .map(|s| parse_timestamp(7, &s))
                .transpose()?,
            completed_at: completed_at_str
                .map(|s| parse_timestamp(8, &s))
                .transpose()?,
            error_message: row.get(9)?,
            cancelled: row.get(10)?,
        })
    }

    fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
        let timestamp_str: String = row.get(2)?;
        let level_str: String = row.get(3)?;

        Ok(LogEntry {
            id: row.get(0)?,
            job_id: row.get(1)?,
            timestamp: parse_timestamp(2, &timestamp_str)?,
            level: LogLevel::parse(&level_str)
                .ok_or_else(|| conversion_error(3, InvalidColumn(level_str.clone())))?,
            stage: row.get(4)?,
            message: row.get(5)?,
        })
    }

    fn fetch_job(conn: &Connection, id: i64) -> Result<Option<Job>, JobError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let job = conn
            .query_row(&sql, params![id], Self::row_to_job)
            .optional()?;
        Ok(job)
    }

    fn require_job(conn: &Connection, id: i64) -> Result<Job, JobError> {
        Self::fetch_job(conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn fetch_metadata(conn: &Connection, id: i64) -> Result<Option<VideoMetadata>, JobError> {
        let metadata = conn
            .query_row(
                "SELECT title, channel_name, channel_id, upload_date, duration_secs, \
                 view_count, like_count, thumbnail_url, description \
                 FROM job_metadata WHERE job_id = ?1",
                params![id],
                |row| {
                    Ok(VideoMetadata {
                        title: row.get(0)?,
                        channel_name: row.get(1)?,
                        channel_id: row.get(2)?,
                        upload_date: row.get(3)?,
                        duration_secs: row.get(4)?,
                        view_count: row.get(5)?,
                        like_count: row.get(6)?,
                        thumbnail_url: row.get(7)?,
                        description: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(metadata)
    }

    fn fetch_files(conn: &Connection, id: i64) -> Result<Vec<JobFile>, JobError> {
        let mut stmt = conn.prepare(
            "SELECT kind, path, size_mb, created_at FROM job_files WHERE job_id = ?1 ORDER BY id",
        )?;
        let files = stmt
            .query_map(params![id], |row| {
                let kind_str: String = row.get(0)?;
                let created_at_str: String = row.get(3)?;
                Ok(JobFile {
                    kind: FileKind::parse(&kind_str)
                        .ok_or_else(|| conversion_error(0, InvalidColumn(kind_str.clone())))?,
                    path: row.get(1)?,
                    size_mb: row.get(2)?,
                    created_at: parse_timestamp(3, &created_at_str)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }

    fn fetch_analysis(conn: &Connection, id: i64) -> Result<Option<ContentAnalysis>, JobError> {
        let analysis = conn
            .query_row(
                "SELECT summary, key_insights, highlights, topics FROM job_analysis WHERE job_id = ?1",
                params![id],
                |row| {
                    Ok(ContentAnalysis {
                        summary: row.get(0)?,
                        key_insights: parse_json_list(1, &row.get::<_, String>(1)?)?,
                        highlights: parse_json_list(2, &row.get::<_, String>(2)?)?,
                        topics: parse_json_list(3, &row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(analysis)
    }

    fn fetch_publishing(conn: &Connection, id: i64) -> Result<Vec<PublishingOutcome>, JobError> {
        let mut stmt = conn.prepare(
            "SELECT platform, status, post_id, url, error_message, published_at \
             FROM job_publishing WHERE job_id = ?1 ORDER BY id",
        )?;
        let outcomes = stmt
            .query_map(params![id], |row| {
                let status_str: String = row.get(1)?;
                let published_at_str: Option<String> = row.get(5)?;
                Ok(PublishingOutcome {
                    platform: row.get(0)?,
                    status: PublishStatus::parse(&status_str)
                        .ok_or_else(|| conversion_error(1, InvalidColumn(status_str.clone())))?,
                    post_id: row.get(2)?,
                    url: row.get(3)?,
                    error_message: row.get(4)?,
                    published_at: published_at_str
                        .map(|s| parse_timestamp(5, &s))
                        .transpose()?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(outcomes)
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        let conn = self.conn()?;
        let uuid = Uuid::new_v4();
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO jobs (uuid, source_url, video_id, status, progress, created_at, cancelled) \
             VALUES (?1, ?2, ?3, ?4, 0, ?5, 0)",
            params![
                uuid.to_string(),
                request.source_url,
                request.video_id,
                JobStatus::Pending.as_str(),
                created_at.to_rfc3339(),
            ],
        )?;

        Ok(Job {
            id: conn.last_insert_rowid(),
            uuid,
            source_url: request.source_url,
            video_id: request.video_id,
            status: JobStatus::Pending,
            progress: 0,
            created_at,
            started_at: None,
            completed_at: None,
            error_message: None,
            cancelled: false,
        })
    }

    fn get(&self, id: i64) -> Result<Option<Job>, JobError> {
        let conn = self.conn()?;
        Self::fetch_job(&conn, id)
    }

    fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Job>, JobError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM jobs WHERE uuid = ?1", JOB_COLUMNS);
        let job = conn
            .query_row(&sql, params![uuid.to_string()], Self::row_to_job)
            .optional()?;
        Ok(job)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let conn = self.conn()?;
        let (where_clause, mut params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY id DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;

        Ok(count)
    }

    fn pending_jobs(&self) -> Result<Vec<Job>, JobError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ?1 ORDER BY id ASC",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![JobStatus::Pending.as_str()], Self::row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn update_status(&self, id: i64, update: JobUpdate) -> Result<Job, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current = Self::require_job(&tx, id)?;
        if !current.status.can_transition_to(update.status) {
            return Err(JobError::InvalidTransition {
                job_id: id,
                from: current.status,
                to: update.status,
            });
        }

        let now = Utc::now();
        let progress = match update.progress {
            Some(p) => current.progress.max(p.min(100)),
            None => current.progress,
        };
        let started_at = match current.started_at {
            Some(started) => Some(started),
            None if update.status != JobStatus::Pending => Some(now),
            None => None,
        };
        let completed_at = if update.status.is_terminal() {
            Some(now)
        } else {
            current.completed_at
        };
        let error_message = update.error_message.or(current.error_message);
        let cancelled = current.cancelled || update.status == JobStatus::Cancelled;

        tx.execute(
            "UPDATE jobs SET status = ?1, progress = ?2, started_at = ?3, completed_at = ?4, \
             error_message = ?5, cancelled = ?6 WHERE id = ?7",
            params![
                update.status.as_str(),
                progress,
                started_at.map(|t| t.to_rfc3339()),
                completed_at.map(|t| t.to_rfc3339()),
                error_message,
                cancelled,
                id,
            ],
        )?;
        tx.commit()?;

        Ok(Job {
            status: update.status,
            progress,
            started_at,
            completed_at,
            error_message,
            cancelled,
            ..current
        })
    }

    fn cancel(&self, id: i64) -> Result<Job, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current = Self::require_job(&tx, id)?;
        if current.status.is_terminal() {
            return Err(JobError::Conflict {
                job_id: id,
                status: current.status,
                operation: "cancel".to_string(),
            });
        }

        let now = Utc::now();
        let started_at = current.started_at.unwrap_or(now);

        tx.execute(
            "UPDATE jobs SET status = ?1, cancelled = 1, started_at = ?2, completed_at = ?3 \
             WHERE id = ?4",
            params![
                JobStatus::Cancelled.as_str(),
                started_at.to_rfc3339(),
                now.to_rfc3339(),
                id,
            ],
        )?;
        tx.commit()?;

        Ok(Job {
            status: JobStatus::Cancelled,
            cancelled: true,
            started_at: Some(started_at),
            completed_at: Some(now),
            ..current
        })
    }

    fn set_video_id(&self, id: i64, video_id: &str) -> Result<(), JobError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE jobs SET video_id = ?1 WHERE id = ?2",
            params![video_id, id],
        )?;
        if updated == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn append_log(
        &self,
        id: i64,
        level: LogLevel,
        stage: Option<&str>,
        message: &str,
    ) -> Result<LogEntry, JobError> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(JobError::NotFound(id.to_string()));
        }

        let timestamp = Utc::now();
        conn.execute(
            "INSERT INTO job_logs (job_id, timestamp, level, stage, message) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, timestamp.to_rfc3339(), level.as_str(), stage, message],
        )?;

        Ok(LogEntry {
            id: conn.last_insert_rowid(),
            job_id: id,
            timestamp,
            level,
            stage: stage.map(str::to_string),
            message: message.to_string(),
        })
    }

    fn logs(&self, id: i64, offset: i64, limit: i64) -> Result<Vec<LogEntry>, JobError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, timestamp, level, stage, message FROM job_logs \
             WHERE job_id = ?1 ORDER BY id ASC LIMIT ?2 OFFSET ?3",
        )?;
        let entries = stmt
            .query_map(params![id, limit, offset], Self::row_to_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn record_artifact(&self, id: i64, artifact: Artifact) -> Result<(), JobError> {
        let conn = self.conn()?;
        Self::require_job(&conn, id)?;

        match artifact {
            Artifact::Metadata(m) => {
                conn.execute(
                    "INSERT INTO job_metadata (job_id, title, channel_name, channel_id, \
                     upload_date, duration_secs, view_count, like_count, thumbnail_url, description) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                     ON CONFLICT(job_id) DO UPDATE SET title = excluded.title, \
                     channel_name = excluded.channel_name, channel_id = excluded.channel_id, \
                     upload_date = excluded.upload_date, duration_secs = excluded.duration_secs, \
                     view_count = excluded.view_count, like_count = excluded.like_count, \
                     thumbnail_url = excluded.thumbnail_url, description = excluded.description",
                    params![
                        id,
                        m.title,
                        m.channel_name,
                        m.channel_id,
                        m.upload_date,
                        m.duration_secs,
                        m.view_count,
                        m.like_count,
                        m.thumbnail_url,
                        m.description,
                    ],
                )?;
            }
            Artifact::File(file) => {
                conn.execute(
                    "INSERT INTO job_files (job_id, kind, path, size_mb, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id,
                        file.kind.as_str(),
                        file.path,
                        file.size_mb,
                        file.created_at.to_rfc3339(),
                    ],
                )?;
            }
            Artifact::Analysis(analysis) => {
                conn.execute(
                    "INSERT INTO job_analysis (job_id, summary, key_insights, highlights, topics) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(job_id) DO UPDATE SET summary = excluded.summary, \
                     key_insights = excluded.key_insights, highlights = excluded.highlights, \
                     topics = excluded.topics",
                    params![
                        id,
                        analysis.summary,
                        to_json(&analysis.key_insights)?,
                        to_json(&analysis.highlights)?,
                        to_json(&analysis.topics)?,
                    ],
                )?;
            }
            Artifact::Publishing(outcome) => {
                let published_at = match outcome.status {
                    PublishStatus::Success => Some(outcome.published_at.unwrap_or_else(Utc::now)),
                    _ => None,
                };
                conn.execute(
                    "INSERT INTO job_publishing (job_id, platform, status, post_id, url, \
                     error_message, published_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        outcome.platform,
                        outcome.status.as_str(),
                        outcome.post_id,
                        outcome.url,
                        outcome.error_message,
                        published_at.map(|t| t.to_rfc3339()),
                    ],
                )?;
            }
        }

        Ok(())
    }

    fn detail(&self, id: i64) -> Result<Option<JobDetail>, JobError> {
        let conn = self.conn()?;
        let Some(job) = Self::fetch_job(&conn, id)? else {
            return Ok(None);
        };

        Ok(Some(JobDetail {
            job,
            metadata: Self::fetch_metadata(&conn, id)?,
            files: Self::fetch_files(&conn, id)?,
            analysis: Self::fetch_analysis(&conn, id)?,
            publishing: Self::fetch_publishing(&conn, id)?,
        }))
    }

    fn statistics(&self) -> Result<JobStatistics, JobError> {
        let conn = self.conn()?;

        let mut by_status = BTreeMap::new();
        {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status_str, count) = row?;
                let status = status_str
                    .parse::<JobStatus>()
                    .map_err(|e| JobError::Database(e.to_string()))?;
                by_status.insert(status, count);
            }
        }

        let mut durations = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT started_at, completed_at FROM jobs \
                 WHERE status = ?1 AND started_at IS NOT NULL AND completed_at IS NOT NULL",
            )?;
            let rows = stmt.query_map(params![JobStatus::Completed.as_str()], |row| {
                let started: String = row.get(0)?;
                let completed: String = row.get(1)?;
                Ok((parse_timestamp(0, &started)?, parse_timestamp(1, &completed)?))
            })?;
            for row in rows {
                let (started, completed) = row?;
                durations.push((completed - started).num_milliseconds() as f64 / 60_000.0);
            }
        }

        let count = |status: JobStatus| by_status.get(&status).copied().unwrap_or(0);
        let running: i64 = by_status
            .iter()
            .filter(|(status, _)| status.is_active())
            .map(|(_, n)| *n)
            .sum();
        let avg_duration_minutes = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        };

        Ok(JobStatistics {
            total: by_status.values().sum(),
            pending: count(JobStatus::Pending),
            running,
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            by_status,
            avg_duration_minutes,
        })
    }
}

/// Unrecognized enum value in a text column.
#[derive(Debug)]
struct InvalidColumn(String);

impl fmt::Display for InvalidColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized value: {}", self.0)
    }
}

impl std::error::Error for InvalidColumn {}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_json_list(idx: usize, s: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| conversion_error(idx, e))
}

fn to_json(list: &[String]) -> Result<String, JobError> {
    serde_json::to_string(list).map_err(|e| JobError::Database(e.to_string()))
}
