//! Durable, append-only record of backup attempts.
//!
//! Backed by a single SQLite table. Insertion order (the rowid) is
//! authoritative for "most recent", never the stored timestamp, so the gate
//! stays robust against host clock anomalies between runs.

use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use derive_more::{Display, Error, From};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Timestamps are stored in UTC without an offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Final status of one backup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RunStatus {
    #[display("SUCCESS")]
    Success,
    #[display("FAILED")]
    Failed,
    #[display("WARNING")]
    Warning,
}

impl RunStatus {
    fn from_db(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "WARNING" => Some(Self::Warning),
            _ => None,
        }
    }
}

/// Upload outcome of one backup attempt.
///
/// [`Uploaded::NotApplicable`] is the default and stays in place for projects
/// without an upload destination; once an upload was attempted the flag is
/// always either [`Uploaded::No`] or [`Uploaded::Yes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Uploaded {
    #[display("not applicable")]
    NotApplicable,
    #[display("no")]
    No,
    #[display("yes")]
    Yes,
}

impl Uploaded {
    fn from_db(flag: Option<i64>) -> Self {
        match flag {
            None => Self::NotApplicable,
            Some(0) => Self::No,
            Some(_) => Self::Yes,
        }
    }
}

/// Most recent successful run of a project, by insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastSuccess {
    /// No SUCCESS row exists at all.
    None,
    /// Timestamp of the most recently inserted SUCCESS row.
    At(NaiveDateTime),
    /// A SUCCESS row exists but its stored timestamp does not parse.
    Unparseable,
}

/// A new row to append, one per gated backup attempt.
#[derive(Debug)]
pub struct NewRun<'a> {
    pub project: &'a str,
    pub created_at: NaiveDateTime,
    pub status: RunStatus,
    pub archive_path: Option<&'a Path>,
    pub message: &'a str,
    /// `None` when the project has no upload destination.
    pub uploaded: Option<bool>,
}

/// A stored row, read back for notifications and inspection.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub project: String,
    pub created_at: String,
    pub status: RunStatus,
    pub archive_path: Option<PathBuf>,
    pub message: String,
    pub uploaded: Uploaded,
    pub notified: bool,
}

#[derive(Debug, Display, Error, From)]
pub enum RunLogError {
    /// Creating the parent directory of the store failed.
    #[display("Creating run log directory failed: {_0}")]
    CreateDir(io::Error),

    /// The underlying SQLite operation failed.
    #[display("Run log store error: {_0}")]
    #[from]
    Sqlite(rusqlite::Error),

    /// A stored status string is not one of the known values.
    #[display("Unknown run status in store: {_0:?}")]
    UnknownStatus(#[error(ignore)] String),
}

/// Handle to the run log store.
#[derive(Debug)]
pub struct RunLog {
    conn: Connection,
}

impl RunLog {
    /// Opens the store at `path`, creating the schema if absent.
    pub fn open(path: &Path) -> Result<Self, RunLogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RunLogError::CreateDir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self { conn })
    }

    /// Appends one attempt and returns its row id.
    pub fn append(&self, run: &NewRun<'_>) -> Result<i64, RunLogError> {
        self.conn.execute(
            "INSERT INTO backup_runs (project, created_at, status, archive_path, message, uploaded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.project,
                run.created_at.format(TIMESTAMP_FORMAT).to_string(),
                run.status.to_string(),
                run.archive_path.map(|p| p.to_string_lossy().into_owned()),
                run.message,
                run.uploaded,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Records the upload outcome on the row identified by (project, archive).
    ///
    /// A failed upload also downgrades the row's status to FAILED: archive
    /// creation success does not imply run success.
    pub fn update_upload_status(
        &self,
        project: &str,
        archive_path: &Path,
        uploaded: bool,
    ) -> Result<(), RunLogError> {
        self.conn.execute(
            "UPDATE backup_runs
             SET uploaded = ?3,
                 status = CASE WHEN ?3 THEN status ELSE 'FAILED' END
             WHERE project = ?1 AND archive_path = ?2",
            params![
                project,
                archive_path.to_string_lossy().into_owned(),
                uploaded
            ],
        )?;

        Ok(())
    }

    /// Marks the row as reported to at least one notification channel.
    pub fn set_notified(&self, id: i64) -> Result<(), RunLogError> {
        self.conn.execute(
            "UPDATE backup_runs SET notified = 1 WHERE id = ?1",
            params![id],
        )?;

        Ok(())
    }

    /// Timestamp of the most recently inserted SUCCESS row of `project`.
    pub fn last_success(&self, project: &str) -> Result<LastSuccess, RunLogError> {
        let created_at: Option<String> = self
            .conn
            .query_row(
                "SELECT created_at FROM backup_runs
                 WHERE project = ?1 AND status = 'SUCCESS'
                 ORDER BY id DESC LIMIT 1",
                params![project],
                |row| row.get(0),
            )
            .optional()?;

        let Some(created_at) = created_at else {
            return Ok(LastSuccess::None);
        };

        match NaiveDateTime::parse_from_str(&created_at, TIMESTAMP_FORMAT) {
            Ok(timestamp) => Ok(LastSuccess::At(timestamp)),
            Err(e) => {
                log::warn!(target: "runlog", "Stored timestamp {created_at:?} of project {project} does not parse: {e}");
                Ok(LastSuccess::Unparseable)
            }
        }
    }

    /// Whether any SUCCESS row exists for `project`.
    pub fn has_any_success(&self, project: &str) -> Result<bool, RunLogError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM backup_runs WHERE project = ?1 AND status = 'SUCCESS')",
            params![project],
            |row| row.get(0),
        )?;

        Ok(exists)
    }

    /// Upload flag of the row identified by (project, archive).
    ///
    /// Read back by the notifier so the report survives anything that
    /// happened to in-memory state between pipeline stages.
    pub fn uploaded_flag(&self, project: &str, archive_path: &Path) -> Result<Uploaded, RunLogError> {
        let flag: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT uploaded FROM backup_runs
                 WHERE project = ?1 AND archive_path = ?2
                 ORDER BY id DESC LIMIT 1",
                params![project, archive_path.to_string_lossy().into_owned()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(Uploaded::from_db(flag.flatten()))
    }

    /// Most recently inserted row of `project`, if any.
    pub fn latest(&self, project: &str) -> Result<Option<RunRecord>, RunLogError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project, created_at, status, archive_path, message, uploaded, notified
                 FROM backup_runs WHERE project = ?1 ORDER BY id DESC LIMIT 1",
                params![project],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                        row.get::<_, bool>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, project, created_at, status, archive_path, message, uploaded, notified)) =
            row
        else {
            return Ok(None);
        };

        let status =
            RunStatus::from_db(&status).ok_or_else(|| RunLogError::UnknownStatus(status.clone()))?;

        Ok(Some(RunRecord {
            id,
            project,
            created_at,
            status,
            archive_path: archive_path.map(PathBuf::from),
            message,
            uploaded: Uploaded::from_db(uploaded),
            notified,
        }))
    }

    /// Number of rows recorded for `project`.
    pub fn count(&self, project: &str) -> Result<i64, RunLogError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM backup_runs WHERE project = ?1",
            params![project],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn open_temp() -> (RunLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::open(&dir.path().join("runlog.sqlite")).unwrap();
        (log, dir)
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn new_run<'a>(created_at: NaiveDateTime, status: RunStatus) -> NewRun<'a> {
        NewRun {
            project: "demo",
            created_at,
            status,
            archive_path: None,
            message: "",
            uploaded: None,
        }
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runlog.sqlite");

        let log = RunLog::open(&path).unwrap();
        log.append(&new_run(at(1, 0), RunStatus::Success)).unwrap();
        drop(log);

        let log = RunLog::open(&path).unwrap();
        assert_eq!(log.count("demo").unwrap(), 1);
    }

    #[test]
    fn every_append_yields_a_distinct_row() {
        let (log, _dir) = open_temp();
        for _ in 0..5 {
            log.append(&new_run(at(1, 0), RunStatus::Failed)).unwrap();
        }
        assert_eq!(log.count("demo").unwrap(), 5);
    }

    #[test]
    fn last_success_follows_insertion_order_not_timestamps() {
        let (log, _dir) = open_temp();
        log.append(&new_run(at(10, 0), RunStatus::Success)).unwrap();
        // Inserted later but timestamped earlier, e.g. after a clock step.
        log.append(&new_run(at(8, 0), RunStatus::Success)).unwrap();
        log.append(&new_run(at(11, 0), RunStatus::Failed)).unwrap();

        assert_eq!(log.last_success("demo").unwrap(), LastSuccess::At(at(8, 0)));
    }

    #[test]
    fn last_success_without_rows() {
        let (log, _dir) = open_temp();
        assert_eq!(log.last_success("demo").unwrap(), LastSuccess::None);
        assert!(!log.has_any_success("demo").unwrap());
    }

    #[test]
    fn has_any_success_ignores_failures() {
        let (log, _dir) = open_temp();
        log.append(&new_run(at(1, 0), RunStatus::Failed)).unwrap();
        log.append(&new_run(at(2, 0), RunStatus::Warning)).unwrap();
        assert!(!log.has_any_success("demo").unwrap());

        log.append(&new_run(at(3, 0), RunStatus::Success)).unwrap();
        assert!(log.has_any_success("demo").unwrap());
    }

    #[test]
    fn uploaded_flag_is_tri_state() {
        let (log, _dir) = open_temp();
        let archive = Path::new("/backups/demo_1.zip");

        log.append(&NewRun {
            archive_path: Some(archive),
            ..new_run(at(1, 0), RunStatus::Success)
        })
        .unwrap();
        assert_eq!(
            log.uploaded_flag("demo", archive).unwrap(),
            Uploaded::NotApplicable
        );

        log.update_upload_status("demo", archive, false).unwrap();
        assert_eq!(log.uploaded_flag("demo", archive).unwrap(), Uploaded::No);

        log.update_upload_status("demo", archive, true).unwrap();
        assert_eq!(log.uploaded_flag("demo", archive).unwrap(), Uploaded::Yes);
    }

    #[test]
    fn failed_upload_downgrades_status() {
        let (log, _dir) = open_temp();
        let archive = Path::new("/backups/demo_1.zip");

        log.append(&NewRun {
            archive_path: Some(archive),
            ..new_run(at(1, 0), RunStatus::Success)
        })
        .unwrap();
        log.update_upload_status("demo", archive, false).unwrap();

        let record = log.latest("demo").unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.uploaded, Uploaded::No);
    }

    #[test]
    fn set_notified_marks_the_row() {
        let (log, _dir) = open_temp();
        let id = log.append(&new_run(at(1, 0), RunStatus::Success)).unwrap();
        log.set_notified(id).unwrap();

        let record = log.latest("demo").unwrap().unwrap();
        assert!(record.notified);
    }
}
