//! The per-project backup pipeline.
//!
//! For every project the frequency gate decides go/no-go, then the stages run
//! strictly in order: collect, archive, record, upload, notify. A failing
//! project never aborts the invocation; its outcome lands in the run log and
//! the notification channels instead of the process exit code.

pub mod archiver;
pub mod collector;
pub mod gate;
pub mod uploader;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::config::{Options, Project};
use crate::notify::{Notification, Notifier};
use crate::runlog::{LastSuccess, NewRun, RunLog, RunStatus, Uploaded};

use collector::{Staging, StagingReport};

/// Outcome of one project's trip through the pipeline.
#[derive(Debug)]
pub enum ProjectOutcome {
    /// The frequency gate decided the project is not due.
    Skipped,
    /// A run was attempted and recorded.
    Ran {
        status: RunStatus,
        archive_path: Option<PathBuf>,
    },
}

pub struct Pipeline<'a> {
    options: &'a Options,
    run_log: &'a RunLog,
    notifier: &'a Notifier,
    /// Shared by every project of this invocation, also used in archive names.
    run_timestamp: NaiveDateTime,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        options: &'a Options,
        run_log: &'a RunLog,
        notifier: &'a Notifier,
        run_timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            options,
            run_log,
            notifier,
            run_timestamp,
        }
    }

    /// Runs the whole pipeline for one project.
    pub fn run(&self, project: &Project) -> ProjectOutcome {
        if !self.is_due(project) {
            log::info!(target: "pipeline", "{}: not due, skipping", project.name);
            return ProjectOutcome::Skipped;
        }

        let staging = match Staging::create(&self.options.backup_root, &project.name) {
            Ok(staging) => staging,
            Err(e) => {
                let message = format!("Preparing the staging area failed: {e}");
                log::error!(target: "pipeline", "{}: {message}", project.name);
                return self.finish(project, RunStatus::Failed, None, &message, None);
            }
        };

        let report = match collector::stage(project, staging.path()) {
            Ok(report) => report,
            Err(e) => {
                let message = format!("Collecting backup data failed: {e}");
                log::error!(target: "pipeline", "{}: {message}", project.name);
                return self.finish(project, RunStatus::Failed, None, &message, None);
            }
        };

        if report.is_empty() {
            // An empty staging area caused by a failed dump is a failure,
            // not a missing-data warning.
            if !report.failed_dumps.is_empty() {
                let message = describe(&report);
                log::error!(target: "pipeline", "{}: {message}", project.name);
                return self.finish(project, RunStatus::Failed, None, &message, None);
            }

            log::warn!(target: "pipeline", "{}: no data found, nothing to archive", project.name);
            return self.finish(project, RunStatus::Warning, None, "No data found", None);
        }

        let archive_name = format!(
            "{}_{}.zip",
            project.name,
            self.run_timestamp.format(archiver::ARCHIVE_TIMESTAMP_FORMAT)
        );
        let archive_path = self.options.backup_root.join(archive_name);

        if let Err(e) = archiver::archive(staging.path(), &archive_path) {
            let message = format!("Archive creation failed: {e}");
            log::error!(target: "pipeline", "{}: {message}", project.name);
            return self.finish(project, RunStatus::Failed, Some(&archive_path), &message, None);
        }
        // Staging served its purpose; release it before the slow upload.
        drop(staging);

        let mut status = if report.failed_dumps.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        let mut message = describe(&report);

        let row_id = self.append_row(
            project,
            status,
            Some(&archive_path),
            &message,
            project.upload.as_ref().map(|_| false),
        );

        if let Some(upload_config) = &project.upload {
            match uploader::upload(&archive_path, upload_config) {
                Ok(()) => {
                    self.record_upload(project, &archive_path, true);
                    if status == RunStatus::Success && self.options.delete_after_upload {
                        match fs::remove_file(&archive_path) {
                            Ok(()) => {
                                log::debug!(target: "pipeline", "{}: removed local archive after upload", project.name)
                            }
                            Err(e) => {
                                log::warn!(target: "pipeline", "{}: removing local archive failed: {e}", project.name)
                            }
                        }
                    }
                }
                Err(e) => {
                    log::error!(target: "stage::upload", "{}: upload failed: {e}", project.name);
                    self.record_upload(project, &archive_path, false);
                    status = RunStatus::Failed;
                    message = format!("{message}; upload failed: {e}");
                }
            }
        }

        self.notify_row(project, row_id, status, Some(&archive_path), &message);

        log::info!(target: "pipeline", "{}: finished with status {status}", project.name);
        ProjectOutcome::Ran {
            status,
            archive_path: Some(archive_path),
        }
    }

    /// Asks the frequency gate, failing open when the run log is unreadable.
    fn is_due(&self, project: &Project) -> bool {
        let last_success = self
            .run_log
            .last_success(&project.name)
            .unwrap_or_else(|e| {
                log::error!(target: "gate", "{}: reading the run log failed, running anyway: {e}", project.name);
                LastSuccess::None
            });

        gate::should_run(
            &project.name,
            &project.frequency,
            self.run_timestamp,
            &last_success,
        )
    }

    /// Records a finished attempt and reports it in one go.
    fn finish(
        &self,
        project: &Project,
        status: RunStatus,
        archive_path: Option<&Path>,
        message: &str,
        uploaded: Option<bool>,
    ) -> ProjectOutcome {
        let row_id = self.append_row(project, status, archive_path, message, uploaded);
        self.notify_row(project, row_id, status, archive_path, message);

        ProjectOutcome::Ran {
            status,
            archive_path: archive_path.map(Path::to_path_buf),
        }
    }

    /// Appends the run record; a write failure is telemetry loss, not a
    /// reason to abort the backup.
    fn append_row(
        &self,
        project: &Project,
        status: RunStatus,
        archive_path: Option<&Path>,
        message: &str,
        uploaded: Option<bool>,
    ) -> Option<i64> {
        let run = NewRun {
            project: &project.name,
            created_at: self.run_timestamp,
            status,
            archive_path,
            message,
            uploaded,
        };

        match self.run_log.append(&run) {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!(target: "runlog", "{}: recording the attempt failed: {e}", project.name);
                None
            }
        }
    }

    fn record_upload(&self, project: &Project, archive_path: &Path, uploaded: bool) {
        if let Err(e) = self
            .run_log
            .update_upload_status(&project.name, archive_path, uploaded)
        {
            log::error!(target: "runlog", "{}: recording the upload outcome failed: {e}", project.name);
        }
    }

    fn notify_row(
        &self,
        project: &Project,
        row_id: Option<i64>,
        status: RunStatus,
        archive_path: Option<&Path>,
        message: &str,
    ) {
        if !self.notifier.enabled() {
            return;
        }

        // The upload flag comes from the run log, not from pipeline state.
        let uploaded = match archive_path {
            Some(path) => self
                .run_log
                .uploaded_flag(&project.name, path)
                .unwrap_or_else(|e| {
                    log::warn!(target: "notify", "{}: reading the upload flag back failed: {e}", project.name);
                    Uploaded::NotApplicable
                }),
            None => Uploaded::NotApplicable,
        };

        let delivered = self.notifier.notify(&Notification {
            project: &project.name,
            status,
            message,
            timestamp: self.run_timestamp,
            uploaded,
        });

        if delivered {
            if let Some(id) = row_id {
                if let Err(e) = self.run_log.set_notified(id) {
                    log::error!(target: "runlog", "{}: marking the row notified failed: {e}", project.name);
                }
            }
        }
    }
}

fn describe(report: &StagingReport) -> String {
    let mut message = format!(
        "Staged {} file(s), {} folder(s), {} database dump(s)",
        report.files, report.folders, report.db_dumps
    );
    if !report.failed_dumps.is_empty() {
        message = format!(
            "Database dump failed for: {}; {message}",
            report.failed_dumps.join(", ")
        );
    }
    if !report.warnings.is_empty() {
        message.push_str(&format!("; {} warning(s)", report.warnings.len()));
    }

    message
}
