//! Stages the configured files, folders and database dumps of a project.
//!
//! Missing or wrongly-typed source paths are configuration warnings, never
//! fatal. Database dumps keep going when a sibling fails; the aggregate
//! failure surfaces through [`StagingReport::failed_dumps`].

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use derive_more::{Display, Error, From};
use walkdir::WalkDir;

use crate::config::{DatabaseConfig, Project};

const FILES_SUBTREE: &str = "files";
const FOLDERS_SUBTREE: &str = "folders";
const DATABASES_SUBTREE: &str = "databases";

/// Transient working directory of one project's backup attempt.
///
/// The directory is removed when the handle drops, on every exit path of the
/// pipeline including early aborts.
#[derive(Debug)]
pub struct Staging {
    path: PathBuf,
}

impl Staging {
    /// Creates `<root>/<project>` as an empty staging directory.
    pub fn create(root: &Path, project: &str) -> io::Result<Self> {
        let path = root.join(project);
        if path.exists() {
            // Leftover of an interrupted earlier run.
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            log::warn!(target: "stage::collect", "Removing staging directory {} failed: {e}", self.path.display());
        }
    }
}

/// What the collector managed to stage.
#[derive(Debug, Default)]
pub struct StagingReport {
    pub files: usize,
    pub folders: usize,
    pub db_dumps: usize,
    /// Databases whose dump failed; non-empty escalates the run to FAILED.
    pub failed_dumps: Vec<String>,
    pub warnings: Vec<String>,
}

impl StagingReport {
    /// Whether the staging area ended up with no artifact at all.
    pub fn is_empty(&self) -> bool {
        self.files == 0 && self.folders == 0 && self.db_dumps == 0
    }

    fn warn(&mut self, message: String) {
        log::warn!(target: "stage::collect", "{message}");
        self.warnings.push(message);
    }
}

#[derive(Debug, Display, Error, From)]
pub enum CollectError {
    /// Creating a staging subtree failed.
    #[display("Preparing the staging area failed: {_0}")]
    #[from]
    Io(io::Error),
}

#[derive(Debug, Display, Error)]
enum DumpError {
    #[display("spawning mysqldump failed: {_0}")]
    Spawn(io::Error),
    #[display("writing the dump file failed: {_0}")]
    Write(io::Error),
    #[display("mysqldump exited unsuccessfully ({_0})")]
    Failed(#[error(ignore)] String),
}

/// Stages everything the project configures into `staging`.
pub fn stage(project: &Project, staging: &Path) -> Result<StagingReport, CollectError> {
    let mut report = StagingReport::default();

    stage_files(project, staging, &mut report)?;
    stage_folders(project, staging, &mut report)?;
    stage_databases(project, staging, &mut report)?;

    log::info!(
        target: "stage::collect",
        "{}: staged {} file(s), {} folder(s), {} database dump(s)",
        project.name, report.files, report.folders, report.db_dumps,
    );

    Ok(report)
}

fn stage_files(
    project: &Project,
    staging: &Path,
    report: &mut StagingReport,
) -> Result<(), CollectError> {
    if project.files.is_empty() {
        return Ok(());
    }

    let files_dir = staging.join(FILES_SUBTREE);
    fs::create_dir_all(&files_dir)?;

    for source in &project.files {
        if source.is_dir() {
            report.warn(format!(
                "{}: {} is configured as a file but is a directory, skipping",
                project.name,
                source.display()
            ));
            continue;
        }
        if !source.is_file() {
            report.warn(format!(
                "{}: file {} does not exist, skipping",
                project.name,
                source.display()
            ));
            continue;
        }

        let Some(file_name) = source.file_name() else {
            report.warn(format!(
                "{}: file path {} has no file name, skipping",
                project.name,
                source.display()
            ));
            continue;
        };

        match fs::copy(source, files_dir.join(file_name)) {
            Ok(_) => report.files += 1,
            Err(e) => report.warn(format!(
                "{}: copying file {} failed: {e}",
                project.name,
                source.display()
            )),
        }
    }

    Ok(())
}

fn stage_folders(
    project: &Project,
    staging: &Path,
    report: &mut StagingReport,
) -> Result<(), CollectError> {
    if project.folders.is_empty() {
        return Ok(());
    }

    let folders_dir = staging.join(FOLDERS_SUBTREE);
    fs::create_dir_all(&folders_dir)?;

    for source in &project.folders {
        if source.is_file() {
            report.warn(format!(
                "{}: {} is configured as a folder but is a file, skipping",
                project.name,
                source.display()
            ));
            continue;
        }
        if !source.is_dir() {
            report.warn(format!(
                "{}: folder {} does not exist, skipping",
                project.name,
                source.display()
            ));
            continue;
        }

        let Some(dir_name) = source.file_name() else {
            report.warn(format!(
                "{}: folder path {} has no directory name, skipping",
                project.name,
                source.display()
            ));
            continue;
        };

        match copy_tree(source, &folders_dir.join(dir_name)) {
            Ok(()) => report.folders += 1,
            Err(e) => report.warn(format!(
                "{}: copying folder {} failed: {e}",
                project.name,
                source.display()
            )),
        }
    }

    Ok(())
}

/// Recursively copies `source` to `dest`, preserving the tree structure.
fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
        // Symlinks and special files are not followed.
    }

    Ok(())
}

fn stage_databases(
    project: &Project,
    staging: &Path,
    report: &mut StagingReport,
) -> Result<(), CollectError> {
    if project.databases.is_empty() {
        return Ok(());
    }

    let databases_dir = staging.join(DATABASES_SUBTREE);
    fs::create_dir_all(&databases_dir)?;

    for database in &project.databases {
        if database.engine != "mysql" {
            report.warn(format!(
                "{}: database engine {:?} is not supported, skipping dump of {}",
                project.name, database.engine, database.name
            ));
            continue;
        }

        let dump_file = databases_dir.join(format!("{}.sql", database.name));
        match dump_mysql(database, &dump_file) {
            Ok(()) => {
                log::debug!(target: "stage::dump", "{}: dumped database {}", project.name, database.name);
                report.db_dumps += 1;
            }
            Err(e) => {
                log::error!(target: "stage::dump", "{}: dump of database {} failed: {e}", project.name, database.name);
                // A partial dump file is worse than none.
                if dump_file.exists() {
                    if let Err(e) = fs::remove_file(&dump_file) {
                        log::warn!(target: "stage::dump", "Removing partial dump {} failed: {e}", dump_file.display());
                    }
                }
                report.failed_dumps.push(database.name.clone());
            }
        }
    }

    Ok(())
}

/// Streams a `mysqldump` of `database` into `dump_file`.
///
/// `--single-transaction` keeps the dump consistent without locking,
/// `--quick` streams rows instead of buffering whole tables.
fn dump_mysql(database: &DatabaseConfig, dump_file: &Path) -> Result<(), DumpError> {
    let mut command = Command::new("mysqldump");
    command
        .arg("--single-transaction")
        .arg("--quick")
        .arg(format!("--host={}", database.host))
        .arg(format!("--port={}", database.port))
        .arg(format!("--user={}", database.user))
        .arg(format!("--password={}", database.password))
        .arg(&database.name);
    log::trace!(target: "stage::dump", "Starting mysqldump process for {}", database.name);

    run_dump(command, dump_file)
}

/// Streams the command's stdout into `dump_file`.
///
/// stderr stays inherited: a pipe that is only drained after stdout hits EOF
/// fills up and stalls a chatty dump.
fn run_dump(mut command: Command, dump_file: &Path) -> Result<(), DumpError> {
    let mut dump_process = command
        .stdout(Stdio::piped())
        .spawn()
        .map_err(DumpError::Spawn)?;

    let stdout = dump_process.stdout.take().expect("stdout is piped");
    let mut reader = BufReader::new(stdout);
    let mut file = File::create(dump_file).map_err(DumpError::Write)?;
    io::copy(&mut reader, &mut file).map_err(DumpError::Write)?;

    let status = dump_process.wait().map_err(DumpError::Spawn)?;
    if !status.success() {
        return Err(DumpError::Failed(status.to_string()));
    }

    Ok(())
}
