//! Loading of the two declarative configuration documents.
//!
//! `projects.toml` holds the ordered list of backup projects, `options.toml`
//! the global options. Both are fatal to the whole invocation when missing or
//! structurally malformed; individual optional keys degrade per-key.

use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};
use regex::Regex;

const PROJECT_NAME_PATTERN: &str = r"^[A-Za-z0-9_-]+$";

/// One named backup target.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Project {
    /// Unique identifier, also used in archive file names.
    pub name: String,

    /// Single files to collect.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Directories to collect recursively.
    #[serde(default)]
    pub folders: Vec<PathBuf>,

    /// Databases to dump.
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    /// Upload destination; absent means upload is disabled.
    pub upload: Option<UploadConfig>,

    /// How often the project should run, in minutes.
    ///
    /// `-1` runs on every invocation, `0` runs exactly once ever.
    pub frequency: Frequency,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseConfig {
    /// Database engine, currently only `mysql` is supported.
    pub engine: String,
    pub name: String,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct UploadConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Remote directory the archive is placed in.
    pub remote_path: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// Run frequency of a project.
///
/// Deserialization never fails: a value that is not a TOML integer becomes
/// [`Frequency::Invalid`] and the gate decides to run anyway (fail open).
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(from = "toml::Value")]
pub enum Frequency {
    /// `-1`: run on every invocation.
    Always,
    /// `0`: run exactly once, ever.
    Once,
    /// Run when at least this many minutes passed since the last success.
    Every(i64),
    /// Anything that is not an integer; carries the raw rendering for logs.
    Invalid(String),
}

impl From<toml::Value> for Frequency {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::Integer(-1) => Self::Always,
            toml::Value::Integer(0) => Self::Once,
            toml::Value::Integer(minutes) => Self::Every(minutes),
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// Global options shared by all projects.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Options {
    /// Staging root and archive destination.
    pub backup_root: PathBuf,

    /// Delete the local archive once its upload is confirmed.
    #[serde(default)]
    pub delete_after_upload: bool,

    /// Path of the run log database, defaults to `<backup_root>/runlog.sqlite`.
    pub run_log: Option<PathBuf>,

    #[serde(default)]
    pub notify: NotifyOptions,
}

impl Options {
    pub fn run_log_path(&self) -> PathBuf {
        self.run_log
            .clone()
            .unwrap_or_else(|| self.backup_root.join("runlog.sqlite"))
    }
}

/// Webhook channels; an absent URI disables that channel.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NotifyOptions {
    pub slack_webhook: Option<String>,
    pub discord_webhook: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    project: Vec<Project>,
}

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// Reading a configuration file failed.
    #[display("Reading {} failed: {error}", path.display())]
    Read { path: PathBuf, error: io::Error },

    /// A configuration file is not well-formed TOML of the expected shape.
    #[display("Parsing {} failed: {error}", path.display())]
    Parse {
        path: PathBuf,
        error: toml::de::Error,
    },

    /// A project name contains whitespace or special characters.
    #[display("Invalid project name: {_0:?}")]
    InvalidProjectName(#[error(ignore)] String),

    /// Two projects share the same name.
    #[display("Duplicate project name: {_0:?}")]
    DuplicateProjectName(#[error(ignore)] String),
}

/// Loads the ordered project list from `path`.
pub fn load_projects(path: &Path) -> Result<Vec<Project>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
        path: path.to_path_buf(),
        error,
    })?;
    let file: ProjectsFile = toml::from_str(&contents).map_err(|error| ConfigError::Parse {
        path: path.to_path_buf(),
        error,
    })?;

    let name_re = Regex::new(PROJECT_NAME_PATTERN).expect("project name pattern should be valid");
    let mut seen = std::collections::HashSet::new();
    for project in &file.project {
        if !name_re.is_match(&project.name) {
            return Err(ConfigError::InvalidProjectName(project.name.clone()));
        }
        if !seen.insert(project.name.as_str()) {
            return Err(ConfigError::DuplicateProjectName(project.name.clone()));
        }
    }

    Ok(file.project)
}

/// Loads the global options from `path`.
pub fn load_options(path: &Path) -> Result<Options, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
        path: path.to_path_buf(),
        error,
    })?;
    toml::from_str(&contents).map_err(|error| ConfigError::Parse {
        path: path.to_path_buf(),
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn projects_parse() {
        let file = write_config(
            r#"
            [[project]]
            name = "website"
            files = ["/etc/nginx/nginx.conf"]
            folders = ["/var/www/html"]
            frequency = 1440

            [[project.databases]]
            engine = "mysql"
            name = "website"
            user = "backup"
            password = "secret"

            [project.upload]
            host = "backup.example.org"
            user = "backup"
            password = "secret"
            remote_path = "/srv/backups"
            "#,
        );

        let projects = load_projects(file.path()).unwrap();
        assert_eq!(projects.len(), 1);

        let project = &projects[0];
        assert_eq!(project.name, "website");
        assert_eq!(project.frequency, Frequency::Every(1440));
        assert_eq!(project.files.len(), 1);
        assert_eq!(project.databases[0].engine, "mysql");
        assert_eq!(project.databases[0].port, 3306);

        let upload = project.upload.as_ref().unwrap();
        assert_eq!(upload.port, 22);
    }

    #[test]
    fn frequency_reserved_values() {
        let file = write_config(
            r#"
            [[project]]
            name = "always"
            frequency = -1

            [[project]]
            name = "once"
            frequency = 0
            "#,
        );

        let projects = load_projects(file.path()).unwrap();
        assert_eq!(projects[0].frequency, Frequency::Always);
        assert_eq!(projects[1].frequency, Frequency::Once);
    }

    #[test]
    fn frequency_fails_open_on_non_integer() {
        let file = write_config(
            r#"
            [[project]]
            name = "sloppy"
            frequency = "hourly"
            "#,
        );

        let projects = load_projects(file.path()).unwrap();
        assert!(matches!(projects[0].frequency, Frequency::Invalid(_)));
    }

    #[test]
    fn project_name_is_validated() {
        let file = write_config(
            r#"
            [[project]]
            name = "my project"
            frequency = 60
            "#,
        );

        assert!(matches!(
            load_projects(file.path()),
            Err(ConfigError::InvalidProjectName(_))
        ));
    }

    #[test]
    fn duplicate_project_names_are_rejected() {
        let file = write_config(
            r#"
            [[project]]
            name = "twin"
            frequency = 60

            [[project]]
            name = "twin"
            frequency = 60
            "#,
        );

        assert!(matches!(
            load_projects(file.path()),
            Err(ConfigError::DuplicateProjectName(_))
        ));
    }

    #[test]
    fn malformed_top_level_is_fatal() {
        let file = write_config("project = 42");
        assert!(matches!(
            load_projects(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn options_defaults() {
        let file = write_config(
            r#"
            backup_root = "/var/backups"
            "#,
        );

        let options = load_options(file.path()).unwrap();
        assert!(!options.delete_after_upload);
        assert!(options.notify.slack_webhook.is_none());
        assert!(options.notify.discord_webhook.is_none());
        assert_eq!(
            options.run_log_path(),
            PathBuf::from("/var/backups/runlog.sqlite")
        );
    }
}
