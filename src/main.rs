use std::process::ExitCode;

use clap::Parser;

use packrat_lib::cli::{Action, Cli};
use packrat_lib::config;
use packrat_lib::lock::RunLock;
use packrat_lib::notify::Notifier;
use packrat_lib::pipeline::{Pipeline, ProjectOutcome};
use packrat_lib::runlog::RunLog;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Action::Backup = cli.action.unwrap_or_default();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    // Configuration errors are the only fatal ones; everything later is
    // per-project and reported through the run log and notifications.
    let options = match config::load_options(&cli.options) {
        Ok(options) => options,
        Err(e) => {
            log::error!("Loading the options file failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    let projects = match config::load_projects(&cli.projects) {
        Ok(projects) => projects,
        Err(e) => {
            log::error!("Loading the project list failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&options.backup_root) {
        log::error!(
            "Creating the backup root {} failed: {e}",
            options.backup_root.display()
        );
        return ExitCode::FAILURE;
    }

    let run_log = match RunLog::open(&options.run_log_path()) {
        Ok(run_log) => run_log,
        Err(e) => {
            log::error!("Opening the run log failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _lock = match RunLock::acquire(&options.backup_root) {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            log::warn!("Another invocation is still running, nothing to do");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            log::error!("Acquiring the run lock failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let notifier = Notifier::new(options.notify.clone());
    let run_timestamp = chrono::Utc::now().naive_utc();
    let pipeline = Pipeline::new(&options, &run_log, &notifier, run_timestamp);

    for project in &projects {
        log::info!(target: "pipeline", "Processing project: {}", project.name);
        match pipeline.run(project) {
            ProjectOutcome::Skipped => {}
            ProjectOutcome::Ran { status, .. } => {
                log::info!(target: "pipeline", "{}: recorded with status {status}", project.name);
            }
        }
    }

    // Per-project failures are visible in the run log and notifications,
    // never in the exit code.
    ExitCode::SUCCESS
}
