use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Path to the project list file.
    #[arg(long, short = 'p', env = "PACKRAT_PROJECTS", default_value = "projects.toml")]
    pub projects: PathBuf,

    /// Path to the global options file.
    #[arg(long, short = 'o', env = "PACKRAT_OPTIONS", default_value = "options.toml")]
    pub options: PathBuf,

    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand, Debug, Default)]
pub enum Action {
    /// Back up every configured project that is due. (Default)
    #[default]
    Backup,
}
