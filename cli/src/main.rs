//! tagblock - lock app restrictions behind a physical tag.
//!
//! ```text
//! main() -> load config -> init_tracing() -> Session::open(data_dir)
//!                                                  |
//!                     status | toggle | authorize | profile ...
//!                                                  |
//!                                                  v
//!                               Exit::{Success, Failed, Degraded} -> 0 | 1 | 2
//! ```
//!
//! Logs go to `~/.tagblock/logs/tagblock.log` so stdout stays clean for
//! command output.

mod commands;
mod console_reader;
mod shield;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tagblock_config::TagblockConfig;

use crate::commands::{Exit, Session};

#[derive(Parser)]
#[command(name = "tagblock", about = "Lock app restrictions behind a physical tag")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show lock status and the current profile
    Status,

    /// Scan a tag to lock, or scan the locking tag to unlock
    Toggle,

    /// Request permission to apply restrictions
    Authorize,

    /// Manage blocking profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
}

#[derive(Subcommand)]
pub(crate) enum ProfileCommand {
    /// List profiles; the current one is marked with `*`
    List,
    /// Print a profile as JSON (defaults to the current profile)
    Show { id: Option<String> },
    /// Create a profile and make it current
    Add(AddArgs),
    /// Change fields of an existing profile
    Edit(EditArgs),
    /// Make a profile current
    Select { id: String },
    /// Delete a profile
    Delete { id: String },
}

#[derive(Args)]
pub(crate) struct AddArgs {
    pub(crate) name: String,

    #[arg(long)]
    pub(crate) icon: Option<String>,

    /// App to block (repeatable)
    #[arg(long = "app")]
    pub(crate) apps: Vec<String>,

    /// Category to block (repeatable)
    #[arg(long = "category")]
    pub(crate) categories: Vec<String>,
}

#[derive(Args)]
pub(crate) struct EditArgs {
    pub(crate) id: String,

    #[arg(long)]
    pub(crate) name: Option<String>,

    #[arg(long)]
    pub(crate) icon: Option<String>,

    /// Replace the blocked apps (repeatable)
    #[arg(long = "app")]
    pub(crate) apps: Vec<String>,

    /// Block no apps
    #[arg(long, conflicts_with = "apps")]
    pub(crate) clear_apps: bool,

    /// Replace the blocked categories (repeatable)
    #[arg(long = "category")]
    pub(crate) categories: Vec<String>,

    /// Block no categories
    #[arg(long, conflicts_with = "categories")]
    pub(crate) clear_categories: bool,
}

fn init_tracing(config_filter: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than mixing logs into command output.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => warnings.push(format!(
                "Failed to open log file {}: {e}",
                candidate.display()
            )),
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = tagblock_config::config_dir() {
        candidates.push(dir.join("logs").join("tagblock.log"));
    }
    candidates.push(PathBuf::from(".tagblock").join("logs").join("tagblock.log"));

    candidates
}

async fn run(command: Command, session: &Session) -> anyhow::Result<Exit> {
    match command {
        Command::Status => Ok(commands::status(session)),
        Command::Toggle => Ok(commands::toggle(session).await),
        Command::Authorize => Ok(commands::authorize(session).await),
        Command::Profile { command } => commands::profile(session, command),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_warning) = match TagblockConfig::load() {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(e) => (TagblockConfig::default(), Some(e)),
    };
    init_tracing(config.log_filter());
    if let Some(e) = config_warning {
        eprintln!("Warning: {e}; using defaults");
    }

    let session = Session::open(&config);
    let exit = run(cli.command, &session).await;

    if let Err(e) = session.profiles.flush() {
        tracing::warn!("Profiles still unsaved at exit: {e}");
    }

    match exit {
        Ok(Exit::Success) => ExitCode::SUCCESS,
        Ok(Exit::Failed) => ExitCode::FAILURE,
        Ok(Exit::Degraded) => ExitCode::from(2),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn profile_add_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "tagblock", "profile", "add", "Work", "--app", "com.example.chat", "--app",
            "com.example.mail", "--category", "games",
        ])
        .unwrap();
        let Command::Profile {
            command: ProfileCommand::Add(args),
        } = cli.command
        else {
            panic!("expected profile add");
        };
        assert_eq!(args.name, "Work");
        assert_eq!(args.apps.len(), 2);
        assert_eq!(args.categories, vec!["games".to_owned()]);
    }

    #[test]
    fn clear_flags_conflict_with_replacements() {
        let parsed = Cli::try_parse_from([
            "tagblock", "profile", "edit", "A", "--app", "com.example.chat", "--clear-apps",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn log_file_falls_back_to_working_directory() {
        let candidates = log_file_candidates();
        assert_eq!(
            candidates.last(),
            Some(&PathBuf::from(".tagblock").join("logs").join("tagblock.log"))
        );
    }
}
