//! Implementing the logic for the different CLI commands.

mod list;
mod login;
mod logout;
mod start;

pub(crate) use start::GAME_CHILD;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Subcommand;
use uuid::Uuid;

use mclaunch::{base, moj};


#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in with a Microsoft account and store it for future launches.
    Login,
    /// Remove a stored account. Removes the selected account if no id is given.
    Logout {
        /// UUID of the account to remove.
        id: Option<Uuid>,
    },
    /// List known versions.
    List {
        /// Only list versions already installed locally.
        #[arg(long)]
        installed: bool,
        /// Only list versions known from the online manifest.
        #[arg(long)]
        available: bool,
    },
    /// Install (if needed) and launch a version.
    Start {
        /// Version id, or `release`/`snapshot` to resolve the latest of each.
        version: String,
        /// Launch in demo mode, without a signed-in account.
        #[arg(long)]
        demo: bool,
        /// Custom window width, requires --height to take effect.
        #[arg(long)]
        width: Option<u32>,
        /// Custom window height, requires --width to take effect.
        #[arg(long)]
        height: Option<u32>,
    },
}

pub fn run(main_dir: Option<PathBuf>, cmd: Command) -> ExitCode {

    let main_dir = main_dir
        .or_else(|| base::default_main_dir().map(Path::to_path_buf));

    let Some(main_dir) = main_dir else {
        tracing::error!("no default main directory for this platform, pass --main-dir");
        return ExitCode::FAILURE;
    };

    let state = mclaunch::state::PersistentState::new(main_dir.join("launcherCache.json"));

    let result = match cmd {
        Command::Login => login::login(&state),
        Command::Logout { id } => logout::logout(&state, id),
        Command::List { installed, available } => list::list(&main_dir, installed, available),
        Command::Start { version, demo, width, height } => {
            start::start(&main_dir, &state, &version, demo, width, height)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "command failed");
            ExitCode::FAILURE
        }
    }

}

/// Aggregated error type for the CLI's command handlers.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Launcher(#[from] mclaunch::error::Error),
    #[error(transparent)]
    Moj(#[from] mclaunch::moj::Error),
    #[error("authentication: {0}")]
    Auth(#[from] mclaunch::msa::AuthError),
    #[error("launcher state: {0}")]
    State(#[from] mclaunch::state::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no account selected, run `mclaunch login` first")]
    NoAccount,
    #[error("account not found: {0}")]
    AccountNotFound(Uuid),
}

/// Forwards base/moj installer events to `tracing`, giving simple progress output.
#[derive(Debug, Default)]
pub struct ProgressHandler;

impl base::Handler for ProgressHandler {
    fn on_event(&mut self, event: base::Event) {
        match event {
            base::Event::LoadHierarchy { root_version } => {
                tracing::info!(version = root_version, "resolving version hierarchy");
            }
            base::Event::LoadLibraries => {
                tracing::info!("loading libraries");
            }
            base::Event::LoadedLibraries { libraries } => {
                tracing::info!(count = libraries.len(), "libraries loaded");
            }
            base::Event::LoadAssets { id } => {
                tracing::info!(assets = id, "loading assets");
            }
            base::Event::LoadedAssets { id, count } => {
                tracing::info!(assets = id, count, "assets loaded");
            }
            base::Event::LoadJvm { major_version } => {
                tracing::info!(major_version, "resolving java runtime");
            }
            base::Event::LoadedJvm { version, compatible, .. } => {
                tracing::info!(version = version.unwrap_or("unknown"), compatible, "java runtime ready");
            }
            base::Event::DownloadProgress { count, total_count, size, total_size } => {
                tracing::info!(count, total_count, size, total_size, "downloading");
            }
            base::Event::DownloadedResources => {
                tracing::info!("download complete");
            }
            _ => {}
        }
    }
}

impl moj::Handler for ProgressHandler {
    fn on_moj_event(&mut self, event: moj::Event) {
        match event {
            moj::Event::VersionFetching { id } => tracing::info!(version = id, "fetching version descriptor"),
            moj::Event::VersionFetched { id } => tracing::info!(version = id, "version descriptor fetched"),
        }
    }
}
