//! Command line front-end for provisioning and launching Minecraft with mclaunch.

mod cmd;
mod format;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;


#[derive(Debug, Parser)]
#[command(name = "mclaunch", about = "Provision and launch Minecraft installations")]
struct Args {
    /// Increase log verbosity, can be repeated (-v, -vv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
    /// Override the main directory, defaulting to the OS-standard `.minecraft` location.
    #[arg(long = "main-dir", global = true)]
    main_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: cmd::Command,
}

fn main() -> ExitCode {

    let args = Args::parse();

    ctrlc::set_handler(|| {
        if let Ok(mut guard) = cmd::GAME_CHILD.lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.kill();
            }
        }
        std::process::exit(130);
    }).expect("failed to register Ctrl-C handler");

    let filter = match args.verbose {
        0 => "mclaunch_cli=info,mclaunch=warn",
        1 => "mclaunch_cli=debug,mclaunch=info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .without_time()
        .init();

    cmd::run(args.main_dir, args.cmd)

}
