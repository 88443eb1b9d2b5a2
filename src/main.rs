mod background;
mod cli;
mod cmd;
mod config;
mod error;
mod exit_codes;
#[cfg(test)]
mod fakes;
mod fuse_mounter;
mod logging;
mod mapfs_mounter;
mod mock_mounter;
mod mount_table;
mod mounter;
mod naming;
mod options;
mod platform;
mod resolver;
mod signals;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing::error;

use crate::background::ProcessBackgroundInvoker;
use crate::cmd::{CommandInvoker, Invoker};
use crate::error::Result;
use crate::fuse_mounter::FuseMounter;
use crate::mapfs_mounter::MapfsMounter;
use crate::mock_mounter::MockMounter;
use crate::mount_table::ProcMountTable;
use crate::mounter::{Env, Mounter};
use crate::platform::{FileSystem, OsFileSystem};

fn main() {
    let cli = cli::Cli::parse();
    logging::configure_logging(cli.verbose);
    std::process::exit(run(cli));
}

/// Wire up the mounter chosen by the operator flags.
fn build_mounter(policy: &cli::PolicyArgs) -> Result<Arc<dyn Mounter>> {
    if policy.use_mock_mounter {
        return Ok(Arc::new(MockMounter::new(Duration::from_secs(
            policy.mock_mount_seconds,
        ))));
    }

    let config = policy.config();
    let invoker: Arc<dyn Invoker> = Arc::new(CommandInvoker);
    let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem);
    let fuse = FuseMounter::new(invoker.clone(), fs.clone(), config.clone());
    let mapfs = MapfsMounter::new(
        invoker,
        Arc::new(ProcessBackgroundInvoker),
        fs,
        Arc::new(ProcMountTable),
        Arc::new(fuse),
        config,
        policy.settings(),
    )?;
    Ok(Arc::new(mapfs))
}

/// Report a failed operation. Messages that may carry directory-service
/// detail stay in the log.
fn report(operation: &str, err: &error::Error) -> i32 {
    if err.is_safe() {
        eprintln!("Error: {err}");
    } else {
        error!(operation, error = %err, "internal error");
        eprintln!("Error: {operation} failed due to an internal error");
    }
    exit_codes::RUNTIME_ERROR
}

fn run(cli: cli::Cli) -> i32 {
    let mounter = match build_mounter(&cli.policy) {
        Ok(mounter) => mounter,
        Err(e) => return report("setup", &e),
    };
    let env = Env::new();

    match cli.command {
        cli::Commands::Mount {
            source,
            target,
            opts,
            options,
        } => {
            let opts = match cli::option_map(&opts, options.as_deref()) {
                Ok(opts) => opts,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return exit_codes::USAGE_ERROR;
                }
            };
            // Latch Ctrl+C so a half-finished mount can roll back first.
            let interrupted = signals::interrupted_flag();
            let code = match mounter.mount(&env, &source, &target, &opts) {
                Ok(()) => exit_codes::SUCCESS,
                Err(e) => report("mount", &e),
            };
            if interrupted.load(Ordering::SeqCst) {
                return exit_codes::INTERRUPTED;
            }
            code
        }
        cli::Commands::Unmount { target } => match mounter.unmount(&env, &target) {
            Ok(()) => exit_codes::SUCCESS,
            Err(e) => report("unmount", &e),
        },
        cli::Commands::Check { name, mount_point } => {
            if mounter.check(&env, &name, &mount_point) {
                exit_codes::SUCCESS
            } else {
                exit_codes::NOT_MOUNTED
            }
        }
        cli::Commands::Purge { path } => {
            mounter.purge(&env, &path);
            exit_codes::SUCCESS
        }
    }
}
