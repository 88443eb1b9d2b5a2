use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::SIGINT;

use crate::exit_codes;

/// Latch SIGINT for the length of a mount.
///
/// A mount that has already created `<target>_mapfs` and run the kernel
/// mount must get to unmount and remove it if mapfs never becomes ready.
/// The first Ctrl+C only sets the returned flag and the mount runs on
/// through that rollback; the caller then exits with
/// [`exit_codes::INTERRUPTED`]. A second Ctrl+C gives up on the rollback
/// and exits at once with the same code, leaving the intermediate mount
/// for `purge`.
pub fn interrupted_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));

    // Order matters: the conditional exit must see the flag before the
    // plain handler sets it.
    let _ = signal_hook::flag::register_conditional_shutdown(
        SIGINT,
        exit_codes::INTERRUPTED,
        Arc::clone(&flag),
    );
    let _ = signal_hook::flag::register(SIGINT, Arc::clone(&flag));

    flag
}
