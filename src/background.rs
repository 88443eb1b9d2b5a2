use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How often a log-backed scan re-reads the file after reaching its end.
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Terminates a process launched by a [`BackgroundInvoker`].
///
/// Dropping the handle leaves the process running.
pub struct CancelHandle {
    cancel: Box<dyn FnOnce() + Send>,
}

impl CancelHandle {
    pub fn new<F: FnOnce() + Send + 'static>(cancel: F) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Kill the process group.
    // The CLI exits once the overlay is ready; only a long-lived host cancels.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn cancel(self) {
        (self.cancel)()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// Launches a long-running command and waits for it to report readiness.
pub trait BackgroundInvoker: Send + Sync {
    /// Start `command` and block until a line of its output contains
    /// `marker`, the output ends, or `timeout` passes. An empty `marker`
    /// returns as soon as the process has started.
    ///
    /// With `log`, stdout and stderr go to that file (truncated first) and
    /// the file is scanned, so the process survives its launcher. Without
    /// it, stdout is a pipe drained by this process.
    fn invoke(
        &self,
        command: &str,
        args: &[String],
        marker: &str,
        timeout: Duration,
        log: Option<&Path>,
    ) -> Result<CancelHandle>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Waiting,
    Ready,
    TimedOut,
    Exited,
}

struct Shared {
    phase: Phase,
    reaped: bool,
}

/// Kills one process group, unless its leader has already been reaped.
#[derive(Clone)]
struct GroupKiller {
    pgid: Pid,
    shared: Arc<Mutex<Shared>>,
}

impl GroupKiller {
    fn kill(&self) {
        let state = self.shared.lock();
        if !state.reaped {
            if let Err(e) = killpg(self.pgid, Signal::SIGKILL) {
                debug!(pgid = self.pgid.as_raw(), error = %e, "killpg failed");
            }
        }
    }

    /// Move from `Waiting` to `next`. Returns the phase that was current.
    fn transition(&self, next: Phase) -> Phase {
        let mut state = self.shared.lock();
        let current = state.phase;
        if current == Phase::Waiting {
            state.phase = next;
        }
        current
    }

    fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    fn reaped(&self) -> bool {
        self.shared.lock().reaped
    }
}

/// Where the launched process writes, and how we read it back.
enum Output {
    Pipe,
    Log(File),
}

/// [`BackgroundInvoker`] that spawns real processes, each in its own
/// process group.
#[derive(Debug, Default)]
pub struct ProcessBackgroundInvoker;

impl BackgroundInvoker for ProcessBackgroundInvoker {
    fn invoke(
        &self,
        command: &str,
        args: &[String],
        marker: &str,
        timeout: Duration,
        log: Option<&Path>,
    ) -> Result<CancelHandle> {
        debug!(command, ?args, marker, ?timeout, ?log, "launching");
        let mut cmd = Command::new(command);
        cmd.args(args).stdin(Stdio::null()).process_group(0);
        let output = match log {
            Some(path) => {
                let file = open_log(path)?;
                let stderr = file
                    .try_clone()
                    .map_err(|e| Error::io(format!("{}: duplicating log", path.display()), e))?;
                cmd.stdout(file).stderr(stderr);
                let reader = File::open(path)
                    .map_err(|e| Error::io(format!("{}: opening log", path.display()), e))?;
                Output::Log(reader)
            }
            None => {
                cmd.stdout(Stdio::piped());
                Output::Pipe
            }
        };
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdout = child.stdout.take();
        let killer = GroupKiller {
            pgid: Pid::from_raw(child.id() as i32),
            shared: Arc::new(Mutex::new(Shared {
                phase: Phase::Waiting,
                reaped: false,
            })),
        };

        let reaper = killer.clone();
        thread::spawn(move || {
            let status = child.wait();
            reaper.shared.lock().reaped = true;
            debug!(?status, "background process reaped");
        });

        let source: Box<dyn Read + Send> = match output {
            Output::Log(file) => Box::new(file),
            Output::Pipe => match stdout {
                Some(stdout) => Box::new(stdout),
                None => {
                    killer.kill();
                    return Err(Error::io(
                        format!("{command}: reading output"),
                        std::io::Error::other("stdout not captured"),
                    ));
                }
            },
        };
        let follow = log.is_some();

        if marker.is_empty() {
            killer.transition(Phase::Ready);
            if !follow {
                drain(source);
            }
            return Ok(handle(killer));
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let timer = killer.clone();
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(timeout) {
                if timer.transition(Phase::TimedOut) == Phase::Waiting {
                    timer.kill();
                }
            }
        });

        let mut reader = BufReader::new(source);
        let found = if follow {
            follow_for_marker(&mut reader, marker, &killer)
        } else {
            scan_for_marker(&mut reader, marker)
        };
        let _ = stop.send(());

        if found && killer.transition(Phase::Ready) == Phase::Waiting {
            debug!(command, "readiness marker seen");
            if !follow {
                drain(reader);
            }
            return Ok(handle(killer));
        }

        match killer.transition(Phase::Exited) {
            Phase::TimedOut => {
                warn!(command, ?timeout, "command timed out");
                Err(Error::TimedOut {
                    command: command.to_string(),
                })
            }
            _ => {
                killer.kill();
                warn!(command, "command exited before becoming ready");
                Err(Error::Exited {
                    command: command.to_string(),
                })
            }
        }
    }
}

/// Create (or truncate) the log file, creating its directory as needed.
fn open_log(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("{}: creating log directory", dir.display()), e))?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::io(format!("{}: opening log", path.display()), e))
}

/// Read lines until one contains `marker`. Returns false on EOF or a read
/// error.
fn scan_for_marker<R: BufRead>(reader: &mut R, marker: &str) -> bool {
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {
                if String::from_utf8_lossy(&line).contains(marker) {
                    return true;
                }
            }
        }
    }
}

/// Tail a log file until a line contains `marker`. Returns false once the
/// process has been reaped and everything it wrote has been read, or once
/// the phase leaves `Waiting`.
fn follow_for_marker<R: BufRead>(reader: &mut R, marker: &str, killer: &GroupKiller) -> bool {
    let mut line = Vec::new();
    loop {
        // Sampled before reading so output written just before exit is seen.
        let exited = killer.reaped();
        match reader.read_until(b'\n', &mut line) {
            Err(_) => return false,
            Ok(n) => {
                if String::from_utf8_lossy(&line).contains(marker) {
                    return true;
                }
                if line.ends_with(b"\n") {
                    line.clear();
                }
                if n > 0 {
                    continue;
                }
            }
        }
        if exited || killer.phase() != Phase::Waiting {
            return false;
        }
        thread::sleep(LOG_POLL_INTERVAL);
    }
}

/// Keep consuming output so the process never blocks on a full pipe.
fn drain<R: Read + Send + 'static>(mut reader: R) {
    thread::spawn(move || {
        let _ = std::io::copy(&mut reader, &mut std::io::sink());
    });
}

fn handle(killer: GroupKiller) -> CancelHandle {
    CancelHandle::new(move || killer.kill())
}
