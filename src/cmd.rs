use std::ffi::OsStr;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};
use crate::mounter::Env;

/// How often a deadline-bound wait polls the child.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output captured from a subprocess.
pub struct CaptureOutput {
    pub stdout: String,
    pub stderr: String,
    /// The process exit code, or 1 if the process was killed by a signal.
    pub status: i32,
}

impl CaptureOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs a short-lived command to completion.
pub trait Invoker: Send + Sync {
    /// Run `command` with `args` and return its combined output. A non-zero
    /// exit is an error. The wait is bounded only by `env`'s deadline.
    fn invoke(&self, env: &Env, command: &str, args: &[String]) -> Result<String>;
}

/// [`Invoker`] that spawns real processes.
#[derive(Debug, Default)]
pub struct CommandInvoker;

impl Invoker for CommandInvoker {
    fn invoke(&self, env: &Env, command: &str, args: &[String]) -> Result<String> {
        debug!(cmdline = %display_cmd(command, args), "invoking");
        let out = run_capture(command, args, env.deadline())?;
        if out.status != 0 {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                status: format!("exit {}", out.status),
                output: out.combined().trim().to_string(),
            });
        }
        Ok(out.combined())
    }
}

/// Run `prog` with `args`, capturing stdout and stderr.
///
/// Returns `Err` if the process could not be spawned or did not finish by
/// `deadline`; a child still running at the deadline is killed. A non-zero
/// exit code is NOT an error; it is returned in `CaptureOutput.status`.
pub fn run_capture<S: AsRef<OsStr>>(
    prog: &str,
    args: &[S],
    deadline: Option<Instant>,
) -> Result<CaptureOutput> {
    let mut child = Command::new(prog)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn {
            command: prog.to_string(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match deadline {
        None => child.wait().map(Some),
        Some(deadline) => wait_until(&mut child, deadline),
    };
    let status = match status {
        Ok(Some(status)) => status,
        Ok(None) => {
            return Err(Error::TimedOut {
                command: prog.to_string(),
            });
        }
        Err(e) => return Err(Error::io(format!("waiting for {prog}"), e)),
    };

    Ok(CaptureOutput {
        stdout: stdout.map(join_output).unwrap_or_default(),
        stderr: stderr.map(join_output).unwrap_or_default(),
        status: exit_code(status),
    })
}

/// Poll `child` until it exits or `deadline` passes. On expiry the child is
/// killed and reaped and `Ok(None)` is returned.
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_output(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Render a command line for log output.
pub fn display_cmd<S: AsRef<str>>(prog: &str, args: &[S]) -> String {
    std::iter::once(prog)
        .chain(args.iter().map(AsRef::as_ref))
        .collect::<Vec<_>>()
        .join(" ")
}
