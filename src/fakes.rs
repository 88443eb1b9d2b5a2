#![allow(dead_code)]

//! Recording test doubles for the mounters' collaborators.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::background::{BackgroundInvoker, CancelHandle};
use crate::cmd::Invoker;
use crate::error::{Error, Result};
use crate::mount_table::MountTable;
use crate::mounter::{Env, Mounter};
use crate::options::OptionMap;
use crate::platform::{FileStat, FileSystem};
use crate::resolver::{IdResolver, ResolveError};

type Matcher = Box<dyn Fn(&str, &[String]) -> bool + Send + Sync>;

// ── Invoker ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub deadline: Option<Instant>,
}

impl Invocation {
    /// `command arg arg ...`
    pub fn line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Succeeds with empty output unless a registered matcher fires.
#[derive(Default)]
pub struct FakeInvoker {
    calls: Mutex<Vec<Invocation>>,
    failures: Mutex<Vec<Matcher>>,
}

impl FakeInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every later call for which `matcher` returns true.
    pub fn fail_when<F>(&self, matcher: F)
    where
        F: Fn(&str, &[String]) -> bool + Send + Sync + 'static,
    {
        self.failures.lock().push(Box::new(matcher));
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Every call rendered as a command line.
    pub fn lines(&self) -> Vec<String> {
        self.calls.lock().iter().map(Invocation::line).collect()
    }
}

impl Invoker for FakeInvoker {
    fn invoke(&self, env: &Env, command: &str, args: &[String]) -> Result<String> {
        self.calls.lock().push(Invocation {
            command: command.to_string(),
            args: args.to_vec(),
            deadline: env.deadline(),
        });
        if self.failures.lock().iter().any(|m| m(command, args)) {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                status: "exit 1".to_string(),
                output: "badness".to_string(),
            });
        }
        Ok(String::new())
    }
}

// ── BackgroundInvoker ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct BackgroundLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub marker: String,
    pub timeout: Duration,
    pub log: Option<PathBuf>,
}

#[derive(Default)]
pub struct FakeBackgroundInvoker {
    launches: Mutex<Vec<BackgroundLaunch>>,
    fail: Mutex<bool>,
}

impl FakeBackgroundInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later launch time out.
    pub fn fail(&self) {
        *self.fail.lock() = true;
    }

    pub fn launches(&self) -> Vec<BackgroundLaunch> {
        self.launches.lock().clone()
    }
}

impl BackgroundInvoker for FakeBackgroundInvoker {
    fn invoke(
        &self,
        command: &str,
        args: &[String],
        marker: &str,
        timeout: Duration,
        log: Option<&Path>,
    ) -> Result<CancelHandle> {
        self.launches.lock().push(BackgroundLaunch {
            command: command.to_string(),
            args: args.to_vec(),
            marker: marker.to_string(),
            timeout,
            log: log.map(Path::to_path_buf),
        });
        if *self.fail.lock() {
            return Err(Error::TimedOut {
                command: command.to_string(),
            });
        }
        Ok(CancelHandle::new(|| {}))
    }
}

// ── FileSystem ────────────────────────────────────────────────────────────────

/// In-memory [`FileSystem`]. `stat` reports a world-readable directory
/// until told otherwise.
pub struct FakeFileSystem {
    mkdirs: Mutex<Vec<(String, u32)>>,
    removes: Mutex<Vec<String>>,
    stat: Mutex<Option<FileStat>>,
    remove_error: Mutex<Option<io::ErrorKind>>,
    dirs: Mutex<Option<Vec<String>>>,
}

impl Default for FakeFileSystem {
    fn default() -> Self {
        Self {
            mkdirs: Mutex::new(Vec::new()),
            removes: Mutex::new(Vec::new()),
            stat: Mutex::new(Some(FileStat {
                mode: 0o40777,
                uid: 0,
                gid: 0,
            })),
            remove_error: Mutex::new(None),
            dirs: Mutex::new(Some(Vec::new())),
        }
    }
}

impl FakeFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stat(&self, mode: u32, uid: u32, gid: u32) {
        *self.stat.lock() = Some(FileStat { mode, uid, gid });
    }

    pub fn fail_stat(&self) {
        *self.stat.lock() = None;
    }

    pub fn fail_remove(&self, kind: io::ErrorKind) {
        *self.remove_error.lock() = Some(kind);
    }

    pub fn set_dirs(&self, names: &[&str]) {
        *self.dirs.lock() = Some(names.iter().map(|s| s.to_string()).collect());
    }

    pub fn fail_read_dir(&self) {
        *self.dirs.lock() = None;
    }

    pub fn mkdirs(&self) -> Vec<(String, u32)> {
        self.mkdirs.lock().clone()
    }

    pub fn removes(&self) -> Vec<String> {
        self.removes.lock().clone()
    }
}

impl FileSystem for FakeFileSystem {
    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()> {
        self.mkdirs.lock().push((path.to_string(), mode));
        Ok(())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.removes.lock().push(path.to_string());
        match *self.remove_error.lock() {
            Some(kind) => Err(io::Error::new(kind, "remove failed")),
            None => Ok(()),
        }
    }

    fn stat(&self, _path: &str) -> io::Result<FileStat> {
        (*self.stat.lock()).ok_or_else(|| io::Error::other("stat failed"))
    }

    fn read_dir(&self, _path: &str) -> io::Result<Vec<String>> {
        self.dirs
            .lock()
            .clone()
            .ok_or_else(|| io::Error::other("read_dir failed"))
    }
}

// ── MountTable ────────────────────────────────────────────────────────────────

pub struct FakeMountTable {
    exists: Mutex<Option<bool>>,
    mounts: Mutex<Option<Vec<String>>>,
    exists_calls: Mutex<Vec<String>>,
}

impl Default for FakeMountTable {
    fn default() -> Self {
        Self {
            exists: Mutex::new(Some(true)),
            mounts: Mutex::new(Some(Vec::new())),
            exists_calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exists(&self, exists: bool) {
        *self.exists.lock() = Some(exists);
    }

    pub fn fail_exists(&self) {
        *self.exists.lock() = None;
    }

    pub fn set_mounts(&self, targets: &[&str]) {
        *self.mounts.lock() = Some(targets.iter().map(|s| s.to_string()).collect());
    }

    pub fn fail_list(&self) {
        *self.mounts.lock() = None;
    }

    pub fn exists_calls(&self) -> Vec<String> {
        self.exists_calls.lock().clone()
    }
}

impl MountTable for FakeMountTable {
    fn exists(&self, path: &str) -> io::Result<bool> {
        self.exists_calls.lock().push(path.to_string());
        (*self.exists.lock()).ok_or_else(|| io::Error::other("exists failed"))
    }

    fn list(&self, _prefix: &str) -> io::Result<Vec<String>> {
        self.mounts
            .lock()
            .clone()
            .ok_or_else(|| io::Error::other("list failed"))
    }
}

// ── IdResolver ────────────────────────────────────────────────────────────────

pub struct FakeIdResolver {
    result: std::result::Result<(String, String), String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeIdResolver {
    pub fn returning(uid: &str, gid: &str) -> Self {
        Self {
            result: Ok((uid.to_string(), gid.to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

impl IdResolver for FakeIdResolver {
    fn resolve(
        &self,
        _env: &Env,
        username: &str,
        password: &str,
    ) -> std::result::Result<(String, String), ResolveError> {
        self.calls
            .lock()
            .push((username.to_string(), password.to_string()));
        self.result.clone().map_err(ResolveError::from)
    }
}

// ── Mounter ───────────────────────────────────────────────────────────────────

/// Records every call as a short line such as `unmount /mnt/vol`.
#[derive(Default)]
pub struct FakeMounter {
    calls: Mutex<Vec<String>>,
    mounted: Mutex<bool>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mounted(&self, mounted: bool) {
        *self.mounted.lock() = mounted;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Mounter for FakeMounter {
    fn mount(&self, _env: &Env, source: &str, target: &str, _opts: &OptionMap) -> Result<()> {
        self.calls.lock().push(format!("mount {source} {target}"));
        Ok(())
    }

    fn unmount(&self, _env: &Env, target: &str) -> Result<()> {
        self.calls.lock().push(format!("unmount {target}"));
        Ok(())
    }

    fn check(&self, _env: &Env, name: &str, mount_point: &str) -> bool {
        self.calls.lock().push(format!("check {name} {mount_point}"));
        *self.mounted.lock()
    }

    fn purge(&self, _env: &Env, path: &str) {
        self.calls.lock().push(format!("purge {path}"));
    }
}
