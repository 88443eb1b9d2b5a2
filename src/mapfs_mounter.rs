#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

use crate::background::BackgroundInvoker;
use crate::cmd::Invoker;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fuse_mounter::readonly_requested;
use crate::mount_table::MountTable;
use crate::mounter::{Env, Mounter, merge_options, probe_mountpoint, redacted};
use crate::naming::{
    LocatorRewriter, intermediate_mount, is_reserved_name, paired_target, trim_trailing_slash,
};
use crate::options::OptionMap;
use crate::platform::{FileStat, FileSystem};
use crate::resolver::IdResolver;

/// Caller options that never go through the generic merge.
pub const MAPFS_IGNORED_OPTIONS: &[&str] = &[
    "source",
    "mount",
    "readonly",
    "username",
    "password",
    "experimental",
    "version",
];

/// Line mapfs prints once the overlay is serving.
pub const READY_MARKER: &str = "Mounted!";

/// Owner or group id the NFS server reports for an unmapped identity.
pub const UNKNOWN_ID: u32 = 4294967294;

pub const DEFAULT_MAPFS_PATH: &str = "/var/vcap/packages/mapfs/bin/mapfs";
pub const DEFAULT_MOUNT_OPTIONS: &str =
    "rsize=1048576,wsize=1048576,hard,intr,timeo=600,retrans=2,actimeo=0";
const DEFAULT_NFS_VERSION: &str = "3";

/// Host paths and tunables for [`MapfsMounter`].
#[derive(Clone, Debug, PartialEq)]
pub struct MapfsSettings {
    pub mapfs_path: String,
    /// Filesystem type passed to `mount -t`.
    pub fs_type: String,
    /// Kernel mount options, before `ro` and `vers` are appended.
    pub mount_options: String,
    /// How long mapfs has to print [`READY_MARKER`].
    pub ready_timeout: Duration,
    pub purge_poll_interval: Duration,
    pub purge_attempts: usize,
    /// Directory for per-target mapfs output. `None` keeps the output on a
    /// pipe, which only suits a launcher that outlives the overlay.
    pub log_dir: Option<PathBuf>,
}

impl Default for MapfsSettings {
    fn default() -> Self {
        Self {
            mapfs_path: DEFAULT_MAPFS_PATH.to_string(),
            fs_type: "nfs".to_string(),
            mount_options: DEFAULT_MOUNT_OPTIONS.to_string(),
            ready_timeout: Duration::from_secs(300),
            purge_poll_interval: Duration::from_millis(1000),
            purge_attempts: 30,
            log_dir: None,
        }
    }
}

/// Mounts a share with the kernel client at `<target>_mapfs`, then layers
/// a mapfs process over it at `<target>` that presents every file as
/// owned by the caller's uid/gid.
///
/// Requests without the `experimental` option go to the fallback mounter.
pub struct MapfsMounter {
    invoker: Arc<dyn Invoker>,
    background: Arc<dyn BackgroundInvoker>,
    fs: Arc<dyn FileSystem>,
    mount_table: Arc<dyn MountTable>,
    fallback: Arc<dyn Mounter>,
    config: Config,
    resolver: Option<Arc<dyn IdResolver>>,
    settings: MapfsSettings,
    locator: LocatorRewriter,
}

impl MapfsMounter {
    pub fn new(
        invoker: Arc<dyn Invoker>,
        background: Arc<dyn BackgroundInvoker>,
        fs: Arc<dyn FileSystem>,
        mount_table: Arc<dyn MountTable>,
        fallback: Arc<dyn Mounter>,
        config: Config,
        settings: MapfsSettings,
    ) -> Result<Self> {
        Ok(Self {
            invoker,
            background,
            fs,
            mount_table,
            fallback,
            config,
            resolver: None,
            settings,
            locator: LocatorRewriter::new()?,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn IdResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn run(&self, env: &Env, command: &str, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.invoker.invoke(env, command, &args)
    }

    /// `-o` value for the kernel mount.
    fn kernel_options(&self, opts: &OptionMap) -> String {
        let mut options = self.settings.mount_options.clone();
        if readonly_requested(opts) {
            options.push_str(",ro");
        }
        let version = opts
            .get("version")
            .map(|v| v.render(false))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_NFS_VERSION.to_string());
        if !options.is_empty() {
            options.push(',');
        }
        options.push_str("vers=");
        options.push_str(&version);
        options
    }

    /// Undo a kernel mount at `intermediate`. Both steps always run; the
    /// remove is non-recursive so it fails on a mount point still in use.
    fn rollback(&self, env: &Env, intermediate: &str) {
        if let Err(e) = self.run(env, "umount", &[intermediate]) {
            error!(intermediate, error = %e, "intermediate unmount failed");
        }
        if let Err(e) = self.fs.remove(intermediate) {
            error!(intermediate, error = %e, "rollback remove failed");
        }
    }

    /// `<log_dir>/<target with '/' as '_'>.log`
    fn overlay_log(&self, target: &str) -> Option<PathBuf> {
        let dir = self.settings.log_dir.as_ref()?;
        let name = target.trim_start_matches('/').replace('/', "_");
        Some(dir.join(format!("{name}.log")))
    }

    fn process_name(&self) -> String {
        Path::new(&self.settings.mapfs_path)
            .file_name()
            .map_or_else(|| "mapfs".to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// Resolved `key` as a numeric id.
fn numeric_id(config: &Config, key: &'static str) -> Result<u32> {
    let value = config.lookup(key).ok_or(Error::MissingOption(key))?;
    value.parse().map_err(|_| Error::InvalidId {
        name: key,
        value: value.to_string(),
    })
}

/// Whether `uid`/`gid` may read a directory with `stat`. A file owner or
/// group of [`UNKNOWN_ID`] matches any caller.
pub fn has_read_access(stat: &FileStat, uid: u32, gid: u32) -> bool {
    let owner = stat.uid == uid || stat.uid == UNKNOWN_ID;
    let group = stat.gid == gid || stat.gid == UNKNOWN_ID;
    (owner && stat.mode & 0o400 != 0)
        || (group && stat.mode & 0o040 != 0)
        || stat.mode & 0o004 != 0
}

impl Mounter for MapfsMounter {
    fn mount(&self, env: &Env, source: &str, target: &str, opts: &OptionMap) -> Result<()> {
        if !opts.contains_key("experimental") {
            return self.fallback.mount(env, source, target, opts);
        }

        let _span = info_span!("mount", target).entered();
        info!("start");

        let config = merge_options(
            &self.config,
            self.resolver.as_deref(),
            env,
            source,
            opts,
            MAPFS_IGNORED_OPTIONS,
        )
        .inspect_err(|e| debug!(error = %e, options = ?redacted(opts), "option merge failed"))?;

        let uid = numeric_id(&config, "uid")?;
        let gid = numeric_id(&config, "gid")?;

        let target = trim_trailing_slash(target);
        if is_reserved_name(target) {
            return Err(Error::ReservedName(target.to_string()));
        }
        let remote = self.locator.rewrite(source);
        let intermediate = intermediate_mount(target);
        let kernel_options = self.kernel_options(opts);
        debug!(
            %remote,
            %intermediate,
            %kernel_options,
            uid,
            gid,
            sloppy = config.sloppy_mount(),
            mapfs_options = ?config.mount_config(),
            options = ?redacted(opts),
            "parsed mount"
        );

        self.fs
            .mkdir_all(&intermediate, 0o777)
            .map_err(|e| Error::io(format!("creating {intermediate}"), e))?;

        let mounted = self.run(
            env,
            "mount",
            &[
                "-t",
                &self.settings.fs_type,
                "-o",
                &kernel_options,
                &remote,
                &intermediate,
            ],
        );
        if let Err(e) = mounted {
            error!(error = %e, "kernel mount failed");
            if let Err(re) = self.fs.remove(&intermediate) {
                error!(%intermediate, error = %re, "remove failed");
            }
            return Err(e);
        }

        match self.fs.stat(&intermediate) {
            Ok(stat) if !has_read_access(&stat, uid, gid) => {
                warn!(uid, gid, mode = %format_args!("{:o}", stat.mode), "share is not readable");
                self.rollback(env, &intermediate);
                return Err(Error::AccessDenied {
                    uid,
                    gid,
                    path: intermediate,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(%intermediate, error = %e, "unable to verify share permissions"),
        }

        let mut args = vec![
            "-uid".to_string(),
            uid.to_string(),
            "-gid".to_string(),
            gid.to_string(),
        ];
        args.extend(config.mount_except(&["uid", "gid"]));
        args.push(target.to_string());
        args.push(intermediate.clone());

        let log = self.overlay_log(target);
        let launched = self.background.invoke(
            &self.settings.mapfs_path,
            &args,
            READY_MARKER,
            self.settings.ready_timeout,
            log.as_deref(),
        );
        match launched {
            // The overlay outlives this call; unmount and purge stop it.
            Ok(_overlay) => {}
            Err(e) => {
                error!(error = %e, "mapfs launch failed");
                self.rollback(env, &intermediate);
                return Err(e);
            }
        }

        info!("end");
        Ok(())
    }

    fn unmount(&self, env: &Env, target: &str) -> Result<()> {
        let target = trim_trailing_slash(target);
        let _span = info_span!("unmount", target).entered();
        info!("start");

        let intermediate = intermediate_mount(target);
        let layered = self
            .mount_table
            .exists(&intermediate)
            .map_err(|e| Error::io(format!("checking {intermediate}"), e))?;
        if !layered {
            return self.fallback.unmount(env, target);
        }

        self.run(env, "umount", &["-l", target])?;

        if let Err(e) = self.run(env, "umount", &["-l", &intermediate]) {
            error!(%intermediate, error = %e, "intermediate unmount failed");
            return Ok(());
        }

        match self.fs.remove(&intermediate) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(format!("removing {intermediate}"), e)),
        }
        info!("end");
        Ok(())
    }

    fn check(&self, env: &Env, name: &str, mount_point: &str) -> bool {
        let _span = info_span!("check", name).entered();
        probe_mountpoint(self.invoker.as_ref(), env, name, mount_point)
    }

    fn purge(&self, env: &Env, path: &str) {
        let _span = info_span!("purge", path).entered();
        info!("start");

        let process = self.process_name();
        let mut result = self.run(env, "pkill", &[&process]);
        info!(result = ?result, "pkill");

        let mut attempts = 0;
        while result.is_ok() && attempts < self.settings.purge_attempts {
            debug!("waiting for mapfs to exit");
            thread::sleep(self.settings.purge_poll_interval);
            result = self.run(env, "pgrep", &[&process]);
            attempts += 1;
        }
        if result.is_ok() {
            warn!(attempts, "mapfs still running");
        }

        match self.mount_table.list(path) {
            Ok(mounts) => {
                for mount in &mounts {
                    let Some(real) = paired_target(mount) else {
                        continue;
                    };
                    if let Err(e) = self.run(env, "umount", &["-l", "-f", real]) {
                        error!(path = real, error = %e, "unmount failed");
                    }
                    if let Err(e) = self.run(env, "umount", &["-l", "-f", mount]) {
                        error!(path = %mount, error = %e, "unmount failed");
                    }
                    if let Err(e) = self.fs.remove(real) {
                        error!(path = real, error = %e, "cannot remove directory");
                    }
                    if let Err(e) = self.fs.remove(mount) {
                        error!(path = %mount, error = %e, "cannot remove directory");
                    }
                }
            }
            Err(e) => error!(error = %e, "unable to list mounts"),
        }

        self.fallback.purge(env, path);
        info!("end");
    }
}
