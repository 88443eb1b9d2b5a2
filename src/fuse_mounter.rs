#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, info_span};

use crate::cmd::Invoker;
use crate::config::Config;
use crate::error::Result;
use crate::mounter::{Env, Mounter, merge_options, probe_mountpoint, redacted};
use crate::options::OptionMap;
use crate::platform::FileSystem;
use crate::resolver::IdResolver;

/// Caller options that never go through the generic merge.
pub const FUSE_IGNORED_OPTIONS: &[&str] = &[
    "source",
    "mount",
    "kerberosPrincipal",
    "kerberosKeytab",
    "readonly",
    "username",
    "password",
    "experimental",
    "version",
];

/// Mounts shares directly with the `fuse-nfs` user-space client.
pub struct FuseMounter {
    invoker: Arc<dyn Invoker>,
    fs: Arc<dyn FileSystem>,
    config: Config,
    resolver: Option<Arc<dyn IdResolver>>,
}

impl FuseMounter {
    pub fn new(invoker: Arc<dyn Invoker>, fs: Arc<dyn FileSystem>, config: Config) -> Self {
        Self {
            invoker,
            fs,
            config,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn IdResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

/// Whether the caller asked for a read-only mount.
pub(crate) fn readonly_requested(opts: &OptionMap) -> bool {
    opts.get("readonly").is_some_and(|v| v.is_set())
}

impl Mounter for FuseMounter {
    fn mount(&self, env: &Env, source: &str, target: &str, opts: &OptionMap) -> Result<()> {
        let _span = info_span!("mount", target).entered();
        info!("start");

        let config = merge_options(
            &self.config,
            self.resolver.as_deref(),
            env,
            source,
            opts,
            FUSE_IGNORED_OPTIONS,
        )
        .inspect_err(|e| debug!(error = %e, options = ?redacted(opts), "option merge failed"))?;

        let mut args = vec![
            "-a".to_string(),
            "-n".to_string(),
            config.share(source),
            "-m".to_string(),
            target.to_string(),
        ];
        args.extend(config.mount());
        if readonly_requested(opts) {
            args.push("-O".to_string());
        }
        debug!(?args, options = ?redacted(opts), "parsed mount");

        self.invoker.invoke(env, "fuse-nfs", &args)?;
        info!("end");
        Ok(())
    }

    fn unmount(&self, env: &Env, target: &str) -> Result<()> {
        let _span = info_span!("unmount", target).entered();
        self.invoker
            .invoke(env, "fusermount", &["-u".to_string(), target.to_string()])?;
        Ok(())
    }

    fn check(&self, env: &Env, name: &str, mount_point: &str) -> bool {
        let _span = info_span!("check", name).entered();
        probe_mountpoint(self.invoker.as_ref(), env, name, mount_point)
    }

    fn purge(&self, env: &Env, path: &str) {
        let _span = info_span!("purge", path).entered();
        info!("start");

        match self
            .invoker
            .invoke(env, "pkill", &["-f".to_string(), "fuse-nfs".to_string()])
        {
            Ok(output) => info!(%output, "pkill"),
            Err(e) => info!(error = %e, "pkill"),
        }

        let names = match self.fs.read_dir(path) {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "unable to list purge directory");
                return;
            }
        };
        for name in names {
            let leftover = Path::new(path).join(&name);
            let leftover = leftover.to_string_lossy();
            if let Err(e) = self.fs.remove(&leftover) {
                error!(path = %leftover, error = %e, "cannot remove directory");
            }
        }
        info!("end");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigDetails;
    use crate::fakes::{FakeFileSystem, FakeIdResolver, FakeInvoker};
    use crate::options::OptionValue;

    struct Harness {
        invoker: Arc<FakeInvoker>,
        fs: Arc<FakeFileSystem>,
        mounter: FuseMounter,
    }

    fn harness(mount_allowed: &str, mount_defaults: &str) -> Harness {
        let mut mount = ConfigDetails::new();
        mount.read_conf(mount_allowed, mount_defaults, &[]);
        let mut source = ConfigDetails::new();
        source.read_conf("uid,gid", "", &[]);
        let invoker = Arc::new(FakeInvoker::new());
        let fs = Arc::new(FakeFileSystem::new());
        let mounter = FuseMounter::new(invoker.clone(), fs.clone(), Config::new(source, mount));
        Harness {
            invoker,
            fs,
            mounter,
        }
    }

    fn opts(entries: &[(&str, OptionValue)]) -> OptionMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // --- mount ---

    #[test]
    fn mount_runs_fuse_nfs_with_rendered_options() {
        let h = harness("auto_cache,dircache", "");
        h.mounter
            .mount(
                &Env::new(),
                "nfs://server/export",
                "/mnt/vol",
                &opts(&[("auto_cache", true.into()), ("dircache", true.into())]),
            )
            .unwrap();
        assert_eq!(
            h.invoker.lines(),
            vec!["fuse-nfs -a -n nfs://server/export -m /mnt/vol --auto_cache=true --dircache"]
        );
    }

    #[test]
    fn mount_rewrites_share_query_string() {
        let h = harness("", "");
        h.mounter
            .mount(
                &Env::new(),
                "nfs://server/export?uid=1000&gid=1000",
                "/mnt/vol",
                &OptionMap::new(),
            )
            .unwrap();
        let calls = h.invoker.calls();
        assert_eq!(calls[0].args[2], "nfs://server/export?uid=1000&gid=1000");
    }

    #[test]
    fn readonly_adds_flag() {
        let h = harness("", "");
        h.mounter
            .mount(
                &Env::new(),
                "server:/export",
                "/mnt/vol",
                &opts(&[("readonly", true.into())]),
            )
            .unwrap();
        assert_eq!(h.invoker.calls()[0].args.last().unwrap(), "-O");
    }

    #[test]
    fn disallowed_option_fails_before_invoking() {
        let h = harness("", "");
        let err = h
            .mounter
            .mount(
                &Env::new(),
                "server:/export",
                "/mnt/vol",
                &opts(&[("allow_other", true.into())]),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Not allowed options : allow_other");
        assert!(h.invoker.calls().is_empty());
    }

    #[test]
    fn credentials_never_reach_the_command_line() {
        let h = harness("", "");
        let mounter = h
            .mounter
            .with_resolver(Arc::new(FakeIdResolver::returning("100", "200")));
        mounter
            .mount(
                &Env::new(),
                "server:/export",
                "/mnt/vol",
                &opts(&[("username", "alice".into()), ("password", "s3cret".into())]),
            )
            .unwrap();
        let line = h.invoker.lines().remove(0);
        assert!(line.contains("--uid=100"), "got: {line}");
        assert!(line.contains("--gid=200"), "got: {line}");
        assert!(!line.contains("alice"));
        assert!(!line.contains("s3cret"));
    }

    #[test]
    fn command_failure_is_returned() {
        let h = harness("", "");
        h.invoker.fail_when(|command, _| command == "fuse-nfs");
        assert!(
            h.mounter
                .mount(&Env::new(), "server:/export", "/mnt/vol", &OptionMap::new())
                .is_err()
        );
    }

    // --- unmount / check ---

    #[test]
    fn unmount_uses_fusermount() {
        let h = harness("", "");
        h.mounter.unmount(&Env::new(), "/mnt/vol").unwrap();
        assert_eq!(h.invoker.lines(), vec!["fusermount -u /mnt/vol"]);
    }

    #[test]
    fn check_reports_probe_result() {
        let h = harness("", "");
        assert!(h.mounter.check(&Env::new(), "vol", "/mnt/vol"));
        h.invoker.fail_when(|command, _| command == "mountpoint");
        assert!(!h.mounter.check(&Env::new(), "vol", "/mnt/vol"));
    }

    // --- purge ---

    #[test]
    fn purge_kills_clients_and_removes_leftovers() {
        let h = harness("", "");
        h.fs.set_dirs(&["a", "b"]);
        h.mounter.purge(&Env::new(), "/var/vcap/data/volumes");
        assert_eq!(h.invoker.lines(), vec!["pkill -f fuse-nfs"]);
        assert_eq!(
            h.fs.removes(),
            vec!["/var/vcap/data/volumes/a", "/var/vcap/data/volumes/b"]
        );
    }

    #[test]
    fn purge_survives_every_failure() {
        let h = harness("", "");
        h.invoker.fail_when(|_, _| true);
        h.fs.fail_read_dir();
        h.mounter.purge(&Env::new(), "/var/vcap/data/volumes");
        assert!(h.fs.removes().is_empty());
    }
}
