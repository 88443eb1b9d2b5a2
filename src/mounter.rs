use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cmd::Invoker;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::options::{OptionMap, OptionValue};
use crate::resolver::IdResolver;

/// How long a mountpoint probe may run.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-request context handed to every operation.
#[derive(Clone, Debug, Default)]
pub struct Env {
    deadline: Option<Instant>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this env whose commands must finish within `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Mount lifecycle for one kind of volume.
pub trait Mounter: Send + Sync {
    fn mount(&self, env: &Env, source: &str, target: &str, opts: &OptionMap) -> Result<()>;

    fn unmount(&self, env: &Env, target: &str) -> Result<()>;

    /// Whether `mount_point` is currently mounted. Never fails: anything
    /// inconclusive reads as "not mounted".
    fn check(&self, env: &Env, name: &str, mount_point: &str) -> bool;

    /// Best-effort cleanup of everything left under `path`.
    fn purge(&self, env: &Env, path: &str);
}

/// Clone `template` and merge `opts` and the share's query string into it.
///
/// When `opts` names a `username`, the directory credentials are resolved
/// to a uid/gid which are merged as ordinary mount options.
pub fn merge_options(
    template: &Config,
    resolver: Option<&dyn IdResolver>,
    env: &Env,
    source: &str,
    opts: &OptionMap,
    ignore: &[&str],
) -> Result<Config> {
    let mut config = template.clone();
    config.set_entries(source, opts, ignore)?;

    let Some(username) = opts.get("username") else {
        return Ok(config);
    };
    let resolver = resolver.ok_or(Error::LdapNotConfigured)?;
    let password = opts.get("password").ok_or(Error::LdapPasswordMissing)?;

    let username = username.render(false);
    info!(%username, "resolving identity");
    let (uid, gid) = resolver
        .resolve(env, &username, &password.render(false))
        .map_err(Error::Resolve)?;
    debug!(%uid, %gid, "identity resolved");

    let mut resolved = opts.clone();
    resolved.insert("uid".to_string(), OptionValue::Str(uid));
    resolved.insert("gid".to_string(), OptionValue::Str(gid));

    let mut config = template.clone();
    config.allow_mount(&["uid", "gid"]);
    config.set_entries(source, &resolved, ignore)?;
    Ok(config)
}

/// `opts` with the password masked, for logging.
pub fn redacted(opts: &OptionMap) -> OptionMap {
    opts.iter()
        .map(|(k, v)| {
            if k == "password" {
                (k.clone(), OptionValue::Str("<redacted>".to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

/// Probe `mount_point` with `mountpoint -q` under [`CHECK_TIMEOUT`].
pub fn probe_mountpoint(invoker: &dyn Invoker, env: &Env, name: &str, mount_point: &str) -> bool {
    let env = env.with_timeout(CHECK_TIMEOUT);
    match invoker.invoke(&env, "mountpoint", &["-q".to_string(), mount_point.to_string()]) {
        Ok(_) => true,
        Err(e) => {
            info!(name, mount_point, error = %e, "unable to verify volume");
            false
        }
    }
}
