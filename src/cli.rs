use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{Config, ConfigDetails};
use crate::mapfs_mounter::{DEFAULT_MAPFS_PATH, DEFAULT_MOUNT_OPTIONS, MapfsSettings};
use crate::options::{OptionMap, OptionValue};

#[derive(Parser)]
#[command(
    name = "nfsmap",
    version,
    about = "Mount NFS shares for containers, remapping ownership through mapfs",
    long_about = "nfsmap validates caller mount options against operator policy and drives \
                  the kernel NFS client, fuse-nfs and mapfs.\n\n\
                  Subcommands: mount, unmount, check, purge"
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace, -vvv with targets)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub policy: PolicyArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Operator policy and host settings.
#[derive(Args, Clone, Debug)]
pub struct PolicyArgs {
    /// Comma list of share-URL parameters callers may set
    #[arg(long, env = "NFSMAP_ALLOWED_IN_SOURCE", default_value = "", global = true)]
    pub allowed_in_source: String,

    /// Comma list of key:value defaults for share-URL parameters
    #[arg(long, env = "NFSMAP_DEFAULT_IN_SOURCE", default_value = "", global = true)]
    pub default_in_source: String,

    /// Comma list of mount options callers may set
    #[arg(long, env = "NFSMAP_ALLOWED_IN_MOUNT", default_value = "", global = true)]
    pub allowed_in_mount: String,

    /// Comma list of key:value defaults for mount options
    #[arg(long, env = "NFSMAP_DEFAULT_IN_MOUNT", default_value = "", global = true)]
    pub default_in_mount: String,

    /// Share-URL parameters that must be resolved
    #[arg(
        long,
        env = "NFSMAP_MANDATORY_IN_SOURCE",
        value_delimiter = ',',
        global = true
    )]
    pub mandatory_in_source: Vec<String>,

    /// Mount options that must be resolved
    #[arg(
        long,
        env = "NFSMAP_MANDATORY_IN_MOUNT",
        value_delimiter = ',',
        global = true
    )]
    pub mandatory_in_mount: Vec<String>,

    /// Path to the mapfs binary
    #[arg(long, env = "NFSMAP_MAPFS_PATH", default_value = DEFAULT_MAPFS_PATH, global = true)]
    pub mapfs_path: String,

    /// Filesystem type for the kernel mount
    #[arg(long, env = "NFSMAP_FS_TYPE", default_value = "nfs", global = true)]
    pub fs_type: String,

    /// Kernel mount options
    #[arg(
        long,
        env = "NFSMAP_MOUNT_OPTIONS",
        default_value = DEFAULT_MOUNT_OPTIONS,
        global = true
    )]
    pub mount_options: String,

    /// Seconds mapfs has to report that it is mounted
    #[arg(long, env = "NFSMAP_MAPFS_TIMEOUT", default_value_t = 300, global = true)]
    pub mapfs_timeout: u64,

    /// Milliseconds between checks for exited mapfs processes during purge
    #[arg(long, env = "NFSMAP_PURGE_POLL_MS", default_value_t = 1000, global = true)]
    pub purge_poll_ms: u64,

    /// Directory for per-target mapfs output [default: <tmp>/nfsmap]
    #[arg(long, env = "NFSMAP_MAPFS_LOG_DIR", global = true)]
    pub mapfs_log_dir: Option<PathBuf>,

    /// Replace the real mounter with one that only sleeps
    #[arg(long, env = "NFSMAP_USE_MOCK_MOUNTER", global = true)]
    pub use_mock_mounter: bool,

    /// Seconds a mock mount takes
    #[arg(long, env = "NFSMAP_MOCK_MOUNT_SECONDS", default_value_t = 0, global = true)]
    pub mock_mount_seconds: u64,
}

impl PolicyArgs {
    /// The option template every mount request is merged against.
    pub fn config(&self) -> Config {
        let mut source = ConfigDetails::new();
        source.read_conf(
            &self.allowed_in_source,
            &self.default_in_source,
            &non_empty(&self.mandatory_in_source),
        );
        let mut mount = ConfigDetails::new();
        mount.read_conf(
            &self.allowed_in_mount,
            &self.default_in_mount,
            &non_empty(&self.mandatory_in_mount),
        );
        Config::new(source, mount)
    }

    pub fn settings(&self) -> MapfsSettings {
        MapfsSettings {
            mapfs_path: self.mapfs_path.clone(),
            fs_type: self.fs_type.clone(),
            mount_options: self.mount_options.clone(),
            ready_timeout: Duration::from_secs(self.mapfs_timeout),
            purge_poll_interval: Duration::from_millis(self.purge_poll_ms),
            log_dir: Some(
                self.mapfs_log_dir
                    .clone()
                    .unwrap_or_else(|| std::env::temp_dir().join("nfsmap")),
            ),
            ..MapfsSettings::default()
        }
    }
}

fn non_empty(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mount a share at a target directory
    Mount {
        /// Share locator, e.g. server:/export or nfs://server/export?uid=1000
        #[arg(long, value_name = "LOCATOR")]
        source: String,

        /// Directory to mount at
        #[arg(long, value_name = "PATH")]
        target: String,

        /// Mount option as key=value (repeatable)
        #[arg(long = "opt", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        opts: Vec<(String, String)>,

        /// Mount options as a JSON object
        #[arg(long, value_name = "JSON")]
        options: Option<String>,
    },

    /// Unmount a target directory
    Unmount {
        #[arg(long, value_name = "PATH")]
        target: String,
    },

    /// Exit 0 if the mount point is mounted, 1 otherwise
    Check {
        /// Volume name, used in log output
        #[arg(long)]
        name: String,

        #[arg(long, value_name = "PATH")]
        mount_point: String,
    },

    /// Kill leftover mount processes and clean up mounts under a directory
    Purge {
        #[arg(long, value_name = "PATH")]
        path: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Build the caller option map: the JSON object first, then `--opt`
/// pairs, which override JSON entries of the same name.
pub fn option_map(opts: &[(String, String)], json: Option<&str>) -> Result<OptionMap, String> {
    let mut map = match json {
        Some(json) => serde_json::from_str::<OptionMap>(json)
            .map_err(|e| format!("--options must be a JSON object: {e}"))?,
        None => OptionMap::new(),
    };
    for (key, value) in opts {
        map.insert(key.clone(), OptionValue::Str(value.clone()));
    }
    Ok(map)
}
