/// Exit code: success.
pub const SUCCESS: i32 = 0;

/// Exit code: runtime error (mount failed, unmount failed, etc.).
pub const RUNTIME_ERROR: i32 = 1;

/// Exit code: `check` found the mount point not mounted.
pub const NOT_MOUNTED: i32 = 1;

/// Exit code: usage / input error (bad flags, malformed `--options` JSON, etc.).
pub const USAGE_ERROR: i32 = 2;

/// Exit code: interrupted by Ctrl+C.
pub const INTERRUPTED: i32 = 130;
