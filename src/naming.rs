use regex::Regex;

use crate::error::Result;

/// Suffix of the kernel mount directory that sits under a mapfs mount.
/// Volume names ending in it are reserved.
pub const MAPFS_DIRECTORY_SUFFIX: &str = "_mapfs";

/// Return the intermediate mount path for `target`: `<target>_mapfs`.
pub fn intermediate_mount(target: &str) -> String {
    format!("{target}{MAPFS_DIRECTORY_SUFFIX}")
}

/// Return the real mount path paired with an intermediate mount path, or
/// `None` if `path` does not follow the naming convention.
pub fn paired_target(path: &str) -> Option<&str> {
    path.strip_suffix(MAPFS_DIRECTORY_SUFFIX)
        .filter(|real| !real.is_empty() && !real.ends_with('/'))
}

/// Return true if `name` would collide with an intermediate mount.
pub fn is_reserved_name(name: &str) -> bool {
    name.ends_with(MAPFS_DIRECTORY_SUFFIX)
}

/// Strip one trailing slash from `target`, leaving `/` alone.
pub fn trim_trailing_slash(target: &str) -> &str {
    match target.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => target,
    }
}

/// Rewrites legacy `nfs://host/path` share locators into the
/// `host:/path` form the kernel mount tools expect.
#[derive(Clone, Debug)]
pub struct LocatorRewriter {
    legacy: Regex,
}

impl LocatorRewriter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            legacy: Regex::new(r"^nfs://([^/]+)(/.*)?$")?,
        })
    }

    /// Drop the query string and rewrite the legacy form. Anything else
    /// passes through unchanged.
    pub fn rewrite(&self, share: &str) -> String {
        let base = share.split_once('?').map_or(share, |(base, _)| base);
        match self.legacy.captures(base) {
            Some(caps) => {
                let host = &caps[1];
                let path = caps.get(2).map_or("/", |m| m.as_str());
                format!("{host}:{path}")
            }
            None => base.to_string(),
        }
    }
}
