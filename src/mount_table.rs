use std::io;
use std::path::Path;

use nix::errno::Errno;

/// Where Linux publishes the mount table.
pub const PROC_MOUNTS: &str = "/proc/mounts";

#[derive(Debug, PartialEq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
}

/// Read-only view of the host's mounts.
pub trait MountTable: Send + Sync {
    /// Whether a mount directory is present at `path`.
    fn exists(&self, path: &str) -> io::Result<bool>;

    /// Mount targets strictly below `prefix`.
    fn list(&self, prefix: &str) -> io::Result<Vec<String>>;
}

/// Parse `/proc/mounts` text.
///
/// Format per line: `<source> <target> <fstype> <options> <dump> <pass>`,
/// with whitespace in paths written as octal escapes (`\040`).
pub fn parse_proc_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let target = parts.next()?;
            let fstype = parts.next()?;
            Some(MountEntry {
                source: unescape(source),
                target: unescape(target),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Decode the `\ooo` octal escapes the kernel writes into mount paths.
pub fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let digits = &field[i + 1..i + 4];
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Return mount targets strictly below `prefix`.
pub fn targets_under(entries: &[MountEntry], prefix: &str) -> Vec<String> {
    let prefix = prefix.trim_end_matches('/');
    entries
        .iter()
        .filter(|e| {
            e.target
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
        })
        .map(|e| e.target.clone())
        .collect()
}

/// [`MountTable`] backed by `/proc/mounts`.
#[derive(Debug, Default)]
pub struct ProcMountTable;

impl ProcMountTable {
    fn entries(&self) -> io::Result<Vec<MountEntry>> {
        let text = std::fs::read_to_string(PROC_MOUNTS)?;
        Ok(parse_proc_mounts(&text))
    }
}

impl MountTable for ProcMountTable {
    /// A path listed in the mount table exists even when stat on it would
    /// fail (dead FUSE or stale NFS handle). Otherwise fall back to an
    /// lstat that treats those same failures as "present".
    fn exists(&self, path: &str) -> io::Result<bool> {
        if self.entries()?.iter().any(|e| e.target == path) {
            return Ok(true);
        }
        match std::fs::symlink_metadata(Path::new(path)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) if is_broken_mount(&e) => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        Ok(targets_under(&self.entries()?, prefix))
    }
}

fn is_broken_mount(err: &io::Error) -> bool {
    err.raw_os_error()
        .map(Errno::from_raw)
        .is_some_and(|e| matches!(e, Errno::ESTALE | Errno::ENOTCONN | Errno::EIO))
}
