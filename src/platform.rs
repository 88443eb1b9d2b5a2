use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};

use nix::sys::stat::{Mode, umask};

/// Ownership and permission bits of a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Directory operations the mounters need from the host.
pub trait FileSystem: Send + Sync {
    /// Create `path` and any missing parents with exactly `mode`,
    /// unaffected by the process umask.
    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()>;

    /// Remove the empty directory at `path`.
    fn remove(&self, path: &str) -> io::Result<()>;

    fn stat(&self, path: &str) -> io::Result<FileStat>;

    /// Names of the directories directly inside `path`.
    fn read_dir(&self, path: &str) -> io::Result<Vec<String>>;
}

/// Clears the process umask until dropped.
pub struct UmaskGuard {
    previous: Mode,
}

impl UmaskGuard {
    pub fn clear() -> Self {
        Self {
            previous: umask(Mode::empty()),
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}

/// [`FileSystem`] backed by the real host.
#[derive(Debug, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()> {
        let _umask = UmaskGuard::clear();
        DirBuilder::new().recursive(true).mode(mode).create(path)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        std::fs::remove_dir(path)
    }

    fn stat(&self, path: &str) -> io::Result<FileStat> {
        let meta = std::fs::metadata(path)?;
        Ok(FileStat {
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
        })
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_str(p: &std::path::Path) -> String {
        p.to_string_lossy().into_owned()
    }

    #[test]
    fn mkdir_all_ignores_umask() {
        let dir = tempfile::tempdir().unwrap();
        let target = path_str(&dir.path().join("a").join("vol_mapfs"));
        OsFileSystem.mkdir_all(&target, 0o777).unwrap();
        let stat = OsFileSystem.stat(&target).unwrap();
        assert_eq!(stat.mode & 0o777, 0o777);
    }

    #[test]
    fn remove_only_takes_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("vol");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("file"), b"x").unwrap();
        assert!(OsFileSystem.remove(&path_str(&target)).is_err());
        std::fs::remove_file(target.join("file")).unwrap();
        OsFileSystem.remove(&path_str(&target)).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn read_dir_lists_directories_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::create_dir(dir.path().join("a_mapfs")).unwrap();
        std::fs::write(dir.path().join("file"), b"x").unwrap();
        let names = OsFileSystem.read_dir(&path_str(dir.path())).unwrap();
        assert_eq!(names, vec!["a_mapfs", "b"]);
    }

    #[test]
    fn stat_missing_path_is_err() {
        assert!(OsFileSystem.stat("/__nfsmap_nonexistent__").is_err());
    }
}
