use std::thread;
use std::time::Duration;

use tracing::info;

use crate::error::Result;
use crate::mounter::{Env, Mounter};
use crate::options::OptionMap;

/// Stands in for a real mounter when exercising the driver without NFS.
/// Mounts only take time; `check` always reports "not mounted" so callers
/// remount.
#[derive(Debug)]
pub struct MockMounter {
    mount_time: Duration,
}

impl MockMounter {
    pub fn new(mount_time: Duration) -> Self {
        Self { mount_time }
    }
}

impl Mounter for MockMounter {
    fn mount(&self, _env: &Env, source: &str, target: &str, _opts: &OptionMap) -> Result<()> {
        info!(source, target, mount_time = ?self.mount_time, "mock mount");
        thread::sleep(self.mount_time);
        Ok(())
    }

    fn unmount(&self, _env: &Env, _target: &str) -> Result<()> {
        Ok(())
    }

    fn check(&self, _env: &Env, _name: &str, _mount_point: &str) -> bool {
        false
    }

    fn purge(&self, _env: &Env, _path: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn mount_takes_the_configured_time() {
        let mounter = MockMounter::new(Duration::from_millis(50));
        let started = Instant::now();
        mounter
            .mount(&Env::new(), "server:/x", "/mnt/x", &OptionMap::new())
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn check_always_asks_for_a_remount() {
        let mounter = MockMounter::new(Duration::ZERO);
        mounter
            .mount(&Env::new(), "server:/x", "/mnt/x", &OptionMap::new())
            .unwrap();
        assert!(!mounter.check(&Env::new(), "x", "/mnt/x"));
        assert!(mounter.unmount(&Env::new(), "/mnt/x").is_ok());
    }
}
