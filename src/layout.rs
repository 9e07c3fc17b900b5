//! Canonical on-disk paths for shared instances
//!
//! ```text
//! <data_root>/<id>/redis.conf
//! <data_root>/<id>/lock
//! <data_root>/<id>/redis-server.pid
//! <data_root>/<id>/db/
//! <log_root>/<id>/redis-server.log
//! ```

use crate::types::InstanceId;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "redis.conf";
const LOCK_FILE: &str = "lock";
const PID_FILE: &str = "redis-server.pid";
const DATA_DIR: &str = "db";
const LOG_FILE: &str = "redis-server.log";

/// Dump file name redis-server uses when `dbfilename` is not set
pub const DEFAULT_DUMP_FILE: &str = "dump.rdb";

/// Path computations from the configured data and log roots
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    data_root: PathBuf,
    log_root: PathBuf,
}

impl InstanceLayout {
    pub fn new(data_root: impl Into<PathBuf>, log_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            log_root: log_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Directory whose presence defines the instance's existence
    pub fn base_dir(&self, id: &InstanceId) -> PathBuf {
        self.data_root.join(id.as_str())
    }

    /// Directory redis-server persists its dump into
    pub fn data_dir(&self, id: &InstanceId) -> PathBuf {
        self.base_dir(id).join(DATA_DIR)
    }

    pub fn log_dir(&self, id: &InstanceId) -> PathBuf {
        self.log_root.join(id.as_str())
    }

    pub fn log_file_path(&self, id: &InstanceId) -> PathBuf {
        self.log_dir(id).join(LOG_FILE)
    }

    pub fn config_path(&self, id: &InstanceId) -> PathBuf {
        self.base_dir(id).join(CONFIG_FILE)
    }

    pub fn pid_file_path(&self, id: &InstanceId) -> PathBuf {
        self.base_dir(id).join(PID_FILE)
    }

    pub fn lock_file_path(&self, id: &InstanceId) -> PathBuf {
        self.base_dir(id).join(LOCK_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_documented_layout() {
        let layout = InstanceLayout::new("/store/redis", "/log/redis");
        let id = InstanceId::new("abc").unwrap();

        assert_eq!(layout.base_dir(&id), PathBuf::from("/store/redis/abc"));
        assert_eq!(layout.config_path(&id), PathBuf::from("/store/redis/abc/redis.conf"));
        assert_eq!(layout.lock_file_path(&id), PathBuf::from("/store/redis/abc/lock"));
        assert_eq!(
            layout.pid_file_path(&id),
            PathBuf::from("/store/redis/abc/redis-server.pid")
        );
        assert_eq!(layout.data_dir(&id), PathBuf::from("/store/redis/abc/db"));
        assert_eq!(
            layout.log_file_path(&id),
            PathBuf::from("/log/redis/abc/redis-server.log")
        );
    }
}
