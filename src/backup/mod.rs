//! Point-in-time backups of running instances

mod redis;

pub use self::redis::RedisSnapshotter;

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Handle to one completed backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backup file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Produces a consistent backup artifact from one live instance
///
/// Implementations do not retry; a failed snapshot is reported and the
/// caller decides whether to try again.
pub trait Snapshotter {
    fn snapshot(&self) -> Result<Artifact>;
}
