//! Timestamp-based completion cache.
//!
//! A stamp file per artifact records "applied as of": its modification time
//! is set one second past the artifact's own, so a later stat comparison is
//! unambiguous even on filesystems with coarse timestamps. Stamps live flat
//! under the stamp directory, named by [`stamp_name`].
//!
//! Cache operations never fail the caller. A stamp that cannot be written
//! only means the artifact is applied again on the next pass.

use std::fs::{self, FileTimes, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, error, warn};

use crate::artifact::stamp_name;
use crate::config::CacheConfig;

/// Offset added to the artifact's mtime when stamping.
pub const STAMP_OFFSET: Duration = Duration::from_secs(1);

/// Filesystem store of per-artifact completion stamps.
#[derive(Debug, Clone)]
pub struct StampCache {
    cache_dir: PathBuf,
    stamp_dir: PathBuf,
}

impl StampCache {
    pub fn new(cache_dir: impl Into<PathBuf>, stamp_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            stamp_dir: stamp_dir.into(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.dir, &config.stamp_dir)
    }

    pub fn stamp_dir(&self) -> &Path {
        &self.stamp_dir
    }

    /// Create the cache and stamp directories. Idempotent.
    pub fn init_dirs(&self) {
        for dir in [&self.cache_dir, &self.stamp_dir] {
            match fs::create_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => warn!(
                    directory = %dir.display(),
                    error = %e,
                    "Failed to create cache directory"
                ),
            }
        }
    }

    /// Location of the stamp for an artifact.
    pub fn stamp_path(&self, artifact: &Path) -> PathBuf {
        self.stamp_dir.join(stamp_name(artifact))
    }

    /// True iff a stamp exists and is at least as new as the artifact.
    ///
    /// A missing stamp or an artifact that cannot be stat'ed reads as stale.
    pub fn is_fresh(&self, artifact: &Path) -> bool {
        let stamp = self.stamp_path(artifact);
        let Ok(stamp_time) = modified(&stamp) else {
            return false;
        };
        let Ok(artifact_time) = modified(artifact) else {
            return false;
        };

        debug!(
            artifact = %artifact.display(),
            stamp = %stamp.display(),
            "Artifact may already be applied - stamp exists"
        );
        stamp_time >= artifact_time
    }

    /// Create or refresh the stamp for an artifact.
    pub fn stamp(&self, artifact: &Path) {
        debug!(artifact = %artifact.display(), "Attempting to mark as applied");

        let stamp_time = match modified(artifact) {
            Ok(time) => time + STAMP_OFFSET,
            Err(e) => {
                warn!(
                    artifact = %artifact.display(),
                    error = %e,
                    "Using current time as timestamp - couldn't get timestamp of artifact"
                );
                SystemTime::now()
            }
        };

        let stamp = self.stamp_path(artifact);
        let file = match OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&stamp)
        {
            Ok(file) => file,
            Err(e) => {
                error!(
                    artifact = %artifact.display(),
                    error = %e,
                    "Failed to mark artifact as applied"
                );
                return;
            }
        };

        if let Err(e) = file.set_times(FileTimes::new().set_modified(stamp_time)) {
            drop(file);
            let _ = fs::remove_file(&stamp);
            error!(
                artifact = %artifact.display(),
                error = %e,
                "Failed to create applied stamp (timestamp change failed)"
            );
        } else {
            debug!(
                artifact = %artifact.display(),
                stamp = %stamp.display(),
                "Marked as applied"
            );
        }
    }

    /// Delete the stamp for an artifact.
    pub fn erase(&self, artifact: &Path) {
        let stamp = self.stamp_path(artifact);
        match fs::remove_file(&stamp) {
            Ok(()) => debug!(artifact = %artifact.display(), "Removed applied stamp"),
            Err(e) => warn!(
                artifact = %artifact.display(),
                stamp = %stamp.display(),
                error = %e,
                "Failed to remove applied stamp"
            ),
        }
    }
}

fn modified(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}
