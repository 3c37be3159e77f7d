//! Recursive discovery of configuration artifacts.
//!
//! Every regular file below the root is an artifact; special files such as
//! sockets are ignored. Files directly inside a
//! subdirectory are grouped under that subdirectory's name (the parent id),
//! which handlers use as the owner of the artifact.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

/// Artifacts discovered below one root.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Whether the root directory could be opened.
    pub found: bool,
    /// Discovered artifacts in discovery order.
    pub backlog: Vec<PathBuf>,
    /// Artifact path to the name of its immediate containing directory.
    pub parents: HashMap<PathBuf, String>,
}

/// Walk `root`, collecting every file for which `skip` returns false.
///
/// A root that cannot be opened yields `found == false` rather than an error.
/// An entry whose metadata cannot be read stops the scan of its directory
/// level; siblings already collected and other branches are kept.
pub fn scan(root: &Path, skip: impl Fn(&Path) -> bool) -> ScanResult {
    let mut result = ScanResult::default();
    result.found = scan_dir("", root, &skip, &mut result);
    result
}

fn scan_dir(
    parent: &str,
    directory: &Path,
    skip: &dyn Fn(&Path) -> bool,
    result: &mut ScanResult,
) -> bool {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                directory = %directory.display(),
                parent = %parent,
                error = %e,
                "Failed to open directory"
            );
            return false;
        }
    };

    debug!(directory = %directory.display(), parent = %parent, "Reading artifacts");

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                error!(directory = %directory.display(), error = %e, "Failed to read directory entry");
                break;
            }
        };

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to get file information");
                break;
            }
        };

        if metadata.is_dir() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            scan_dir(&name, &path, skip, result);
            continue;
        }

        if !metadata.is_file() {
            debug!(path = %path.display(), "Skipping entry - not a regular file");
            continue;
        }

        if skip(&path) {
            debug!(artifact = %path.display(), "Skipping artifact - already applied");
            continue;
        }

        debug!(artifact = %path.display(), "Found artifact");
        if !parent.is_empty() {
            result.parents.insert(path.clone(), parent.to_string());
        }
        result.backlog.push(path);
    }

    true
}
