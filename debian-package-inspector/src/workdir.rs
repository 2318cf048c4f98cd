// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-parse working directories.

Every package parse owns exactly one [WorkingDirectory]. It is created with a
unique name under a configurable root and is removed exactly once: either
explicitly via [WorkingDirectory::close()] or when the value is dropped, which
covers error returns and cancelled futures alike.
*/

use {
    crate::error::{InspectError, Result},
    log::{debug, warn},
    std::{
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
};

/// A shared flag signalling that in-flight work should stop.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A uniquely named directory holding an extracted package.
#[derive(Debug)]
pub struct WorkingDirectory {
    path: Option<PathBuf>,
    cancellation: CancellationFlag,
}

impl WorkingDirectory {
    /// Create a new working directory under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("debinspect-")
            .tempdir_in(root)
            .map_err(|e| InspectError::WorkingDirectory(format!("{}", root.display()), e))?;

        let path = dir.into_path();
        debug!("created working directory {}", path.display());

        Ok(Self {
            path: Some(path),
            cancellation: CancellationFlag::default(),
        })
    }

    /// The filesystem path of this directory.
    ///
    /// Only valid until the instance is closed or dropped.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Where the data archive gets unpacked.
    pub fn data_dir(&self) -> PathBuf {
        self.path().join("extracted")
    }

    /// Where the control archive gets unpacked.
    pub fn control_dir(&self) -> PathBuf {
        self.path().join("control")
    }

    /// The cancellation flag tied to this directory's lifetime.
    ///
    /// The flag is raised before the directory is removed.
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    /// Remove the directory now.
    pub fn close(mut self) {
        self.cleanup();
    }

    /// Remove the directory on the blocking thread pool.
    pub async fn close_async(self) {
        if let Err(e) = tokio::task::spawn_blocking(move || self.close()).await {
            warn!("working directory cleanup task failed: {}", e);
        }
    }

    fn cleanup(&mut self) {
        if let Some(path) = self.path.take() {
            self.cancellation.cancel();
            remove_tree(&path);
        }
    }
}

impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Grant the owner read and write access to `path` if it is a file or directory.
///
/// Directories additionally become searchable. Returns whether the mode changed.
pub(crate) fn relax_mode(path: &Path) -> bool {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return false,
    };

    let required = if metadata.is_dir() {
        0o700
    } else if metadata.is_file() {
        0o600
    } else {
        return false;
    };

    let mut permissions = metadata.permissions();
    if permissions.mode() & required == required {
        return false;
    }
    permissions.set_mode(permissions.mode() | required);

    match std::fs::set_permissions(path, permissions) {
        Ok(()) => true,
        Err(e) => {
            debug!("unable to relax mode of {}: {}", path.display(), e);
            false
        }
    }
}

/// Apply [relax_mode()] to everything beneath `root`.
pub(crate) fn make_owner_accessible(root: &Path) {
    // An unsearchable directory hides its children until it is relaxed, so
    // repeat until a pass changes nothing.
    for _ in 0..16 {
        let mut changed = false;

        for entry in walkdir::WalkDir::new(root).follow_links(false) {
            let path = match &entry {
                Ok(entry) => entry.path(),
                Err(e) => match e.path() {
                    Some(path) => path,
                    None => continue,
                },
            };

            changed |= relax_mode(path);
        }

        if !changed {
            break;
        }
    }
}

/// Recursively delete `path`, logging instead of failing.
///
/// Archives can carry read-only directories, so a failed first attempt is
/// retried after making every directory in the tree owner-writable.
pub(crate) fn remove_tree(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("removed working directory {}", path.display());
            return;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            debug!(
                "first removal of {} failed ({}); relaxing permissions",
                path.display(),
                e
            );
        }
    }

    make_owner_accessible(path);

    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!(
            "unable to remove working directory {}: {}",
            path.display(),
            e
        );
    }
}
