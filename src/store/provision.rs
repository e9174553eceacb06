//! Provisioning and destroying the physical store

use crate::error::StoreError;
use crate::model::ObjectModel;
use crate::queue::{spawn_background, CallbackQueue, MainQueue};
use crate::store::{side_files, StoreHandle, StoreLocation, StoreOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TOMBSTONE_SUFFIX: &str = ".destroying";

/// Open or create the store at `location`, blocking the caller
pub fn open_store(
    location: &StoreLocation,
    model: Arc<ObjectModel>,
    options: &StoreOptions,
) -> Result<StoreHandle, StoreError> {
    if let StoreLocation::File(path) = location {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::unable_to_create(path.clone(), e))?;
        }
    }

    let handle = StoreHandle::open(location, model, options)?;
    info!(location = %location.display_path().display(), "store attached");
    Ok(handle)
}

/// Open the store on a background thread and deliver the result on `callback_queue`
pub fn provision_store<F>(
    location: StoreLocation,
    model: Arc<ObjectModel>,
    options: StoreOptions,
    callback_queue: CallbackQueue,
    main: &MainQueue,
    callback: F,
) where
    F: FnOnce(Result<StoreHandle, StoreError>) + Send + 'static,
{
    let main = main.clone();
    spawn_background("store-provision", move || {
        let result = open_store(&location, model, &options);
        callback_queue.deliver(&main, move || callback(result));
    });
}

/// Remove a file-backed store and its journal side files
///
/// The store itself is first renamed to a tombstone so it disappears from `location` in a
/// single step. Any failure to remove it is reported as `StoreNotFoundAt`.
pub fn destroy_store(location: &Path) -> Result<(), StoreError> {
    if !location.exists() {
        return Err(StoreError::StoreNotFoundAt(location.to_path_buf()));
    }

    let tombstone = tombstone_path(location);
    let target = match std::fs::rename(location, &tombstone) {
        Ok(()) => tombstone,
        Err(e) => {
            debug!(location = %location.display(), error = %e, "rename before destroy failed");
            location.to_path_buf()
        }
    };

    remove_path(&target).map_err(|e| {
        warn!(location = %location.display(), error = %e, "failed to destroy store");
        StoreError::StoreNotFoundAt(location.to_path_buf())
    })?;

    for side_file in side_files(location) {
        match remove_path(&side_file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %side_file.display(), error = %e, "failed to remove side file"),
        }
    }

    info!(location = %location.display(), "store destroyed");
    Ok(())
}

fn tombstone_path(location: &Path) -> PathBuf {
    let mut name = location.as_os_str().to_os_string();
    name.push(TOMBSTONE_SUFFIX);
    PathBuf::from(name)
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
