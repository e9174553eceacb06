//! Shared test utilities for integration tests
//!
//! Builds stacks over temporary bundles and stores, and provides a blocking constructor so
//! tests can use the callback API without an async runtime.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use street_trees::config::StackConfig;
use street_trees::model::ObjectModel;
use street_trees::trees::{street_trees_model, Tree, MODEL_NAME};
use street_trees::{CallbackQueue, PersistenceStack, StoreError};
use tempfile::TempDir;

/// Write the Street Trees model into `<dir>/models` and return that bundle directory
pub fn write_bundle(dir: &Path) -> PathBuf {
    let bundle = dir.join("models");
    std::fs::create_dir_all(&bundle).unwrap();
    std::fs::write(
        ObjectModel::bundle_path(&bundle, MODEL_NAME),
        street_trees_model().to_toml().unwrap(),
    )
    .unwrap();
    bundle
}

/// Configuration for a file-backed store inside `dir`
pub fn file_config(dir: &TempDir) -> StackConfig {
    StackConfig {
        bundle_dir: write_bundle(dir.path()),
        store_path: Some(dir.path().join("StreetTrees.sqlite")),
        ..StackConfig::default()
    }
}

/// Configuration for an in-memory store whose model lives in `dir`
pub fn memory_config(dir: &TempDir) -> StackConfig {
    StackConfig {
        bundle_dir: write_bundle(dir.path()),
        in_memory: true,
        ..StackConfig::default()
    }
}

/// Construct a stack and block until its store is provisioned
pub fn construct_blocking(config: &StackConfig) -> Result<PersistenceStack, StoreError> {
    let (tx, rx) = mpsc::channel();
    PersistenceStack::construct(config, CallbackQueue::Background, move |result| {
        let _ = tx.send(result);
    });
    rx.recv_timeout(Duration::from_secs(10))
        .expect("store provisioning timed out")
}

pub fn tree(species: &str) -> Tree {
    Tree {
        species: species.to_string(),
        latitude: 49.2827,
        longitude: -123.1207,
        address: None,
        planted_on: None,
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
