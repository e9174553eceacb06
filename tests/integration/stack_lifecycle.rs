//! Stack construction, root contexts, child contexts and batch contexts

use crate::integration::test_utils::{construct_blocking, file_config, memory_config, tree};
use std::sync::mpsc;
use std::time::Duration;
use street_trees::config::StackConfig;
use street_trees::record::FetchRequest;
use street_trees::trees::Tree;
use street_trees::{
    CallbackQueue, ConcurrencyMode, MainQueue, PersistenceStack, StoreError, StoreLocation,
};
use tempfile::TempDir;

#[test]
fn construct_builds_the_context_tree() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let stack = construct_blocking(&config).unwrap();

    let persisting = stack.persisting_context();
    let main = stack.main_context();
    assert_eq!(persisting.mode(), ConcurrencyMode::Private);
    assert_eq!(persisting.parent_label(), None);
    assert_eq!(main.mode(), ConcurrencyMode::MainQueue);
    assert_eq!(main.parent_label(), Some("persisting"));
    assert!(main.same_context(&stack.main_context()));

    let worker = stack.new_child_context(ConcurrencyMode::Private, "worker");
    assert_eq!(worker.parent_label(), Some("main"));
    assert!(!worker.same_context(&stack.new_child_context(ConcurrencyMode::Private, "worker")));

    assert_eq!(
        stack.store_location(),
        &StoreLocation::File(dir.path().join("StreetTrees.sqlite"))
    );
    assert!(dir.path().join("StreetTrees.sqlite").exists());
}

#[test]
fn construct_creates_missing_parent_directories() {
    let dir = TempDir::new().unwrap();
    let config = StackConfig {
        store_path: Some(dir.path().join("nested").join("deeper").join("trees.sqlite")),
        ..file_config(&dir)
    };
    let stack = construct_blocking(&config).unwrap();
    assert!(stack.is_store_attached());
    assert!(dir.path().join("nested").join("deeper").join("trees.sqlite").exists());
}

#[test]
fn construct_reports_unusable_location() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let config = StackConfig {
        store_path: Some(blocker.join("trees.sqlite")),
        ..file_config(&dir)
    };

    match construct_blocking(&config) {
        Err(StoreError::UnableToCreateStoreAt { location, .. }) => {
            assert_eq!(location, blocker.join("trees.sqlite"));
        }
        other => panic!("expected UnableToCreateStoreAt, got {other:?}"),
    }
}

#[test]
#[should_panic(expected = "could not be loaded")]
fn construct_without_model_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = StackConfig {
        bundle_dir: dir.path().join("no-models-here"),
        store_path: Some(dir.path().join("StreetTrees.sqlite")),
        ..StackConfig::default()
    };
    PersistenceStack::construct(&config, CallbackQueue::Background, |_| {});
}

#[test]
fn construct_delivers_on_the_main_queue() {
    let dir = TempDir::new().unwrap();
    let config = memory_config(&dir);
    let main = MainQueue::spawn();
    let main_handle = main.clone();
    let (tx, rx) = mpsc::channel();

    PersistenceStack::construct_on(&config, main, CallbackQueue::Main, move |result| {
        let _ = tx.send((main_handle.is_current(), result.is_ok()));
    });

    let (on_main, ok) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(on_main);
    assert!(ok);
}

#[test]
fn saved_data_survives_reopening_a_file_store() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    {
        let stack = construct_blocking(&config).unwrap();
        let worker = stack.new_child_context(ConcurrencyMode::Private, "import");
        worker
            .perform_and_wait(|session| {
                session.insert_entity(&tree("Ginkgo biloba"))?;
                session.insert_entity(&tree("Tilia cordata"))?;
                session.save()
            })
            .unwrap();
    }

    let stack = construct_blocking(&config).unwrap();
    let mut species: Vec<String> = stack
        .main_context()
        .perform_and_wait(|session| session.fetch_entities::<Tree>(None))
        .unwrap()
        .into_iter()
        .map(|tree| tree.species)
        .collect();
    species.sort();
    assert_eq!(species, vec!["Ginkgo biloba", "Tilia cordata"]);
}

#[test]
#[should_panic(expected = "requested off the main queue")]
fn main_queue_child_off_the_main_queue_is_fatal() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    stack.new_child_context(ConcurrencyMode::MainQueue, "editor");
}

#[test]
fn main_queue_child_on_the_main_queue() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    let builder = stack.clone();
    let editor = stack
        .main_queue()
        .perform_and_wait(move || builder.new_child_context(ConcurrencyMode::MainQueue, "editor"));

    assert_eq!(editor.mode(), ConcurrencyMode::MainQueue);
    assert_eq!(editor.parent_label(), Some("main"));
    editor
        .perform_and_wait(|session| {
            session.insert_entity(&tree("Acer campestre"))?;
            session.save()
        })
        .unwrap();
    let count = stack
        .persisting_context()
        .perform_and_wait(|session| session.count(&FetchRequest::new("Tree")))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
#[allow(deprecated)]
fn background_worker_context_is_a_private_child_of_main() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    let worker = stack.new_background_worker_context();
    assert_eq!(worker.mode(), ConcurrencyMode::Private);
    assert_eq!(worker.parent_label(), Some("main"));
}

#[tokio::test]
async fn open_provisions_asynchronously() {
    let dir = TempDir::new().unwrap();
    let stack = PersistenceStack::open(&file_config(&dir)).await.unwrap();
    assert!(stack.is_store_attached());
    assert_eq!(stack.model().name, "StreetTrees");
}

#[tokio::test]
async fn batch_context_shares_a_file_store() {
    let dir = TempDir::new().unwrap();
    let stack = PersistenceStack::open(&file_config(&dir)).await.unwrap();
    stack
        .new_child_context(ConcurrencyMode::Private, "import")
        .perform_and_wait(|session| {
            session.insert_entity(&tree("Fagus sylvatica"))?;
            session.save()
        })
        .unwrap();

    let batch = stack.batch_context().await.unwrap();
    assert_eq!(batch.parent_label(), None);
    let count = batch
        .perform_and_wait(|session| session.count(&FetchRequest::new("Tree")))
        .unwrap();
    assert_eq!(count, 1);

    // Batch saves land in the store but the main context only sees them on its next fetch.
    batch
        .perform_and_wait(|session| {
            session.insert_entity(&tree("Betula pendula"))?;
            session.save()
        })
        .unwrap();
    let count = stack
        .main_context()
        .perform_and_wait(|session| session.count(&FetchRequest::new("Tree")))
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn batch_context_on_an_in_memory_stack_starts_empty() {
    let dir = TempDir::new().unwrap();
    let stack = PersistenceStack::open(&memory_config(&dir)).await.unwrap();
    stack
        .new_child_context(ConcurrencyMode::Private, "import")
        .perform_and_wait(|session| {
            session.insert_entity(&tree("Fagus sylvatica"))?;
            session.save()
        })
        .unwrap();

    let batch = stack.batch_context().await.unwrap();
    let count = batch
        .perform_and_wait(|session| session.count(&FetchRequest::new("Tree")))
        .unwrap();
    assert_eq!(count, 0);
}
