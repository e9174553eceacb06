//! Store reset for in-memory and file-backed stacks

use crate::integration::test_utils::{
    construct_blocking, file_config, memory_config, tree, wait_until,
};
use parking_lot::Mutex;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use street_trees::model::ObjectModel;
use street_trees::record::FetchRequest;
use street_trees::store::side_files;
use street_trees::trees::{Tree, MODEL_NAME};
use street_trees::{
    CallbackQueue, ChangeFrequency, ConcurrencyMode, Context, ContextError, PersistenceStack,
    StoreError,
};
use tempfile::TempDir;

fn count_trees(context: &Context) -> usize {
    context
        .perform_and_wait(|session| session.count(&FetchRequest::new("Tree")))
        .unwrap()
}

fn import(stack: &PersistenceStack, species: &[&str]) {
    let trees: Vec<Tree> = species.iter().map(|s| tree(s)).collect();
    stack
        .new_child_context(ConcurrencyMode::Private, "import")
        .perform_and_wait(move |session| {
            for tree in &trees {
                session.insert_entity(tree)?;
            }
            session.save()
        })
        .unwrap();
}

fn reset_blocking(stack: &PersistenceStack) -> Result<(), StoreError> {
    let (tx, rx) = mpsc::channel();
    stack.reset_store(CallbackQueue::Background, move |result| {
        let _ = tx.send(result);
    });
    rx.recv_timeout(Duration::from_secs(10))
        .expect("reset timed out")
}

#[test]
fn in_memory_reset_yields_a_usable_empty_store() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    import(&stack, &["Acer rubrum", "Quercus robur"]);
    let old_main = stack.main_context();
    assert_eq!(count_trees(&old_main), 2);

    reset_blocking(&stack).unwrap();

    let main = stack.main_context();
    assert!(!main.same_context(&old_main));
    assert_eq!(count_trees(&main), 0);

    let species: Vec<String> = (0..25).map(|i| format!("Species {i:02}")).collect();
    let refs: Vec<&str> = species.iter().map(String::as_str).collect();
    import(&stack, &refs);

    let read_back = main
        .perform_and_wait(|session| {
            session.fetch(&FetchRequest::new("Tree").sorted_by("species", true))
        })
        .unwrap();
    let read_species: Vec<String> = read_back
        .iter()
        .filter_map(|record| record.get_str("species").map(str::to_string))
        .collect();
    assert_eq!(read_species, species);
}

#[test]
fn reset_waits_for_in_flight_saves() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let saved_events = events.clone();
    let _saved = stack
        .persisting_context()
        .observe(ChangeFrequency::SaveOnly, move |_| {
            saved_events.lock().push("saved");
        });

    stack.main_context();
    let worker = stack.new_child_context(ConcurrencyMode::Private, "slow-worker");

    // Hold the main queue so the worker's save stalls between levels.
    stack
        .main_queue()
        .perform(|| thread::sleep(Duration::from_millis(300)));
    let saver = thread::spawn(move || {
        worker.perform_and_wait(|session| {
            session.insert_entity(&tree("Acer rubrum"))?;
            session.save()
        })
    });

    assert!(wait_until(Duration::from_secs(5), || stack
        .pending_propagations()
        > 0));

    let (tx, rx) = mpsc::channel();
    let reset_events = events.clone();
    stack.reset_store(CallbackQueue::Background, move |result| {
        reset_events.lock().push("reset");
        let _ = tx.send(result);
    });

    rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    saver.join().unwrap().unwrap();

    assert_eq!(*events.lock(), vec!["saved", "reset"]);
    assert_eq!(stack.pending_propagations(), 0);
    assert_eq!(count_trees(&stack.main_context()), 0);
}

#[test]
fn file_reset_removes_store_and_side_files() {
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir);
    let store_path = dir.path().join("StreetTrees.sqlite");
    let stack = construct_blocking(&config).unwrap();
    import(&stack, &["Acer rubrum", "Quercus robur", "Tilia cordata"]);

    for side in side_files(&store_path) {
        std::fs::write(&side, b"journal").unwrap();
    }

    reset_blocking(&stack).unwrap();

    for side in side_files(&store_path) {
        assert!(!side.exists(), "{} should be gone", side.display());
    }
    assert!(store_path.exists());
    assert!(stack.is_store_attached());
    assert_eq!(count_trees(&stack.main_context()), 0);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".destroying"))
        .collect();
    assert!(leftovers.is_empty(), "tombstones left behind: {leftovers:?}");

    import(&stack, &["Ginkgo biloba"]);
    drop(stack);
    let reopened = construct_blocking(&config).unwrap();
    assert_eq!(count_trees(&reopened.main_context()), 1);
}

#[test]
fn file_reset_of_a_vanished_store_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("StreetTrees.sqlite");
    let stack = construct_blocking(&file_config(&dir)).unwrap();

    std::fs::remove_dir_all(&store_path).unwrap();

    match reset_blocking(&stack) {
        Err(StoreError::StoreNotFoundAt(path)) => assert_eq!(path, store_path),
        other => panic!("expected StoreNotFoundAt, got {other:?}"),
    }
    assert!(!stack.is_store_attached());

    reset_blocking(&stack).unwrap();
    assert!(stack.is_store_attached());
    assert!(store_path.exists());
    import(&stack, &["Ginkgo biloba"]);
    assert_eq!(count_trees(&stack.main_context()), 1);
}

#[test]
fn failed_parent_save_is_reported_and_retried() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("StreetTrees.sqlite");
    let stack = construct_blocking(&file_config(&dir)).unwrap();
    let main = stack.main_context();
    let persisting = stack.persisting_context();
    let worker = stack.new_child_context(ConcurrencyMode::Private, "worker");

    std::fs::remove_dir_all(&store_path).unwrap();
    assert!(reset_blocking(&stack).is_err());

    let result = worker.perform_and_wait(|session| {
        session.insert_entity(&tree("Acer rubrum"))?;
        session.save()
    });
    match result {
        Err(ContextError::Propagation { parent, source }) => {
            assert_eq!(parent, "main");
            match *source {
                ContextError::Propagation { parent, source } => {
                    assert_eq!(parent, "persisting");
                    assert!(matches!(
                        *source,
                        ContextError::Store(StoreError::StoreUnavailable)
                    ));
                }
                other => panic!("expected a failed persisting save, got {other:?}"),
            }
        }
        other => panic!("expected Propagation, got {other:?}"),
    }
    assert!(!worker.perform_and_wait(|session| session.has_changes()));
    assert!(!main.perform_and_wait(|session| session.has_changes()));
    assert!(persisting.perform_and_wait(|session| session.has_changes()));
    assert_eq!(stack.pending_propagations(), 0);

    // Saving again retries the broken chain even though the worker has nothing new.
    assert!(matches!(
        worker.perform_and_wait(|session| session.save()),
        Err(ContextError::Propagation { .. })
    ));

    reset_blocking(&stack).unwrap();
    worker.perform_and_wait(|session| session.save()).unwrap();
    assert!(!persisting.perform_and_wait(|session| session.has_changes()));
    assert_eq!(count_trees(&stack.main_context()), 1);
    worker.perform_and_wait(|session| session.save()).unwrap();
}

#[test]
fn reset_reloads_the_model_first() {
    let dir = TempDir::new().unwrap();
    let config = memory_config(&dir);
    let stack = construct_blocking(&config).unwrap();
    import(&stack, &["Acer rubrum"]);

    std::fs::remove_file(ObjectModel::bundle_path(&config.bundle_dir, MODEL_NAME)).unwrap();

    match reset_blocking(&stack) {
        Err(StoreError::UnableToCreateStoreAt { .. }) => {}
        other => panic!("expected UnableToCreateStoreAt, got {other:?}"),
    }
    assert!(stack.is_store_attached());
    assert_eq!(count_trees(&stack.main_context()), 1);
}

#[tokio::test]
async fn concurrent_resets_are_serialized() {
    let dir = TempDir::new().unwrap();
    let stack = PersistenceStack::open(&file_config(&dir)).await.unwrap();
    import(&stack, &["Acer rubrum"]);

    let (first, second) = tokio::join!(stack.reset(), stack.reset());
    first.unwrap();
    second.unwrap();

    assert!(stack.is_store_attached());
    assert_eq!(count_trees(&stack.main_context()), 0);
}
