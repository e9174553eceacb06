//! Save visibility across the context tree

use crate::integration::test_utils::{construct_blocking, file_config, memory_config, tree};
use serde_json::json;
use street_trees::record::{Attributes, FetchRequest, ObjectId};
use street_trees::trees::Tree;
use street_trees::{ConcurrencyMode, Context, ContextError, PersistenceStack, Predicate};
use tempfile::TempDir;

fn count_trees(context: &Context) -> usize {
    context
        .perform_and_wait(|session| session.count(&FetchRequest::new("Tree")))
        .unwrap()
}

fn seed(stack: &PersistenceStack, species: &str) -> ObjectId {
    let species = species.to_string();
    stack
        .new_child_context(ConcurrencyMode::Private, "seed")
        .perform_and_wait(move |session| {
            let record = session.insert_entity(&tree(&species))?;
            session.save()?;
            Ok::<_, ContextError>(record.id())
        })
        .unwrap()
}

fn species_of(context: &Context, id: ObjectId) -> Option<String> {
    context
        .perform_and_wait(move |session| session.get(id))
        .unwrap()
        .and_then(|record| record.get_str("species").map(str::to_string))
}

#[test]
fn unsaved_worker_changes_stay_private() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    let worker = stack.new_child_context(ConcurrencyMode::Private, "worker");

    worker
        .perform_and_wait(|session| session.insert_entity(&tree("Acer rubrum")))
        .unwrap();

    assert_eq!(count_trees(&worker), 1);
    assert!(worker.perform_and_wait(|session| session.has_changes()));
    assert_eq!(count_trees(&stack.main_context()), 0);
    assert_eq!(count_trees(&stack.persisting_context()), 0);
}

#[test]
fn worker_save_reaches_every_level() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&file_config(&dir)).unwrap();
    let worker = stack.new_child_context(ConcurrencyMode::Private, "worker");

    worker
        .perform_and_wait(|session| {
            session.insert_entity(&tree("Acer rubrum"))?;
            session.save()
        })
        .unwrap();

    assert!(!worker.perform_and_wait(|session| session.has_changes()));
    assert!(!stack.main_context().perform_and_wait(|session| session.has_changes()));
    assert!(!stack
        .persisting_context()
        .perform_and_wait(|session| session.has_changes()));
    assert_eq!(count_trees(&stack.main_context()), 1);
    assert_eq!(count_trees(&stack.persisting_context()), 1);
    assert_eq!(stack.pending_propagations(), 0);
}

#[test]
fn siblings_see_saves_on_their_next_fetch() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    let id = seed(&stack, "Acer rubrum");

    let reader = stack.new_child_context(ConcurrencyMode::Private, "reader");
    assert_eq!(species_of(&reader, id).as_deref(), Some("Acer rubrum"));

    stack
        .new_child_context(ConcurrencyMode::Private, "editor")
        .perform_and_wait(move |session| {
            session.set(id, "species", "Quercus robur")?;
            session.save()
        })
        .unwrap();

    // Registered objects are served locally until the reader fetches again.
    assert_eq!(species_of(&reader, id).as_deref(), Some("Acer rubrum"));
    let fetched = reader
        .perform_and_wait(|session| session.fetch_entities::<Tree>(None))
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].species, "Quercus robur");
    assert_eq!(species_of(&reader, id).as_deref(), Some("Quercus robur"));
}

#[test]
fn pending_edits_survive_a_refresh_and_merge_on_save() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&file_config(&dir)).unwrap();
    let id = seed(&stack, "Acer rubrum");

    let slow = stack.new_child_context(ConcurrencyMode::Private, "slow");
    slow.perform_and_wait(move |session| session.set(id, "address", "1 Main St"))
        .unwrap();

    stack
        .new_child_context(ConcurrencyMode::Private, "fast")
        .perform_and_wait(move |session| {
            session.set(id, "species", "Ulmus americana")?;
            session.save()
        })
        .unwrap();

    let seen = slow
        .perform_and_wait(|session| session.fetch(&FetchRequest::new("Tree")))
        .unwrap();
    assert_eq!(seen[0].get_str("address"), Some("1 Main St"));
    assert_eq!(seen[0].get_str("species"), Some("Acer rubrum"));

    slow.perform_and_wait(|session| session.save()).unwrap();

    let fresh = stack.new_child_context(ConcurrencyMode::Private, "check");
    let record = fresh
        .perform_and_wait(move |session| session.get(id))
        .unwrap()
        .unwrap();
    assert_eq!(record.get_str("species"), Some("Ulmus americana"));
    assert_eq!(record.get_str("address"), Some("1 Main St"));
}

#[test]
fn deletes_propagate_to_the_store() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&file_config(&dir)).unwrap();
    let keep = seed(&stack, "Acer rubrum");
    let doomed = seed(&stack, "Quercus robur");

    stack
        .new_child_context(ConcurrencyMode::Private, "cleanup")
        .perform_and_wait(move |session| {
            session.delete(doomed)?;
            session.save()
        })
        .unwrap();

    let persisting = stack.persisting_context();
    assert_eq!(count_trees(&persisting), 1);
    assert!(persisting
        .perform_and_wait(move |session| session.get(doomed))
        .unwrap()
        .is_none());
    assert_eq!(species_of(&persisting, keep).as_deref(), Some("Acer rubrum"));
}

#[test]
fn invalid_save_is_rejected_before_leaving_the_worker() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    let worker = stack.new_child_context(ConcurrencyMode::Private, "worker");

    let result = worker.perform_and_wait(|session| {
        let mut values = Attributes::new();
        values.insert("species".to_string(), json!("Acer rubrum"));
        session.insert("Tree", values)?;
        session.save()
    });

    match result {
        Err(ContextError::MissingAttribute { entity, attribute }) => {
            assert_eq!(entity, "Tree");
            assert!(attribute == "latitude" || attribute == "longitude");
        }
        other => panic!("expected MissingAttribute, got {other:?}"),
    }
    assert_eq!(count_trees(&stack.main_context()), 0);

    worker.perform_and_wait(|session| session.rollback());
    assert_eq!(count_trees(&worker), 0);
    assert!(!worker.perform_and_wait(|session| session.has_changes()));
}

#[test]
fn filtered_and_sorted_fetches() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    for species in ["Tilia cordata", "Acer rubrum", "Acer campestre"] {
        seed(&stack, species);
    }

    let records = stack
        .main_context()
        .perform_and_wait(|session| {
            let acers = Predicate::new("species starts with Acer", |record| {
                record
                    .get_str("species")
                    .map_or(false, |species| species.starts_with("Acer"))
            });
            session.fetch(
                &FetchRequest::new("Tree")
                    .with_predicate(acers)
                    .sorted_by("species", true),
            )
        })
        .unwrap();
    let species: Vec<_> = records
        .iter()
        .filter_map(|record| record.get_str("species"))
        .collect();
    assert_eq!(species, vec!["Acer campestre", "Acer rubrum"]);
}

#[test]
fn main_queue_can_drive_a_worker_synchronously() {
    let dir = TempDir::new().unwrap();
    let stack = construct_blocking(&memory_config(&dir)).unwrap();
    let worker = stack.new_child_context(ConcurrencyMode::Private, "worker");
    let (tx, rx) = std::sync::mpsc::channel();

    stack.main_queue().perform(move || {
        let saved = worker.perform_and_wait(|session| {
            session.insert_entity(&tree("Acer rubrum"))?;
            session.save()
        });
        let fetched = worker.perform_and_wait(|session| session.fetch_entities::<Tree>(None));
        let _ = tx.send((saved, fetched));
    });

    let (saved, fetched) = rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("main queue is wedged");
    saved.unwrap();
    assert_eq!(fetched.unwrap().len(), 1);
    assert_eq!(count_trees(&stack.persisting_context()), 1);

    let service = street_trees::TreeDataService::new(stack.clone());
    let species = stack.main_queue().perform_and_wait(move || {
        service.import_trees(vec![tree("Quercus robur")])?;
        service.trees()
    });
    let species: Vec<_> = species.unwrap().into_iter().map(|t| t.species).collect();
    assert_eq!(species, vec!["Acer rubrum", "Quercus robur"]);
}
