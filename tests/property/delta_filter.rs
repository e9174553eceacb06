//! Property-based tests for notification delta filtering

use proptest::prelude::*;
use serde_json::json;
use street_trees::context::RecordDelta;
use street_trees::record::{Attributes, ObjectId, Record};
use street_trees::Predicate;

const SPECIES: [&str; 4] = ["Acer rubrum", "Quercus robur", "Tilia cordata", "Ulmus americana"];

fn records(entity: &'static str, picks: Vec<usize>) -> Vec<Record> {
    picks
        .into_iter()
        .map(|pick| {
            let mut attributes = Attributes::new();
            attributes.insert("species".to_string(), json!(SPECIES[pick]));
            Record::new(ObjectId::new(), entity, attributes)
        })
        .collect()
}

fn picks() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..SPECIES.len(), 0..12)
}

fn entity() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("Tree"), Just("TreeDescription")]
}

fn delta() -> impl Strategy<Value = RecordDelta> {
    (entity(), picks(), picks(), picks()).prop_map(|(entity, inserted, updated, deleted)| {
        RecordDelta {
            inserted: records(entity, inserted),
            updated: records(entity, updated),
            deleted: records(entity, deleted),
        }
    })
}

proptest! {
    /// A predicate and its negation split every set of a delta without loss
    #[test]
    fn filter_partitions_each_set(delta in delta(), pick in 0..SPECIES.len()) {
        let predicate = Predicate::entity_is("Tree")
            .and(Predicate::attribute_equals("species", SPECIES[pick]));
        let kept = delta.filter(&predicate);
        let rest = delta.filter(&predicate.clone().not());

        prop_assert_eq!(kept.inserted.len() + rest.inserted.len(), delta.inserted.len());
        prop_assert_eq!(kept.updated.len() + rest.updated.len(), delta.updated.len());
        prop_assert_eq!(kept.deleted.len() + rest.deleted.len(), delta.deleted.len());
        prop_assert_eq!(kept.len() + rest.len(), delta.len());

        for record in kept.inserted.iter().chain(&kept.updated).chain(&kept.deleted) {
            prop_assert!(predicate.evaluate(record));
            prop_assert_eq!(record.entity(), "Tree");
        }
        for record in rest.inserted.iter().chain(&rest.updated).chain(&rest.deleted) {
            prop_assert!(!predicate.evaluate(record));
        }
    }

    /// Filtering twice with the same predicate changes nothing
    #[test]
    fn filter_is_idempotent(delta in delta(), pick in 0..SPECIES.len()) {
        let predicate = Predicate::attribute_equals("species", SPECIES[pick]);
        let once = delta.filter(&predicate);
        prop_assert_eq!(once.filter(&predicate), once);
    }
}
