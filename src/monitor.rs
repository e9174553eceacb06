//! Entity change monitoring
//!
//! An `EntityMonitor` watches one context for changes to one entity, optionally narrowed by a
//! predicate, and reports the matching inserted, deleted and modified objects to an observer.

use crate::context::{ChangeFrequency, ChangeNotification, Context, Subscription};
use crate::record::{Entity, Predicate, Record};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Receives the objects a monitor matched; each method is called only with a non-empty set
#[allow(unused_variables)]
pub trait EntityObserver<T>: Send + Sync {
    fn inserted(&self, objects: Vec<T>) {}

    fn deleted(&self, objects: Vec<T>) {}

    fn modified(&self, objects: Vec<T>) {}
}

/// Filtered observer over a single context
///
/// Callbacks run on the monitored context's queue. Dropping the monitor unsubscribes.
pub struct EntityMonitor<T: Entity> {
    filter: Predicate,
    frequency: ChangeFrequency,
    _subscription: Subscription,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityMonitor<T> {
    pub fn new(
        context: &Context,
        predicate: Option<Predicate>,
        frequency: ChangeFrequency,
        observer: Arc<dyn EntityObserver<T>>,
    ) -> Self {
        let entity_filter = Predicate::entity_is(T::ENTITY_NAME);
        let filter = match predicate {
            Some(refinement) => entity_filter.and(refinement),
            None => entity_filter,
        };

        let handler_filter = filter.clone();
        let subscription = context.observe(frequency, move |notification| {
            deliver::<T>(&handler_filter, observer.as_ref(), notification);
        });

        Self {
            filter,
            frequency,
            _subscription: subscription,
            _entity: PhantomData,
        }
    }

    pub fn filter(&self) -> &Predicate {
        &self.filter
    }

    pub fn frequency(&self) -> ChangeFrequency {
        self.frequency
    }
}

fn deliver<T: Entity>(
    filter: &Predicate,
    observer: &dyn EntityObserver<T>,
    notification: &ChangeNotification,
) {
    let matched = notification.delta.filter(filter);

    let inserted = convert::<T>(&matched.inserted);
    if !inserted.is_empty() {
        observer.inserted(inserted);
    }
    let deleted = convert::<T>(&matched.deleted);
    if !deleted.is_empty() {
        observer.deleted(deleted);
    }
    let modified = convert::<T>(&matched.updated);
    if !modified.is_empty() {
        observer.modified(modified);
    }
}

fn convert<T: Entity>(records: &[Record]) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| match T::from_record(record) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    entity = T::ENTITY_NAME,
                    id = %record.id(),
                    error = %e,
                    "skipping record that does not convert"
                );
                None
            }
        })
        .collect()
}
