//! Context domain: unit-of-work scopes over the backing store.
//! Each context owns a serial queue, a change log and a parent it saves through.

pub mod changes;
pub mod notify;

pub use changes::{ChangeSet, PendingUpdate, RecordDelta};
pub use notify::{ChangeFrequency, ChangeNotification, NotificationKind, Subscription};

use crate::error::ContextError;
use crate::model::ObjectModel;
use crate::queue::SerialQueue;
use crate::record::{Attributes, Entity, FetchRequest, ObjectId, Predicate, Record};
use crate::stack::propagation::SavePropagator;
use crate::store::{ApplyOutcome, StoreSlot};
use changes::ChangeLog;
use notify::ObserverRegistry;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which queue a context's work runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// A private serial queue owned by the context
    Private,
    /// The stack's main queue
    MainQueue,
}

/// What a context saves into
#[derive(Clone)]
pub(crate) enum Parent {
    Store(Arc<StoreSlot>),
    Context(Context),
}

struct ContextInner {
    label: String,
    mode: ConcurrencyMode,
    queue: SerialQueue,
    parent: Parent,
    model: Arc<ObjectModel>,
    log: Mutex<ChangeLog>,
    observers: Arc<ObserverRegistry>,
    propagator: Option<Arc<SavePropagator>>,
    /// Last save reached the parent but the parent's own save failed
    unpropagated: AtomicBool,
}

/// Handle to a managed-object context; clones refer to the same context
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn new(
        label: impl Into<String>,
        mode: ConcurrencyMode,
        queue: SerialQueue,
        parent: Parent,
        model: Arc<ObjectModel>,
        propagator: Option<Arc<SavePropagator>>,
    ) -> Self {
        let label = label.into();
        debug!(context = %label, queue = %queue.label(), ?mode, "context created");
        Self {
            inner: Arc::new(ContextInner {
                label,
                mode,
                queue,
                parent,
                model,
                log: Mutex::new(ChangeLog::default()),
                observers: Arc::new(ObserverRegistry::default()),
                propagator,
                unpropagated: AtomicBool::new(false),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.inner.mode
    }

    pub fn queue(&self) -> &SerialQueue {
        &self.inner.queue
    }

    pub fn model(&self) -> &Arc<ObjectModel> {
        &self.inner.model
    }

    /// Label of the parent context, `None` when this context saves to a store
    pub fn parent_label(&self) -> Option<&str> {
        match &self.inner.parent {
            Parent::Context(parent) => Some(parent.label()),
            Parent::Store(_) => None,
        }
    }

    /// Whether both handles refer to the same context
    pub fn same_context(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Enqueue a unit of work and return immediately
    pub fn perform<F>(&self, work: F)
    where
        F: FnOnce(&mut Session<'_>) + Send + 'static,
    {
        let context = self.clone();
        self.inner.queue.perform(move || context.run(work));
    }

    /// Run a unit of work on this context's queue and wait for its result
    pub fn perform_and_wait<F, R>(&self, work: F) -> R
    where
        F: FnOnce(&mut Session<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let context = self.clone();
        self.inner.queue.perform_and_wait(move || context.run(work))
    }

    /// Subscribe to this context's notifications
    ///
    /// Handlers run on the context's queue.
    pub fn observe<F>(&self, frequency: ChangeFrequency, handler: F) -> Subscription
    where
        F: Fn(&ChangeNotification) + Send + Sync + 'static,
    {
        let id = self
            .inner
            .observers
            .subscribe(frequency.kind(), Arc::new(handler));
        Subscription::new(&self.inner.observers, id)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    fn run<R>(&self, work: impl FnOnce(&mut Session<'_>) -> R) -> R {
        let mut session = Session { context: self };
        let result = work(&mut session);
        self.process_pending_changes();
        result
    }

    fn process_pending_changes(&self) {
        let delta = self.inner.log.lock().take_unprocessed();
        if !delta.is_empty() {
            self.post(NotificationKind::ObjectsDidChange, delta);
        }
    }

    fn post(&self, kind: NotificationKind, delta: RecordDelta) {
        self.inner.observers.dispatch(&ChangeNotification {
            kind,
            context: self.inner.label.clone(),
            delta,
        });
    }

    fn parent_records(&self, entity: &str) -> Result<Vec<Record>, ContextError> {
        match &self.inner.parent {
            Parent::Store(slot) => Ok(slot.get()?.fetch_entity(entity)?),
            Parent::Context(parent) => {
                let entity = entity.to_string();
                parent.perform_and_wait(move |session| session.visible_records(&entity))
            }
        }
    }

    fn parent_get(&self, id: ObjectId) -> Result<Option<Record>, ContextError> {
        match &self.inner.parent {
            Parent::Store(slot) => Ok(slot.get()?.get(id)?),
            Parent::Context(parent) => parent.perform_and_wait(move |session| session.visible_get(id)),
        }
    }

    fn save_changes(&self) -> Result<(), ContextError> {
        self.process_pending_changes();
        let propagator = match &self.inner.parent {
            Parent::Context(parent) => self.inner.propagator.as_ref().map(|p| (p, parent)),
            Parent::Store(_) => None,
        };
        let changes = {
            let log = self.inner.log.lock();
            log.has_changes().then(|| log.pending_changes())
        };
        let Some(changes) = changes else {
            return match propagator {
                Some((propagator, parent)) if self.inner.unpropagated.load(Ordering::Acquire) => {
                    debug!(context = %self.inner.label, "retrying failed propagation");
                    let _in_flight = propagator.begin();
                    self.propagate(propagator, parent)
                }
                _ => Ok(()),
            };
        };

        for record in changes
            .inserted
            .iter()
            .chain(changes.updated.iter().map(|update| &update.current))
        {
            self.inner
                .model
                .validate_for_save(record.entity(), record.attributes())?;
        }

        let _in_flight = propagator.map(|(p, _)| p.begin());

        let outcome = match &self.inner.parent {
            Parent::Store(slot) => {
                let store = slot.get()?;
                let outcome = store.apply(&changes)?;
                store.flush()?;
                outcome
            }
            Parent::Context(parent) => {
                let pushed = changes.clone();
                parent.perform_and_wait(move |session| session.absorb(pushed))?
            }
        };

        let inserted_ids: HashSet<ObjectId> = changes.inserted.iter().map(Record::id).collect();
        let (inserted, updated): (Vec<Record>, Vec<Record>) = outcome
            .resolved
            .iter()
            .cloned()
            .partition(|record| inserted_ids.contains(&record.id()));
        if !outcome.vanished.is_empty() {
            warn!(
                context = %self.inner.label,
                count = outcome.vanished.len(),
                "updated objects were deleted before the save reached them"
            );
        }
        self.inner.log.lock().commit(&outcome);
        debug!(
            context = %self.inner.label,
            inserted = inserted.len(),
            updated = updated.len(),
            deleted = changes.deleted.len(),
            "context saved"
        );
        self.post(
            NotificationKind::DidSave,
            RecordDelta {
                inserted,
                updated,
                deleted: changes.deleted,
            },
        );

        if let Some((propagator, parent)) = propagator {
            self.propagate(propagator, parent)?;
        }
        Ok(())
    }

    fn propagate(&self, propagator: &SavePropagator, parent: &Context) -> Result<(), ContextError> {
        let result = propagator.propagate(&self.inner.label, parent);
        self.inner
            .unpropagated
            .store(result.is_err(), Ordering::Release);
        result
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("label", &self.inner.label)
            .field("mode", &self.inner.mode)
            .field("parent", &self.parent_label())
            .finish()
    }
}

/// Access to a context from inside one of its units of work
pub struct Session<'a> {
    context: &'a Context,
}

impl<'a> Session<'a> {
    pub fn context(&self) -> &Context {
        self.context
    }

    fn model(&self) -> &ObjectModel {
        &self.context.inner.model
    }

    /// Insert a new record; unspecified attributes take their defaults
    pub fn insert(&mut self, entity: &str, values: Attributes) -> Result<Record, ContextError> {
        let attributes = self.model().initial_attributes(entity, values)?;
        let record = Record::new(ObjectId::new(), entity, attributes);
        self.context.inner.log.lock().insert(record.clone());
        Ok(record)
    }

    pub fn insert_entity<T: Entity>(&mut self, value: &T) -> Result<Record, ContextError> {
        self.insert(T::ENTITY_NAME, value.to_attributes())
    }

    /// Overwrite the given attributes of an existing record
    pub fn update(&mut self, id: ObjectId, values: Attributes) -> Result<Record, ContextError> {
        let mut record = self.get(id)?.ok_or(ContextError::ObjectNotFound(id))?;
        self.model().check_values(record.entity(), &values)?;
        for (key, value) in values {
            record.attributes_mut().insert(key, value);
        }
        if !self.context.inner.log.lock().update(record.clone()) {
            return Err(ContextError::ObjectNotFound(id));
        }
        Ok(record)
    }

    pub fn set(
        &mut self,
        id: ObjectId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<Record, ContextError> {
        let mut values = Attributes::new();
        values.insert(attribute.to_string(), value.into());
        self.update(id, values)
    }

    pub fn delete(&mut self, id: ObjectId) -> Result<(), ContextError> {
        if self.get(id)?.is_none() || !self.context.inner.log.lock().delete(id) {
            return Err(ContextError::ObjectNotFound(id));
        }
        Ok(())
    }

    /// Look a record up by id
    ///
    /// A record already registered in this context is returned as this context sees it, without
    /// consulting the parent.
    pub fn get(&mut self, id: ObjectId) -> Result<Option<Record>, ContextError> {
        {
            let log = self.context.inner.log.lock();
            if log.is_deleted(&id) {
                return Ok(None);
            }
            if let Some(record) = log.registered(&id) {
                return Ok(Some(record.clone()));
            }
        }
        let Some(record) = self.context.parent_get(id)? else {
            return Ok(None);
        };
        Ok(Some(self.context.inner.log.lock().register_fetched(record)))
    }

    pub fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<Record>, ContextError> {
        if self.model().entity(&request.entity).is_none() {
            return Err(ContextError::UnknownEntity(request.entity.clone()));
        }
        let base = self.context.parent_records(&request.entity)?;
        let view = self
            .context
            .inner
            .log
            .lock()
            .overlay(&request.entity, base, true);
        Ok(request.apply(view))
    }

    /// Fetch records of `T`, optionally narrowed by `predicate`
    pub fn fetch_entities<T: Entity>(
        &mut self,
        predicate: Option<Predicate>,
    ) -> Result<Vec<T>, ContextError> {
        let mut request = FetchRequest::for_entity::<T>();
        if let Some(predicate) = predicate {
            request = request.with_predicate(predicate);
        }
        self.fetch(&request)?.iter().map(T::from_record).collect()
    }

    pub fn count(&mut self, request: &FetchRequest) -> Result<usize, ContextError> {
        Ok(self.fetch(request)?.len())
    }

    pub fn has_changes(&self) -> bool {
        self.context.inner.log.lock().has_changes()
    }

    /// Push pending changes to the parent
    ///
    /// For a context created by a stack the save continues up the chain before returning, so a
    /// successful save has reached the backing store. When the chain broke above this context,
    /// saving again retries the parent's save even with nothing new to push.
    pub fn save(&mut self) -> Result<(), ContextError> {
        self.context.save_changes()
    }

    pub fn rollback(&mut self) {
        self.context.inner.log.lock().rollback();
    }

    /// Forget all registered objects so the next reads come from the parent
    pub fn reset(&mut self) {
        self.context.inner.log.lock().reset();
    }

    pub(crate) fn visible_records(&mut self, entity: &str) -> Result<Vec<Record>, ContextError> {
        let base = self.context.parent_records(entity)?;
        Ok(self.context.inner.log.lock().overlay(entity, base, false))
    }

    pub(crate) fn visible_get(&mut self, id: ObjectId) -> Result<Option<Record>, ContextError> {
        {
            let log = self.context.inner.log.lock();
            if log.is_deleted(&id) {
                return Ok(None);
            }
            if let Some(record) = log.registered(&id) {
                return Ok(Some(record.clone()));
            }
        }
        self.context.parent_get(id)
    }

    /// Take a child's save into this context's pending changes
    pub(crate) fn absorb(&mut self, changes: ChangeSet) -> Result<ApplyOutcome, ContextError> {
        let mut bases = HashMap::new();
        for update in &changes.updated {
            let id = update.current.id();
            let log = self.context.inner.log.lock();
            if log.registered(&id).is_some() || log.is_deleted(&id) {
                continue;
            }
            drop(log);
            if let Some(record) = self.context.parent_get(id)? {
                bases.insert(id, record);
            }
        }
        let outcome = self
            .context
            .inner
            .log
            .lock()
            .absorb(&changes, |id| bases.get(&id).cloned());
        debug!(
            context = %self.context.inner.label,
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "absorbed child save"
        );
        Ok(outcome)
    }
}
