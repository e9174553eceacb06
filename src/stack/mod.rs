//! Persistence Stack
//!
//! Owns the backing store and the two root contexts built on it: the persisting context, which
//! saves straight into the store on a private queue, and the main context, a child of the
//! persisting context confined to the main queue. Worker contexts hang off the main context and
//! belong to whoever asked for them. A reset tears the store down, provisions a fresh one at the
//! same location and rebuilds both root contexts in place.

pub mod propagation;

pub use propagation::{PropagationGuard, PropagationTracker};

use crate::config::StackConfig;
use crate::context::{ConcurrencyMode, Context, Parent};
use crate::error::StoreError;
use crate::model::ObjectModel;
use crate::queue::{spawn_background, CallbackQueue, MainQueue, SerialQueue};
use crate::store::{
    destroy_store, open_store, provision_store, StoreHandle, StoreLocation, StoreOptions,
    StoreSlot,
};
use parking_lot::{Mutex, RwLock};
use propagation::SavePropagator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const PERSISTING_LABEL: &str = "persisting";
const MAIN_LABEL: &str = "main";
const BATCH_LABEL: &str = "batch";

/// Bundle the object model is re-resolved from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub bundle_dir: PathBuf,
    pub name: String,
}

impl ModelSource {
    pub fn new(bundle_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            name: name.into(),
        }
    }

    fn load(&self) -> Result<ObjectModel, crate::error::ModelError> {
        ObjectModel::load(&self.bundle_dir, &self.name)
    }

    /// Loading at construction is a packaging precondition
    fn load_or_abort(&self) -> ObjectModel {
        match self.load() {
            Ok(model) => model,
            Err(e) => panic!("object model '{}' could not be loaded: {e}", self.name),
        }
    }
}

struct StackInner {
    model: RwLock<Arc<ObjectModel>>,
    source: Option<ModelSource>,
    location: StoreLocation,
    options: StoreOptions,
    store: Arc<StoreSlot>,
    persisting: Mutex<Option<Context>>,
    main: Mutex<Option<Context>>,
    main_queue: MainQueue,
    tracker: Arc<PropagationTracker>,
    propagator: Arc<SavePropagator>,
    resetting: Mutex<()>,
}

/// Handle to a persistence stack; clones share the same stack
#[derive(Clone)]
pub struct PersistenceStack {
    inner: Arc<StackInner>,
}

impl PersistenceStack {
    /// Provision the configured store off the calling thread
    ///
    /// The object model is loaded before returning; a missing or unreadable model panics.
    pub fn construct<F>(config: &StackConfig, callback_queue: CallbackQueue, callback: F)
    where
        F: FnOnce(Result<PersistenceStack, StoreError>) + Send + 'static,
    {
        Self::construct_on(config, MainQueue::spawn(), callback_queue, callback)
    }

    /// Like `construct`, using a caller-supplied main queue
    pub fn construct_on<F>(
        config: &StackConfig,
        main_queue: MainQueue,
        callback_queue: CallbackQueue,
        callback: F,
    ) where
        F: FnOnce(Result<PersistenceStack, StoreError>) + Send + 'static,
    {
        let source = ModelSource::new(&config.bundle_dir, &config.model_name);
        let model = Arc::new(source.load_or_abort());
        let location = config.resolved_store_location();
        let options = config.store.clone();
        info!(
            model = %model.name,
            location = %location.display_path().display(),
            "constructing persistence stack"
        );

        let assembled_queue = main_queue.clone();
        provision_store(
            location.clone(),
            model.clone(),
            options.clone(),
            callback_queue,
            &main_queue,
            move |result| {
                callback(result.map(|handle| {
                    Self::assemble(model, Some(source), location, options, handle, assembled_queue)
                }))
            },
        );
    }

    pub async fn open(config: &StackConfig) -> Result<Self, StoreError> {
        let (tx, rx) = oneshot::channel();
        Self::construct(config, CallbackQueue::Background, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(StoreError::StoreUnavailable))
    }

    /// Build a stack over a fresh in-memory store, blocking the caller
    pub fn in_memory(model: ObjectModel) -> Result<Self, StoreError> {
        Self::in_memory_inner(Arc::new(model), None)
    }

    /// In-memory stack whose model comes from a bundle; a missing model panics
    pub fn in_memory_from_bundle(
        bundle_dir: impl AsRef<Path>,
        name: &str,
    ) -> Result<Self, StoreError> {
        let source = ModelSource::new(bundle_dir.as_ref(), name);
        let model = Arc::new(source.load_or_abort());
        Self::in_memory_inner(model, Some(source))
    }

    fn in_memory_inner(
        model: Arc<ObjectModel>,
        source: Option<ModelSource>,
    ) -> Result<Self, StoreError> {
        let options = StoreOptions::default();
        let handle = open_store(&StoreLocation::InMemory, model.clone(), &options)?;
        Ok(Self::assemble(
            model,
            source,
            StoreLocation::InMemory,
            options,
            handle,
            MainQueue::spawn(),
        ))
    }

    fn assemble(
        model: Arc<ObjectModel>,
        source: Option<ModelSource>,
        location: StoreLocation,
        options: StoreOptions,
        handle: StoreHandle,
        main_queue: MainQueue,
    ) -> Self {
        let tracker = Arc::new(PropagationTracker::new());
        Self {
            inner: Arc::new(StackInner {
                model: RwLock::new(model),
                source,
                location,
                options,
                store: Arc::new(StoreSlot::new(handle)),
                persisting: Mutex::new(None),
                main: Mutex::new(None),
                main_queue,
                propagator: Arc::new(SavePropagator::new(tracker.clone())),
                tracker,
                resetting: Mutex::new(()),
            }),
        }
    }

    pub fn model(&self) -> Arc<ObjectModel> {
        self.inner.model.read().clone()
    }

    pub fn store_location(&self) -> &StoreLocation {
        &self.inner.location
    }

    pub fn main_queue(&self) -> &MainQueue {
        &self.inner.main_queue
    }

    /// Whether a store is attached; false after a failed reset
    pub fn is_store_attached(&self) -> bool {
        self.inner.store.is_attached()
    }

    /// Saves currently propagating toward the store
    pub fn pending_propagations(&self) -> usize {
        self.inner.tracker.pending()
    }

    /// The background context that writes to the store
    pub fn persisting_context(&self) -> Context {
        let mut slot = self.inner.persisting.lock();
        if let Some(context) = slot.as_ref() {
            return context.clone();
        }
        let context = Context::new(
            PERSISTING_LABEL,
            ConcurrencyMode::Private,
            SerialQueue::spawn(PERSISTING_LABEL),
            Parent::Store(self.inner.store.clone()),
            self.model(),
            Some(self.inner.propagator.clone()),
        );
        *slot = Some(context.clone());
        context
    }

    /// The main-queue context, built on the main queue on first use
    pub fn main_context(&self) -> Context {
        let existing = self.inner.main.lock().clone();
        if let Some(context) = existing {
            return context;
        }
        if !self.inner.main_queue.is_current() {
            let stack = self.clone();
            return self
                .inner
                .main_queue
                .perform_and_wait(move || stack.main_context());
        }

        let persisting = self.persisting_context();
        let mut slot = self.inner.main.lock();
        if let Some(context) = slot.as_ref() {
            return context.clone();
        }
        let context = Context::new(
            MAIN_LABEL,
            ConcurrencyMode::MainQueue,
            self.inner.main_queue.queue().clone(),
            Parent::Context(persisting),
            self.model(),
            Some(self.inner.propagator.clone()),
        );
        *slot = Some(context.clone());
        context
    }

    /// New context whose parent is the main context
    ///
    /// # Panics
    ///
    /// When `mode` is `MainQueue` and the caller is not on the main queue.
    pub fn new_child_context(&self, mode: ConcurrencyMode, label: &str) -> Context {
        let queue = match mode {
            ConcurrencyMode::MainQueue => {
                if !self.inner.main_queue.is_current() {
                    panic!("main-queue context '{label}' requested off the main queue");
                }
                self.inner.main_queue.queue().clone()
            }
            ConcurrencyMode::Private => SerialQueue::spawn(label),
        };
        Context::new(
            label,
            mode,
            queue,
            Parent::Context(self.main_context()),
            self.model(),
            Some(self.inner.propagator.clone()),
        )
    }

    #[deprecated(note = "use new_child_context(ConcurrencyMode::Private, label)")]
    pub fn new_background_worker_context(&self) -> Context {
        self.new_child_context(ConcurrencyMode::Private, "background-worker")
    }

    /// Context with its own connection to the store, outside the context tree
    ///
    /// For an in-memory stack the connection is a separate, empty in-memory store.
    pub fn new_batch_context<F>(&self, callback_queue: CallbackQueue, callback: F)
    where
        F: FnOnce(Result<Context, StoreError>) + Send + 'static,
    {
        let stack = self.clone();
        let main = self.inner.main_queue.clone();
        spawn_background("batch-context", move || {
            let result = stack.open_batch_context();
            drop(stack);
            callback_queue.deliver(&main, move || callback(result));
        });
    }

    pub async fn batch_context(&self) -> Result<Context, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.new_batch_context(CallbackQueue::Background, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(StoreError::StoreUnavailable))
    }

    fn open_batch_context(&self) -> Result<Context, StoreError> {
        let connection = self.inner.store.get()?.connect_batch(&self.inner.options)?;
        if self.inner.location.is_in_memory() {
            debug!("batch context on an in-memory stack gets its own empty store");
        }
        Ok(Context::new(
            BATCH_LABEL,
            ConcurrencyMode::Private,
            SerialQueue::spawn(BATCH_LABEL),
            Parent::Store(Arc::new(StoreSlot::new(connection))),
            self.model(),
            None,
        ))
    }

    /// Destroy and recreate the store once in-flight saves have propagated
    pub fn reset_store<F>(&self, callback_queue: CallbackQueue, callback: F)
    where
        F: FnOnce(Result<(), StoreError>) + Send + 'static,
    {
        let stack = self.clone();
        let main = self.inner.main_queue.clone();
        spawn_background("store-reset", move || {
            let result = stack.reset_blocking();
            drop(stack);
            if let Err(e) = &result {
                warn!(error = %e, "store reset failed");
            }
            callback_queue.deliver(&main, move || callback(result));
        });
    }

    pub async fn reset(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.reset_store(CallbackQueue::Background, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(StoreError::StoreUnavailable))
    }

    fn reset_blocking(&self) -> Result<(), StoreError> {
        let _serialized = self.inner.resetting.lock();
        debug!(pending = self.inner.tracker.pending(), "waiting for save propagations");
        self.inner.tracker.wait_idle();

        let model = match &self.inner.source {
            Some(source) => Arc::new(source.load().map_err(|e| {
                StoreError::unable_to_create(self.inner.location.display_path(), e)
            })?),
            None => self.model(),
        };

        let handle = match &self.inner.location {
            StoreLocation::InMemory => {
                self.inner
                    .store
                    .take()
                    .ok_or(StoreError::InMemoryStoreMissing)?;
                open_store(&StoreLocation::InMemory, model.clone(), &self.inner.options)?
            }
            StoreLocation::File(path) => {
                let attached = match self.inner.store.take() {
                    Some(old) => {
                        if let Err(e) = old.flush() {
                            warn!(error = %e, "flush before destroy failed");
                        }
                        true
                    }
                    None => false,
                };
                if attached || path.exists() {
                    destroy_store(path)?;
                } else {
                    debug!(path = %path.display(), "no store left to destroy; reprovisioning");
                }
                open_store(&self.inner.location, model.clone(), &self.inner.options)?
            }
        };
        self.inner.store.install(handle);
        *self.inner.model.write() = model;

        *self.inner.persisting.lock() = None;
        *self.inner.main.lock() = None;
        self.main_context();
        info!(
            location = %self.inner.location.display_path().display(),
            "store reset"
        );
        Ok(())
    }
}

impl std::fmt::Debug for PersistenceStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceStack")
            .field("location", &self.inner.location)
            .field("model", &self.inner.model.read().name)
            .finish()
    }
}
