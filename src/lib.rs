//! Street Trees: Layered Object Persistence
//!
//! A three-tier persistence stack for the Street Trees inventory: a sled-backed store,
//! a private persisting context that owns all store writes, and a main context that
//! serves reads, with short-lived worker contexts that bubble their saves upward.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod queue;
pub mod record;
pub mod stack;
pub mod store;
pub mod trees;

pub use context::{ChangeFrequency, ConcurrencyMode, Context, Session};
pub use error::{ConfigError, ContextError, ModelError, StoreError};
pub use model::ObjectModel;
pub use monitor::{EntityMonitor, EntityObserver};
pub use queue::{CallbackQueue, MainQueue};
pub use record::{Entity, FetchRequest, ObjectId, Predicate, Record};
pub use stack::PersistenceStack;
pub use store::{StoreLocation, StoreOptions};
pub use trees::TreeDataService;
