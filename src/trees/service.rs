//! Tree data service
//!
//! Writes go through short-lived worker contexts and run synchronously on the worker's queue,
//! save included, so consecutive imports from one caller land in order. Reads go through the
//! main context.

use crate::context::{ConcurrencyMode, Session};
use crate::error::{ContextError, StoreError};
use crate::record::{Entity, FetchRequest, Predicate};
use crate::stack::PersistenceStack;
use crate::trees::{CityBounds, Tree, TreeDescription, User};
use tracing::info;

/// Data access for the Street Trees app
#[derive(Debug, Clone)]
pub struct TreeDataService {
    stack: PersistenceStack,
}

impl TreeDataService {
    pub fn new(stack: PersistenceStack) -> Self {
        Self { stack }
    }

    pub fn stack(&self) -> &PersistenceStack {
        &self.stack
    }

    /// Run `work` on a fresh worker context and save it
    fn write<F, R>(&self, label: &str, work: F) -> Result<R, ContextError>
    where
        F: FnOnce(&mut Session<'_>) -> Result<R, ContextError> + Send + 'static,
        R: Send + 'static,
    {
        let worker = self
            .stack
            .new_child_context(ConcurrencyMode::Private, label);
        worker.perform_and_wait(move |session| {
            let result = work(session)?;
            session.save()?;
            Ok(result)
        })
    }

    fn read<F, R>(&self, work: F) -> Result<R, ContextError>
    where
        F: FnOnce(&mut Session<'_>) -> Result<R, ContextError> + Send + 'static,
        R: Send + 'static,
    {
        self.stack.main_context().perform_and_wait(work)
    }

    /// Insert a batch of trees
    pub fn import_trees(&self, trees: Vec<Tree>) -> Result<usize, ContextError> {
        let count = self.write("tree-import", move |session| {
            for tree in &trees {
                session.insert_entity(tree)?;
            }
            Ok(trees.len())
        })?;
        info!(count, "imported trees");
        Ok(count)
    }

    /// Insert or replace species descriptions, keyed by species
    pub fn import_descriptions(
        &self,
        descriptions: Vec<TreeDescription>,
    ) -> Result<usize, ContextError> {
        let count = self.write("description-import", move |session| {
            for description in &descriptions {
                let request = FetchRequest::for_entity::<TreeDescription>().with_predicate(
                    Predicate::attribute_equals("species", description.species.as_str()),
                );
                let existing = session.fetch(&request)?;
                match existing.first() {
                    Some(record) => {
                        session.update(record.id(), description.to_attributes())?;
                        for duplicate in &existing[1..] {
                            session.delete(duplicate.id())?;
                        }
                    }
                    None => {
                        session.insert_entity(description)?;
                    }
                }
            }
            Ok(descriptions.len())
        })?;
        info!(count, "imported tree descriptions");
        Ok(count)
    }

    /// Make `user` the only stored user
    pub fn replace_user(&self, user: User) -> Result<(), ContextError> {
        self.write("user-update", move |session| replace_all(session, &user))
    }

    pub fn set_city_bounds(&self, bounds: CityBounds) -> Result<(), ContextError> {
        self.write("city-bounds-update", move |session| replace_all(session, &bounds))
    }

    /// All trees, ordered by species
    pub fn trees(&self) -> Result<Vec<Tree>, ContextError> {
        self.read(|session| {
            let request = FetchRequest::for_entity::<Tree>().sorted_by("species", true);
            session.fetch(&request)?.iter().map(Tree::from_record).collect()
        })
    }

    pub fn trees_of_species(&self, species: &str) -> Result<Vec<Tree>, ContextError> {
        let predicate = Predicate::attribute_equals("species", species);
        self.read(move |session| session.fetch_entities::<Tree>(Some(predicate)))
    }

    pub fn tree_count(&self) -> Result<usize, ContextError> {
        self.read(|session| session.count(&FetchRequest::for_entity::<Tree>()))
    }

    pub fn description_for(&self, species: &str) -> Result<Option<TreeDescription>, ContextError> {
        let predicate = Predicate::attribute_equals("species", species);
        self.read(move |session| {
            Ok(session
                .fetch_entities::<TreeDescription>(Some(predicate))?
                .into_iter()
                .next())
        })
    }

    pub fn current_user(&self) -> Result<Option<User>, ContextError> {
        self.read(|session| Ok(session.fetch_entities::<User>(None)?.into_iter().next()))
    }

    pub fn city_bounds(&self) -> Result<Option<CityBounds>, ContextError> {
        self.read(|session| {
            Ok(session
                .fetch_entities::<CityBounds>(None)?
                .into_iter()
                .next())
        })
    }

    /// Wipe all data by resetting the store
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.stack.reset().await
    }
}

fn replace_all<T: Entity>(session: &mut Session<'_>, value: &T) -> Result<(), ContextError> {
    for existing in session.fetch(&FetchRequest::for_entity::<T>())? {
        session.delete(existing.id())?;
    }
    session.insert_entity(value)?;
    Ok(())
}
