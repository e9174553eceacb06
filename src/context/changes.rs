//! Per-context change tracking
//!
//! Every mutating session operation lands in the context's `ChangeLog`. The log answers three
//! questions: what must be pushed to the parent on save (`pending_changes`), what changed since
//! the last notification (`take_unprocessed`), and how the parent's records look through this
//! context (`overlay`).

use crate::record::{ObjectId, Predicate, Record};
use crate::store::ApplyOutcome;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// An updated record together with the values it was loaded with
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub current: Record,
    pub snapshot: Record,
}

/// Everything one save pushes to its parent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub inserted: Vec<Record>,
    pub updated: Vec<PendingUpdate>,
    pub deleted: Vec<Record>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Disjoint inserted/updated/deleted record sets carried by a notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDelta {
    pub inserted: Vec<Record>,
    pub updated: Vec<Record>,
    pub deleted: Vec<Record>,
}

impl RecordDelta {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Keep only the records matching `predicate`
    pub fn filter(&self, predicate: &Predicate) -> RecordDelta {
        let keep = |records: &[Record]| -> Vec<Record> {
            records
                .iter()
                .filter(|r| predicate.evaluate(r))
                .cloned()
                .collect()
        };
        RecordDelta {
            inserted: keep(&self.inserted),
            updated: keep(&self.updated),
            deleted: keep(&self.deleted),
        }
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    current: Record,
    /// Values as last loaded from, or saved to, the parent
    snapshot: Record,
}

#[derive(Debug, Clone)]
enum Unprocessed {
    Inserted,
    Updated,
    Deleted(Record),
}

#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
    objects: HashMap<ObjectId, Tracked>,
    inserted: BTreeSet<ObjectId>,
    updated: BTreeSet<ObjectId>,
    deleted: BTreeMap<ObjectId, Tracked>,
    unprocessed: BTreeMap<ObjectId, Unprocessed>,
}

impl ChangeLog {
    pub(crate) fn has_changes(&self) -> bool {
        !(self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }

    fn is_dirty(&self, id: &ObjectId) -> bool {
        self.inserted.contains(id) || self.updated.contains(id)
    }

    pub(crate) fn is_deleted(&self, id: &ObjectId) -> bool {
        self.deleted.contains_key(id)
    }

    pub(crate) fn registered(&self, id: &ObjectId) -> Option<&Record> {
        self.objects.get(id).map(|t| &t.current)
    }

    /// Remember a record loaded from the parent
    pub(crate) fn register_fetched(&mut self, record: Record) -> Record {
        if let Some(tracked) = self.objects.get(&record.id()) {
            return tracked.current.clone();
        }
        self.objects.insert(
            record.id(),
            Tracked {
                current: record.clone(),
                snapshot: record.clone(),
            },
        );
        record
    }

    pub(crate) fn insert(&mut self, record: Record) {
        let id = record.id();
        self.objects.insert(
            id,
            Tracked {
                current: record.clone(),
                snapshot: record,
            },
        );
        self.inserted.insert(id);
        self.unprocessed.insert(id, Unprocessed::Inserted);
    }

    /// Replace the current values of a registered record
    pub(crate) fn update(&mut self, record: Record) -> bool {
        let id = record.id();
        let Some(tracked) = self.objects.get_mut(&id) else {
            return false;
        };
        tracked.current = record;
        if !self.inserted.contains(&id) {
            self.updated.insert(id);
        }
        self.unprocessed
            .entry(id)
            .and_modify(|change| {
                if !matches!(change, Unprocessed::Inserted) {
                    *change = Unprocessed::Updated;
                }
            })
            .or_insert(Unprocessed::Updated);
        true
    }

    pub(crate) fn delete(&mut self, id: ObjectId) -> bool {
        let Some(tracked) = self.objects.remove(&id) else {
            return false;
        };
        self.updated.remove(&id);

        if self.inserted.remove(&id) {
            // Never reached the parent: forget it entirely.
            if matches!(self.unprocessed.get(&id), Some(Unprocessed::Inserted)) {
                self.unprocessed.remove(&id);
            } else {
                self.unprocessed
                    .insert(id, Unprocessed::Deleted(tracked.current.clone()));
            }
            return true;
        }

        self.unprocessed
            .insert(id, Unprocessed::Deleted(tracked.current.clone()));
        self.deleted.insert(id, tracked);
        true
    }

    /// Changes since the previous call, coalesced per object
    pub(crate) fn take_unprocessed(&mut self) -> RecordDelta {
        let mut delta = RecordDelta::default();
        for (id, change) in std::mem::take(&mut self.unprocessed) {
            match change {
                Unprocessed::Inserted => {
                    if let Some(tracked) = self.objects.get(&id) {
                        delta.inserted.push(tracked.current.clone());
                    }
                }
                Unprocessed::Updated => {
                    if let Some(tracked) = self.objects.get(&id) {
                        delta.updated.push(tracked.current.clone());
                    }
                }
                Unprocessed::Deleted(record) => delta.deleted.push(record),
            }
        }
        delta
    }

    pub(crate) fn pending_changes(&self) -> ChangeSet {
        let current = |id: &ObjectId| self.objects.get(id).map(|t| t.current.clone());
        ChangeSet {
            inserted: self.inserted.iter().filter_map(current).collect(),
            updated: self
                .updated
                .iter()
                .filter_map(|id| self.objects.get(id))
                .map(|tracked| PendingUpdate {
                    current: tracked.current.clone(),
                    snapshot: tracked.snapshot.clone(),
                })
                .collect(),
            deleted: self.deleted.values().map(|t| t.current.clone()).collect(),
        }
    }

    /// Mark everything pending as saved, adopting the values the parent resolved
    pub(crate) fn commit(&mut self, outcome: &ApplyOutcome) {
        for record in &outcome.resolved {
            self.objects.insert(
                record.id(),
                Tracked {
                    current: record.clone(),
                    snapshot: record.clone(),
                },
            );
        }
        for id in &outcome.vanished {
            self.objects.remove(id);
        }
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
    }

    /// Discard pending changes, restoring loaded values
    pub(crate) fn rollback(&mut self) {
        for id in std::mem::take(&mut self.inserted) {
            self.objects.remove(&id);
        }
        for id in std::mem::take(&mut self.updated) {
            if let Some(tracked) = self.objects.get_mut(&id) {
                tracked.current = tracked.snapshot.clone();
            }
        }
        for (id, mut tracked) in std::mem::take(&mut self.deleted) {
            tracked.current = tracked.snapshot.clone();
            self.objects.insert(id, tracked);
        }
        self.unprocessed.clear();
    }

    /// Forget every registered object and pending change
    pub(crate) fn reset(&mut self) {
        *self = ChangeLog::default();
    }

    /// Records of `entity` as seen through this context
    ///
    /// Objects with pending changes keep their local values; clean registered objects adopt the
    /// parent's values when `register` is set. Records inserted here are appended.
    pub(crate) fn overlay(
        &mut self,
        entity: &str,
        base: Vec<Record>,
        register: bool,
    ) -> Vec<Record> {
        let mut seen = HashSet::with_capacity(base.len());
        let mut out = Vec::with_capacity(base.len());

        for record in base {
            let id = record.id();
            seen.insert(id);
            if self.deleted.contains_key(&id) {
                continue;
            }
            if self.is_dirty(&id) {
                if let Some(tracked) = self.objects.get(&id) {
                    out.push(tracked.current.clone());
                }
                continue;
            }
            if register {
                self.objects.insert(
                    id,
                    Tracked {
                        current: record.clone(),
                        snapshot: record.clone(),
                    },
                );
            } else if let Some(tracked) = self.objects.get(&id) {
                out.push(tracked.current.clone());
                continue;
            }
            out.push(record);
        }

        for id in self.inserted.iter().chain(self.updated.iter()) {
            if seen.contains(id) {
                continue;
            }
            if let Some(tracked) = self.objects.get(id) {
                if tracked.current.entity() == entity {
                    out.push(tracked.current.clone());
                }
            }
        }
        out
    }

    /// Merge a child's save into this log
    ///
    /// Updated properties apply one by one, so a child only overwrites what it changed.
    pub(crate) fn absorb(
        &mut self,
        changes: &ChangeSet,
        lookup: impl Fn(ObjectId) -> Option<Record>,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for record in &changes.inserted {
            self.insert(record.clone());
            outcome.resolved.push(record.clone());
        }

        for update in &changes.updated {
            let id = update.current.id();
            if self.deleted.contains_key(&id) {
                outcome.vanished.push(id);
                continue;
            }
            if !self.objects.contains_key(&id) {
                let base = lookup(id).unwrap_or_else(|| update.snapshot.clone());
                self.register_fetched(base);
            }
            let Some(mut merged) = self.registered(&id).cloned() else {
                outcome.vanished.push(id);
                continue;
            };
            for key in update.current.changed_keys(&update.snapshot) {
                match update.current.attributes().get(&key) {
                    Some(value) => {
                        merged.attributes_mut().insert(key, value.clone());
                    }
                    None => {
                        merged.attributes_mut().remove(&key);
                    }
                }
            }
            self.update(merged.clone());
            outcome.resolved.push(merged);
        }

        for record in &changes.deleted {
            let id = record.id();
            if !self.objects.contains_key(&id) && !self.deleted.contains_key(&id) {
                self.register_fetched(record.clone());
            }
            self.delete(id);
        }

        outcome
    }
}
