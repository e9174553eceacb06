//! Records and fetch requests
//!
//! A `Record` is the unit that flows through every context: an object id, the entity it belongs
//! to and a flat attribute map. Typed application values convert to and from records through the
//! `Entity` trait.

use crate::error::ContextError;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Attribute map carried by a record
pub type Attributes = Map<String, Value>;

/// Stable identifier of a managed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        ObjectId(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(ObjectId)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A managed object's values as seen by one context
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: ObjectId,
    entity: String,
    attributes: Attributes,
}

impl Record {
    pub fn new(id: ObjectId, entity: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id,
            entity: entity.into(),
            attributes,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Attribute value, `None` when absent or null
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn require_str(&self, key: &str) -> Result<String, ContextError> {
        self.get_str(key)
            .map(str::to_string)
            .ok_or_else(|| self.missing(key))
    }

    pub fn require_f64(&self, key: &str) -> Result<f64, ContextError> {
        self.get_f64(key).ok_or_else(|| self.missing(key))
    }

    fn missing(&self, key: &str) -> ContextError {
        ContextError::InvalidRecord(format!(
            "{} {} has no usable '{}' attribute",
            self.entity, self.id, key
        ))
    }

    /// Keys whose value differs from `snapshot`
    pub(crate) fn changed_keys(&self, snapshot: &Record) -> Vec<String> {
        let mut keys: Vec<String> = self
            .attributes
            .iter()
            .filter(|(k, v)| snapshot.attributes.get(k.as_str()) != Some(v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in snapshot.attributes.keys() {
            if !self.attributes.contains_key(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

/// Typed application value stored as records of one entity
pub trait Entity: Sized + Send + 'static {
    const ENTITY_NAME: &'static str;

    fn from_record(record: &Record) -> Result<Self, ContextError>;

    fn to_attributes(&self) -> Attributes;
}

/// Composable record filter
#[derive(Clone)]
pub struct Predicate {
    description: String,
    test: Arc<dyn Fn(&Record) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new<F>(description: impl Into<String>, test: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            test: Arc::new(test),
        }
    }

    pub fn entity_is(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(format!("entity == {entity}"), move |r| r.entity() == entity)
    }

    pub fn attribute_equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let attribute = attribute.into();
        let value = value.into();
        Self::new(format!("{attribute} == {value}"), move |r| {
            r.attributes().get(&attribute).unwrap_or(&Value::Null) == &value
        })
    }

    pub fn and(self, other: Predicate) -> Self {
        let description = format!("({}) AND ({})", self.description, other.description);
        Self::new(description, move |r| self.evaluate(r) && other.evaluate(r))
    }

    pub fn or(self, other: Predicate) -> Self {
        let description = format!("({}) OR ({})", self.description, other.description);
        Self::new(description, move |r| self.evaluate(r) || other.evaluate(r))
    }

    pub fn not(self) -> Self {
        let description = format!("NOT ({})", self.description);
        Self::new(description, move |r| !self.evaluate(r))
    }

    pub fn evaluate(&self, record: &Record) -> bool {
        (self.test)(record)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.description).finish()
    }
}

#[derive(Debug, Clone)]
pub struct SortDescriptor {
    pub attribute: String,
    pub ascending: bool,
}

/// Selects records of one entity
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub entity: String,
    pub predicate: Option<Predicate>,
    pub sort: Vec<SortDescriptor>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            sort: Vec::new(),
            limit: None,
        }
    }

    pub fn for_entity<T: Entity>() -> Self {
        Self::new(T::ENTITY_NAME)
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn sorted_by(mut self, attribute: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortDescriptor {
            attribute: attribute.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter, order and truncate records already restricted to `self.entity`
    pub(crate) fn apply(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut out: Vec<Record> = records
            .into_iter()
            .filter(|r| self.predicate.as_ref().map_or(true, |p| p.evaluate(r)))
            .collect();

        if self.sort.is_empty() {
            out.sort_by_key(|r| r.id());
        } else {
            out.sort_by(|a, b| {
                for descriptor in &self.sort {
                    let ordering = compare_values(
                        a.attributes().get(&descriptor.attribute),
                        b.attributes().get(&descriptor.attribute),
                    );
                    let ordering = if descriptor.ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.id().cmp(&b.id())
            });
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Nulls first, then numbers, booleans and strings in their natural order
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
