//! Object Model
//!
//! Describes the entities a store holds and the attributes each entity carries. Models are
//! bundled as TOML files named `<name>.model.toml` and loaded when a store is provisioned.

pub mod migration;

pub use migration::MigrationPlan;

use crate::error::{ContextError, ModelError};
use crate::record::Attributes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MODEL_EXTENSION: &str = "model.toml";

/// Value kinds an attribute may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    String,
    Integer,
    Double,
    Boolean,
    /// RFC 3339 timestamp or `YYYY-MM-DD` date, stored as a string
    Date,
}

impl AttributeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeKind::String => "string",
            AttributeKind::Integer => "integer",
            AttributeKind::Double => "double",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Date => "date",
        }
    }

    /// Whether a non-null value fits this kind
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            AttributeKind::String => value.is_string(),
            AttributeKind::Integer => value.is_i64() || value.is_u64(),
            AttributeKind::Double => value.is_number(),
            AttributeKind::Boolean => value.is_boolean(),
            AttributeKind::Date => value.as_str().map_or(false, |s| {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub kind: AttributeKind,

    #[serde(default)]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Previous attribute name, honored by inferred migrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

impl AttributeDescription {
    pub fn required(kind: AttributeKind) -> Self {
        Self {
            kind,
            optional: false,
            default: None,
            renamed_from: None,
        }
    }

    pub fn optional(kind: AttributeKind) -> Self {
        Self {
            optional: true,
            ..Self::required(kind)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.renamed_from = Some(previous.into());
        self
    }

    /// Value a new or migrated record starts with
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDescription>,

    /// Previous entity name, honored by inferred migrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

impl EntityDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, name: impl Into<String>, description: AttributeDescription) -> Self {
        self.attributes.insert(name.into(), description);
        self
    }

    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.renamed_from = Some(previous.into());
        self
    }
}

/// Schema of a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectModel {
    pub name: String,
    pub version: u32,

    #[serde(default)]
    pub entities: BTreeMap<String, EntityDescription>,
}

impl ObjectModel {
    pub fn builder(name: impl Into<String>, version: u32) -> ModelBuilder {
        ModelBuilder {
            model: ObjectModel {
                name: name.into(),
                version,
                entities: BTreeMap::new(),
            },
        }
    }

    /// Path of the bundled model file for `name`
    pub fn bundle_path(bundle_dir: &Path, name: &str) -> PathBuf {
        bundle_dir.join(format!("{name}.{MODEL_EXTENSION}"))
    }

    /// Load a bundled model
    pub fn load(bundle_dir: &Path, name: &str) -> Result<Self, ModelError> {
        let path = Self::bundle_path(bundle_dir, name);
        let contents = std::fs::read_to_string(&path).map_err(|_| ModelError::NotFound {
            name: name.to_string(),
            path: path.clone(),
        })?;
        let model = Self::from_toml(name, &contents)?;
        if model.name != name {
            return Err(ModelError::Invalid {
                name: name.to_string(),
                reason: format!("bundle declares model '{}'", model.name),
            });
        }
        Ok(model)
    }

    pub fn from_toml(name: &str, contents: &str) -> Result<Self, ModelError> {
        let model: ObjectModel = toml::from_str(contents).map_err(|e| ModelError::Parse {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_toml(&self) -> Result<String, ModelError> {
        toml::to_string_pretty(self).map_err(|e| ModelError::Parse {
            name: self.name.clone(),
            reason: e.to_string(),
        })
    }

    /// Check that defaults fit their attribute kinds
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::Invalid {
                name: self.name.clone(),
                reason: "model name cannot be empty".to_string(),
            });
        }
        for (entity_name, entity) in &self.entities {
            for (attribute_name, attribute) in &entity.attributes {
                if let Some(default) = &attribute.default {
                    if !default.is_null() && !attribute.kind.accepts(default) {
                        return Err(ModelError::Invalid {
                            name: self.name.clone(),
                            reason: format!(
                                "default for {entity_name}.{attribute_name} is not a {}",
                                attribute.kind.as_str()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.get(name)
    }

    fn require_entity(&self, name: &str) -> Result<&EntityDescription, ContextError> {
        self.entity(name)
            .ok_or_else(|| ContextError::UnknownEntity(name.to_string()))
    }

    /// Initial attributes of a new record: defaults overlaid with `values`
    pub fn initial_attributes(
        &self,
        entity: &str,
        values: Attributes,
    ) -> Result<Attributes, ContextError> {
        let description = self.require_entity(entity)?;
        let mut attributes: Attributes = description
            .attributes
            .iter()
            .map(|(name, attribute)| (name.clone(), attribute.initial_value()))
            .collect();
        for (key, value) in values {
            attributes.insert(key, value);
        }
        self.check_values(entity, &attributes)?;
        Ok(attributes)
    }

    /// Check that every value names a known attribute and fits its kind
    pub fn check_values(&self, entity: &str, attributes: &Attributes) -> Result<(), ContextError> {
        let description = self.require_entity(entity)?;
        for (key, value) in attributes {
            let attribute =
                description
                    .attributes
                    .get(key)
                    .ok_or_else(|| ContextError::UnknownAttribute {
                        entity: entity.to_string(),
                        attribute: key.clone(),
                    })?;
            if !value.is_null() && !attribute.kind.accepts(value) {
                return Err(ContextError::TypeMismatch {
                    entity: entity.to_string(),
                    attribute: key.clone(),
                    expected: attribute.kind.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Full validation performed before a record is saved
    pub fn validate_for_save(
        &self,
        entity: &str,
        attributes: &Attributes,
    ) -> Result<(), ContextError> {
        self.check_values(entity, attributes)?;
        let description = self.require_entity(entity)?;
        for (name, attribute) in &description.attributes {
            let present = attributes.get(name).map_or(false, |v| !v.is_null());
            if !attribute.optional && !present {
                return Err(ContextError::MissingAttribute {
                    entity: entity.to_string(),
                    attribute: name.clone(),
                });
            }
        }
        Ok(())
    }
}

pub struct ModelBuilder {
    model: ObjectModel,
}

impl ModelBuilder {
    pub fn entity(mut self, name: impl Into<String>, description: EntityDescription) -> Self {
        self.model.entities.insert(name.into(), description);
        self
    }

    pub fn build(self) -> ObjectModel {
        self.model
    }
}
