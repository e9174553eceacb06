//! Lightweight migration between two object models.
//!
//! A plan maps every entity of the source model onto the destination model. Removed attributes
//! are dropped, added attributes take their default (or null when optional), and with mapping
//! inference enabled `renamed_from` carries data across entity and attribute renames.

use crate::error::StoreError;
use crate::model::ObjectModel;
use crate::record::Attributes;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct AttributeMapping {
    destination: String,
    source: Option<String>,
    fill: Value,
}

#[derive(Debug, Clone)]
struct EntityMapping {
    destination: String,
    attributes: Vec<AttributeMapping>,
}

/// Mapping from records of a source model to records of a destination model
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    entities: BTreeMap<String, EntityMapping>,
}

impl MigrationPlan {
    pub fn infer(
        source: &ObjectModel,
        destination: &ObjectModel,
        infer_mapping: bool,
    ) -> Result<Self, StoreError> {
        let mut entities = BTreeMap::new();

        for (entity_name, entity) in &destination.entities {
            let source_name = if source.entities.contains_key(entity_name) {
                Some(entity_name.clone())
            } else if infer_mapping {
                entity
                    .renamed_from
                    .clone()
                    .filter(|previous| source.entities.contains_key(previous))
            } else {
                None
            };
            let Some(source_name) = source_name else {
                continue;
            };
            let source_entity = &source.entities[&source_name];

            let mut attributes = Vec::with_capacity(entity.attributes.len());
            for (attribute_name, attribute) in &entity.attributes {
                let source_attribute = if source_entity.attributes.contains_key(attribute_name) {
                    Some(attribute_name.clone())
                } else if infer_mapping {
                    attribute
                        .renamed_from
                        .clone()
                        .filter(|previous| source_entity.attributes.contains_key(previous))
                } else {
                    None
                };

                if source_attribute.is_none() && !attribute.optional && attribute.default.is_none() {
                    return Err(StoreError::MigrationFailed(format!(
                        "cannot infer a value for new required attribute {entity_name}.{attribute_name}"
                    )));
                }

                attributes.push(AttributeMapping {
                    destination: attribute_name.clone(),
                    source: source_attribute,
                    fill: attribute.initial_value(),
                });
            }

            entities.insert(
                source_name,
                EntityMapping {
                    destination: entity_name.clone(),
                    attributes,
                },
            );
        }

        Ok(Self { entities })
    }

    /// Map one stored record; `None` when its entity no longer exists
    pub fn migrate(&self, entity: &str, attributes: &Attributes) -> Option<(String, Attributes)> {
        let mapping = self.entities.get(entity)?;
        let migrated = mapping
            .attributes
            .iter()
            .map(|attribute| {
                let value = attribute
                    .source
                    .as_ref()
                    .and_then(|source| attributes.get(source))
                    .cloned()
                    .unwrap_or_else(|| attribute.fill.clone());
                (attribute.destination.clone(), value)
            })
            .collect();
        Some((mapping.destination.clone(), migrated))
    }
}
