//! Street Trees data
//!
//! The app's entities as typed values, the object model they are stored under, and the
//! data-access service the app talks to.

pub mod service;

pub use service::TreeDataService;

use crate::error::ContextError;
use crate::model::{AttributeDescription, AttributeKind, EntityDescription, ObjectModel};
use crate::record::{Attributes, Entity, Record};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Name of the bundled object model
pub const MODEL_NAME: &str = "StreetTrees";

/// Bundled model definition, as shipped in `models/StreetTrees.model.toml`
pub const BUNDLED_MODEL: &str = include_str!("../../models/StreetTrees.model.toml");

fn optional(value: &Option<impl Serialize>) -> Value {
    json!(value)
}

/// A planted street tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub species: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub address: Option<String>,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub planted_on: Option<String>,
}

impl Entity for Tree {
    const ENTITY_NAME: &'static str = "Tree";

    fn from_record(record: &Record) -> Result<Self, ContextError> {
        Ok(Tree {
            species: record.require_str("species")?,
            latitude: record.require_f64("latitude")?,
            longitude: record.require_f64("longitude")?,
            address: record.get_str("address").map(str::to_string),
            planted_on: record.get_str("planted_on").map(str::to_string),
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("species".to_string(), json!(self.species));
        attributes.insert("latitude".to_string(), json!(self.latitude));
        attributes.insert("longitude".to_string(), json!(self.longitude));
        attributes.insert("address".to_string(), optional(&self.address));
        attributes.insert("planted_on".to_string(), optional(&self.planted_on));
        attributes
    }
}

/// What the app shows about a species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDescription {
    pub species: String,
    pub common_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub native: bool,
}

impl Entity for TreeDescription {
    const ENTITY_NAME: &'static str = "TreeDescription";

    fn from_record(record: &Record) -> Result<Self, ContextError> {
        Ok(TreeDescription {
            species: record.require_str("species")?,
            common_name: record.require_str("common_name")?,
            description: record.get_str("description").map(str::to_string),
            native: record.get_bool("native").unwrap_or(false),
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("species".to_string(), json!(self.species));
        attributes.insert("common_name".to_string(), json!(self.common_name));
        attributes.insert("description".to_string(), optional(&self.description));
        attributes.insert("native".to_string(), json!(self.native));
        attributes
    }
}

/// The resident filling in planting requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Entity for User {
    const ENTITY_NAME: &'static str = "User";

    fn from_record(record: &Record) -> Result<Self, ContextError> {
        Ok(User {
            name: record.require_str("name")?,
            email: record.require_str("email")?,
            phone: record.get_str("phone").map(str::to_string),
            address: record.get_str("address").map(str::to_string),
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), json!(self.name));
        attributes.insert("email".to_string(), json!(self.email));
        attributes.insert("phone".to_string(), optional(&self.phone));
        attributes.insert("address".to_string(), optional(&self.address));
        attributes
    }
}

/// Map region covering the city
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CityBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl CityBounds {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.south..=self.north).contains(&latitude) && (self.west..=self.east).contains(&longitude)
    }
}

impl Entity for CityBounds {
    const ENTITY_NAME: &'static str = "CityBounds";

    fn from_record(record: &Record) -> Result<Self, ContextError> {
        Ok(CityBounds {
            north: record.require_f64("north")?,
            south: record.require_f64("south")?,
            east: record.require_f64("east")?,
            west: record.require_f64("west")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("north".to_string(), json!(self.north));
        attributes.insert("south".to_string(), json!(self.south));
        attributes.insert("east".to_string(), json!(self.east));
        attributes.insert("west".to_string(), json!(self.west));
        attributes
    }
}

/// The Street Trees object model, built in code
pub fn street_trees_model() -> ObjectModel {
    use AttributeKind::{Boolean, Date, Double, String as Text};

    ObjectModel::builder(MODEL_NAME, 1)
        .entity(
            Tree::ENTITY_NAME,
            EntityDescription::new()
                .attribute("species", AttributeDescription::required(Text))
                .attribute("latitude", AttributeDescription::required(Double))
                .attribute("longitude", AttributeDescription::required(Double))
                .attribute("address", AttributeDescription::optional(Text))
                .attribute("planted_on", AttributeDescription::optional(Date)),
        )
        .entity(
            TreeDescription::ENTITY_NAME,
            EntityDescription::new()
                .attribute("species", AttributeDescription::required(Text))
                .attribute("common_name", AttributeDescription::required(Text))
                .attribute("description", AttributeDescription::optional(Text))
                .attribute(
                    "native",
                    AttributeDescription::required(Boolean).with_default(false),
                ),
        )
        .entity(
            User::ENTITY_NAME,
            EntityDescription::new()
                .attribute("name", AttributeDescription::required(Text))
                .attribute("email", AttributeDescription::required(Text))
                .attribute("phone", AttributeDescription::optional(Text))
                .attribute("address", AttributeDescription::optional(Text)),
        )
        .entity(
            CityBounds::ENTITY_NAME,
            EntityDescription::new()
                .attribute("north", AttributeDescription::required(Double))
                .attribute("south", AttributeDescription::required(Double))
                .attribute("east", AttributeDescription::required(Double))
                .attribute("west", AttributeDescription::required(Double)),
        )
        .build()
}
