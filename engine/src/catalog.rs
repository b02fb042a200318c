//! Entity type catalog and payload validation.
//!
//! The catalog names every mirrored entity type, the internal endpoint its
//! mutations are sent to, and the fields a local write must carry. Local
//! writes are validated before they are enqueued so an obviously malformed
//! payload never reaches the queue.

use crate::{error::Result, EntityType, Error, NewOperation, OpKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value kinds a catalog field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Calendar date as `YYYY-MM-DD`, the backend's format for log dates
    Date,
    /// Arbitrary nested JSON
    Json,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Json => "json",
        }
    }

    fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Date => value.as_str().is_some_and(is_iso_date),
            FieldType::Json => true,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `YYYY-MM-DD`, digits only; the calendar itself is the backend's concern.
fn is_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

/// One field of an entity payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// A local write must carry a non-null value
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// Check the value a payload carries for this field, if any.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ if self.required => return Err(Error::MissingRequiredField(self.name.clone())),
            _ => return Ok(()),
        };

        if self.field_type.accepts(value) {
            return Ok(());
        }
        Err(Error::TypeMismatch {
            field: self.name.clone(),
            expected: self.field_type.to_string(),
            got: json_kind(value).to_string(),
        })
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Definition of one mirrored entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDef {
    /// Entity type name, also the local collection name
    pub name: EntityType,
    /// Internal collection endpoint, e.g. `/api/v1/cows`
    pub endpoint: String,
    /// Internal response field holding the list on collection reads
    pub list_field: Option<String>,
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<EntityType>, endpoint: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            list_field: None,
            fields,
        }
    }

    /// Builder-style method naming the list envelope field.
    pub fn with_list_field(mut self, field: impl Into<String>) -> Self {
        self.list_field = Some(field.into());
        self
    }

    /// Path of a single entity, e.g. `/api/v1/cows/42`.
    pub fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), id)
    }

    /// Validate a payload against this definition.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<()> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }
}

/// All entity types known to the data layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub entities: HashMap<EntityType, EntityDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity type to the catalog.
    pub fn add_entity(&mut self, def: EntityDef) -> &mut Self {
        self.entities.insert(def.name.clone(), def);
        self
    }

    /// Builder-style method to add an entity type.
    pub fn with_entity(mut self, def: EntityDef) -> Self {
        self.add_entity(def);
        self
    }

    /// Look up an entity type.
    pub fn get(&self, name: &str) -> Result<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntityType(name.to_string()))
    }

    /// Validate an operation before it is enqueued.
    ///
    /// Only a create carries a whole record. An update carries changes, so its
    /// payload is checked once it has been overlaid onto the stored entity.
    pub fn validate_operation(&self, op: &NewOperation) -> Result<()> {
        let def = self.get(&op.entity_type)?;
        match op.kind {
            OpKind::Create => def.validate_payload(&op.payload),
            OpKind::Update | OpKind::Delete => Ok(()),
        }
    }

    /// The catalog of the field application: animals, feeds, diets, milk
    /// logs, farmer profiles and yield records.
    pub fn standard() -> Self {
        Self::new()
            .with_entity(
                EntityDef::new(
                    "cow",
                    "/api/v1/cows",
                    vec![
                        FieldDef::required("name", FieldType::String),
                        FieldDef::optional("breed", FieldType::String),
                        FieldDef::optional("weight_kg", FieldType::Float),
                        FieldDef::optional("milk_yield_liters", FieldType::Float),
                        FieldDef::optional("is_pregnant", FieldType::Bool),
                    ],
                )
                .with_list_field("cows"),
            )
            .with_entity(EntityDef::new(
                "feed",
                "/api/v1/feeds/custom",
                vec![
                    FieldDef::required("name", FieldType::String),
                    FieldDef::optional("category", FieldType::String),
                    FieldDef::optional("dm_percentage", FieldType::Float),
                    FieldDef::optional("price_per_kg", FieldType::Float),
                ],
            ))
            .with_entity(
                EntityDef::new(
                    "diet",
                    "/api/v1/diet",
                    vec![
                        FieldDef::optional("cow_id", FieldType::String),
                        FieldDef::optional("optimization_goal", FieldType::String),
                        FieldDef::optional("input_data", FieldType::Json),
                    ],
                )
                .with_list_field("diets"),
            )
            .with_entity(
                EntityDef::new(
                    "milk_log",
                    "/api/v1/milk-logs",
                    vec![
                        FieldDef::required("cow_id", FieldType::String),
                        FieldDef::required("log_date", FieldType::Date),
                        FieldDef::optional("total_liters", FieldType::Float),
                    ],
                )
                .with_list_field("milkLogs"),
            )
            .with_entity(EntityDef::new(
                "farmer",
                "/api/v1/farmer-profiles",
                vec![
                    FieldDef::required("name", FieldType::String),
                    FieldDef::optional("village", FieldType::String),
                    FieldDef::optional("total_cattle", FieldType::Int),
                ],
            ))
            .with_entity(EntityDef::new(
                "yield",
                "/api/v1/yield-data",
                vec![
                    FieldDef::required("farmer_profile_id", FieldType::String),
                    FieldDef::required("collection_date", FieldType::Date),
                    FieldDef::optional("milk_yield_liters", FieldType::Float),
                ],
            ))
    }
}
