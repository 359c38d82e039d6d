//! Entity records and local query filters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypesError;
use crate::ids::EntityId;

/// Name of the identifier field in a serialized record.
pub const ID_FIELD: &str = "id";

/// Name of the tenant/owner scope field in a serialized record.
pub const OWNER_FIELD: &str = "owner_id";

/// A snapshot of one domain object (mission, invoice, vehicle, ...).
///
/// Serialized flat, the way the remote store sees a row:
/// `{"id": "...", "owner_id": "...", <entity fields>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Client-assigned identifier.
    pub id: EntityId,
    /// Tenant/owner scope, if the collection is scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Entity-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Create an empty record with the given identifier.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            owner_id: None,
            fields: Map::new(),
        }
    }

    /// Build a record from a JSON object.
    ///
    /// The object must carry a non-empty string `id`.
    pub fn from_value(value: Value) -> Result<Self, TypesError> {
        if !value.is_object() {
            return Err(TypesError::InvalidRecord(
                "record must be a JSON object".into(),
            ));
        }
        serde_json::from_value(value).map_err(|e| TypesError::InvalidRecord(e.to_string()))
    }

    /// Convert the record back into a flat JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 2);
        object.insert(ID_FIELD.into(), Value::String(self.id.to_string()));
        if let Some(owner) = &self.owner_id {
            object.insert(OWNER_FIELD.into(), Value::String(owner.clone()));
        }
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    /// Set the owner scope.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner_id = Some(owner.into());
        self
    }

    /// Insert an entity field.
    ///
    /// `id` and `owner_id` live in their typed fields and are rejected here.
    pub fn insert_field(&mut self, name: &str, value: Value) -> Result<(), TypesError> {
        if name == ID_FIELD || name == OWNER_FIELD {
            return Err(TypesError::ReservedField(name.to_string()));
        }
        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    /// Look up a field by name, including the `id` and `owner_id` fields.
    pub fn field_value(&self, name: &str) -> Option<Value> {
        match name {
            ID_FIELD => Some(Value::String(self.id.to_string())),
            OWNER_FIELD => self.owner_id.clone().map(Value::String),
            _ => self.fields.get(name).cloned(),
        }
    }
}

/// Predicate applied to cached records by local queries.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RecordFilter {
    /// Every record matches.
    #[default]
    Any,
    /// Records belonging to the given owner scope.
    Owner(String),
    /// Records whose field equals the given value.
    FieldEquals {
        /// Field name (`id` and `owner_id` are allowed).
        field: String,
        /// Expected value.
        value: Value,
    },
    /// Records matching every inner filter.
    AllOf(Vec<RecordFilter>),
}

impl RecordFilter {
    /// Shorthand for [`RecordFilter::FieldEquals`].
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Check whether a record satisfies this filter.
    pub fn matches(&self, record: &EntityRecord) -> bool {
        match self {
            Self::Any => true,
            Self::Owner(owner) => record.owner_id.as_deref() == Some(owner.as_str()),
            Self::FieldEquals { field, value } => record.field_value(field).as_ref() == Some(value),
            Self::AllOf(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}
