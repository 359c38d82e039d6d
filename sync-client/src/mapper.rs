//! Field mapping between application types and [`EntityRecord`].
//!
//! The repository only ever stores and sends records; a mapper converts the
//! application's own entity type at the boundary.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use sync_types::EntityRecord;

use crate::error::ClientError;

/// Converts one application entity type to and from records.
pub trait EntityMapper: Send + Sync {
    /// The application-side type.
    type Entity: Send + Sync;

    /// Build the record stored locally and sent to the remote.
    fn to_record(&self, entity: &Self::Entity) -> Result<EntityRecord, ClientError>;

    /// Rebuild the entity from a stored or fetched record.
    fn from_record(&self, record: &EntityRecord) -> Result<Self::Entity, ClientError>;
}

/// Identity mapper for callers that work with records directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMapper;

impl EntityMapper for RecordMapper {
    type Entity = EntityRecord;

    fn to_record(&self, entity: &EntityRecord) -> Result<EntityRecord, ClientError> {
        Ok(entity.clone())
    }

    fn from_record(&self, record: &EntityRecord) -> Result<EntityRecord, ClientError> {
        Ok(record.clone())
    }
}

/// Mapper for any serde type whose JSON form carries an `id` field.
///
/// Optional renames translate application field names to remote column
/// names (`vehicleId` → `vehicle_id`).
pub struct SerdeMapper<T> {
    renames: Vec<(String, String)>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> SerdeMapper<T> {
    /// Mapper with no renames.
    pub fn new() -> Self {
        Self {
            renames: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Rename `field` (application side) to `column` (record side).
    pub fn with_rename(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.renames.push((field.into(), column.into()));
        self
    }

    fn rename(&self, object: Map<String, Value>, to_record: bool) -> Map<String, Value> {
        if self.renames.is_empty() {
            return object;
        }
        object
            .into_iter()
            .map(|(key, value)| {
                let renamed = self.renames.iter().find_map(|(field, column)| {
                    let (from, to) = if to_record {
                        (field, column)
                    } else {
                        (column, field)
                    };
                    (*from == key).then(|| to.clone())
                });
                (renamed.unwrap_or(key), value)
            })
            .collect()
    }
}

impl<T> Default for SerdeMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SerdeMapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerdeMapper")
            .field("entity", &std::any::type_name::<T>())
            .field("renames", &self.renames)
            .finish()
    }
}

impl<T> EntityMapper for SerdeMapper<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    type Entity = T;

    fn to_record(&self, entity: &T) -> Result<EntityRecord, ClientError> {
        let value = serde_json::to_value(entity).map_err(|e| ClientError::Mapping(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(ClientError::Mapping(format!(
                "{} does not serialize to a JSON object",
                std::any::type_name::<T>()
            )));
        };
        EntityRecord::from_value(Value::Object(self.rename(object, true)))
            .map_err(|e| ClientError::Mapping(e.to_string()))
    }

    fn from_record(&self, record: &EntityRecord) -> Result<T, ClientError> {
        let Value::Object(object) = record.to_value() else {
            return Err(ClientError::Mapping("record is not a JSON object".into()));
        };
        serde_json::from_value(Value::Object(self.rename(object, false)))
            .map_err(|e| ClientError::Mapping(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Mission {
        id: String,
        #[serde(rename = "vehicleId")]
        vehicle_id: Option<String>,
        status: String,
    }

    fn mission() -> Mission {
        Mission {
            id: "m-1".into(),
            vehicle_id: Some("v-1".into()),
            status: "PLANNED".into(),
        }
    }

    #[test]
    fn record_mapper_is_identity() {
        let record = EntityRecord::from_value(json!({"id": "m-1", "status": "PLANNED"})).unwrap();
        let mapper = RecordMapper;
        assert_eq!(mapper.to_record(&record).unwrap(), record);
        assert_eq!(mapper.from_record(&record).unwrap(), record);
    }

    #[test]
    fn serde_mapper_applies_renames_both_ways() {
        let mapper = SerdeMapper::<Mission>::new().with_rename("vehicleId", "vehicle_id");

        let record = mapper.to_record(&mission()).unwrap();
        assert_eq!(record.id.as_str(), "m-1");
        assert_eq!(record.field_value("vehicle_id"), Some(json!("v-1")));
        assert!(record.field_value("vehicleId").is_none());

        assert_eq!(mapper.from_record(&record).unwrap(), mission());
    }

    #[test]
    fn entity_without_id_is_a_mapping_error() {
        #[derive(Serialize, Deserialize)]
        struct NoId {
            name: String,
        }
        let mapper = SerdeMapper::<NoId>::new();
        let err = mapper
            .to_record(&NoId {
                name: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::Mapping(_)));
    }

    #[test]
    fn non_object_entity_is_rejected() {
        let mapper = SerdeMapper::<String>::new();
        assert!(matches!(
            mapper.to_record(&"m-1".to_string()),
            Err(ClientError::Mapping(_))
        ));
    }

    #[test]
    fn record_missing_required_field_fails_to_map() {
        let mapper = SerdeMapper::<Mission>::new();
        let record = EntityRecord::from_value(json!({"id": "m-1"})).unwrap();
        assert!(matches!(
            mapper.from_record(&record),
            Err(ClientError::Mapping(_))
        ));
    }
}
