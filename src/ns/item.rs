use std::sync::Arc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::value::{RowId, Value};
use crate::payload::{packed, PayloadType, PayloadValue};
use crate::query::dsl::json_to_value;
use crate::query::results::render_json;

/// One document: a record plus the rowId it got on insert. Items remember
/// the schema version they were built against; a structural change in
/// between invalidates them.
#[derive(Debug, Clone)]
pub struct Item {
    payload_type: Arc<PayloadType>,
    pub payload: PayloadValue,
    pub(crate) row_id: Option<RowId>,
    pub(crate) schema_version: u64,
}

impl Item {
    pub(crate) fn new(payload_type: Arc<PayloadType>, schema_version: u64) -> Self {
        let payload = PayloadValue::new(&payload_type);
        Item {
            payload_type,
            payload,
            row_id: None,
            schema_version,
        }
    }

    /// rowId assigned by Insert/Upsert; unassigned before that.
    pub fn id(&self) -> Option<RowId> {
        self.row_id
    }

    pub fn payload_type(&self) -> &PayloadType {
        &self.payload_type
    }

    /// Set a field by name, converting values to the field's type.
    pub fn set(&mut self, field: &str, values: &[Value]) -> Result<&mut Self> {
        let idx = self.payload_type.field_by_name(field)?;
        let t = self.payload_type.clone();
        self.payload.set(&t, idx, values)?;
        Ok(self)
    }

    /// Fill fields from a JSON object, matching keys against the schema's
    /// JSON paths. Unknown keys are ignored; nulls leave the default.
    pub fn from_json(&mut self, json: &str) -> Result<()> {
        self.from_json_filtered(json, None)
    }

    /// Like [`Item::from_json`] but only ingests the listed fields;
    /// `Namespace::delete_json` passes the primary key field set here so a
    /// delete payload can carry anything without being fully parsed in.
    pub fn from_json_filtered(&mut self, json: &str, only: Option<&[usize]>) -> Result<()> {
        let root: serde_json::Value = serde_json::from_str(json)?;
        let obj = root.as_object().ok_or_else(|| {
            Error::new(ErrorKind::ParseJson, "item must be a JSON object")
        })?;

        let t = self.payload_type.clone();
        for (key, val) in obj {
            let field = match t.field_by_json_path(key) {
                Some(f) => f,
                None => continue,
            };
            if let Some(filter) = only {
                if !filter.contains(&field) {
                    continue;
                }
            }
            if val.is_null() {
                continue;
            }
            let values = match val {
                serde_json::Value::Array(list) => list
                    .iter()
                    .map(json_to_value)
                    .collect::<Result<Vec<_>>>()?,
                single => vec![json_to_value(single)?],
            };
            self.payload.set(&t, field, &values)?;
        }
        Ok(())
    }

    pub fn get_json(&self) -> serde_json::Value {
        render_json(&self.payload_type, &self.payload)
    }

    /// Compact binary form, as stored in item records.
    pub fn to_packed(&self) -> Vec<u8> {
        packed::pack(&self.payload_type, &self.payload)
    }

    pub fn from_packed(&mut self, bytes: &[u8]) -> Result<()> {
        self.payload = packed::unpack(&self.payload_type, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{KeyRef, KeyValueType};
    use crate::payload::field_type::PayloadFieldType;

    fn users_type() -> Arc<PayloadType> {
        let mut t = PayloadType::new("users");
        t.add(PayloadFieldType::new("id", KeyValueType::Int32, "id", false))
            .unwrap();
        t.add(PayloadFieldType::new(
            "name",
            KeyValueType::String,
            "name",
            false,
        ))
        .unwrap();
        t.add(PayloadFieldType::new(
            "tags",
            KeyValueType::String,
            "tags",
            true,
        ))
        .unwrap();
        Arc::new(t)
    }

    #[test]
    fn json_round_trip() {
        let mut item = Item::new(users_type(), 0);
        item.from_json(r#"{"id": 1, "name": "Ada", "tags": ["x", "y"], "extra": true}"#)
            .unwrap();

        assert!(matches!(
            item.payload.get_one(item.payload_type(), 0),
            KeyRef::Int32(1)
        ));
        let out = item.get_json();
        assert_eq!(out["name"], "Ada");
        assert_eq!(out["tags"].as_array().unwrap().len(), 2);
        // Unknown keys don't round-trip
        assert!(out.get("extra").is_none());
    }

    #[test]
    fn filtered_ingest_reads_only_listed_fields() {
        let mut item = Item::new(users_type(), 0);
        item.from_json_filtered(r#"{"id": 7, "name": "Ada"}"#, Some(&[0]))
            .unwrap();
        assert!(matches!(
            item.payload.get_one(item.payload_type(), 0),
            KeyRef::Int32(7)
        ));
        assert!(matches!(
            item.payload.get_one(item.payload_type(), 1),
            KeyRef::Str("")
        ));
    }

    #[test]
    fn type_mismatch_fails() {
        let mut item = Item::new(users_type(), 0);
        let err = item.from_json(r#"{"id": "ada"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Params);
    }

    #[test]
    fn not_an_object_fails() {
        let mut item = Item::new(users_type(), 0);
        assert_eq!(
            item.from_json("[1, 2]").unwrap_err().kind,
            ErrorKind::ParseJson
        );
    }

    #[test]
    fn packed_round_trip() {
        let mut item = Item::new(users_type(), 0);
        item.from_json(r#"{"id": 3, "name": "Bo"}"#).unwrap();
        let bytes = item.to_packed();

        let mut back = Item::new(users_type(), 0);
        back.from_packed(&bytes).unwrap();
        assert_eq!(back.get_json(), item.get_json());
    }
}
