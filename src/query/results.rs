use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::core::value::{KeyRef, RowId, Value};
use crate::payload::{PayloadType, PayloadValue};
use crate::query::query::AggType;

/// Rows of one join spec attached to one main row, rendered while the
/// joined namespace's read lock was held.
#[derive(Debug, Clone)]
pub struct JoinedRows {
    pub namespace: String,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct FacetBucket {
    pub value: Value,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct AggResult {
    pub agg: AggType,
    pub field: String,
    /// min/max/sum/avg land here.
    pub value: Option<f64>,
    pub facets: Vec<FacetBucket>,
    pub distinct: Vec<Value>,
}

impl AggResult {
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = json!({
            "type": self.agg.name(),
            "field": self.field,
        });
        if let Some(v) = self.value {
            out["value"] = json!(v);
        }
        if self.agg == AggType::Facet {
            out["facets"] = serde_json::Value::Array(
                self.facets
                    .iter()
                    .map(|f| json!({"value": value_json(&f.value), "count": f.count}))
                    .collect(),
            );
        }
        if self.agg == AggType::Distinct {
            out["distinct"] =
                serde_json::Value::Array(self.distinct.iter().map(value_json).collect());
        }
        out
    }
}

/// Result of one select: matched payloads in final order, the total match
/// count, aggregations, and any joined rows keyed by main rowId.
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    pub payload_type: Arc<PayloadType>,
    pub items: Vec<(RowId, PayloadValue)>,
    pub total_count: usize,
    pub aggregations: Vec<AggResult>,
    pub joined: HashMap<RowId, Vec<JoinedRows>>,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ResultItem<'_>> {
        self.items.iter().map(move |(row_id, payload)| ResultItem {
            row_id: *row_id,
            payload,
            results: self,
        })
    }

    /// `{items, total_items, aggregations?}` as served at the boundary.
    pub fn to_json(&self) -> serde_json::Value {
        let items: Vec<serde_json::Value> = self.iter().map(|it| it.get_json()).collect();
        let mut out = json!({
            "items": items,
            "total_items": self.total_count,
        });
        if !self.aggregations.is_empty() {
            out["aggregations"] = serde_json::Value::Array(
                self.aggregations.iter().map(|a| a.to_json()).collect(),
            );
        }
        out
    }
}

pub struct ResultItem<'a> {
    pub row_id: RowId,
    pub payload: &'a PayloadValue,
    results: &'a QueryResults,
}

impl<'a> ResultItem<'a> {
    pub fn get_json(&self) -> serde_json::Value {
        let mut obj = render_json(&self.results.payload_type, self.payload);
        if let Some(joins) = self.results.joined.get(&self.row_id) {
            for j in joins {
                obj[format!("joined_{}", j.namespace)] =
                    serde_json::Value::Array(j.rows.clone());
            }
        }
        obj
    }
}

/// Render one record as a JSON object, field by field.
pub fn render_json(t: &PayloadType, pv: &PayloadValue) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    for (i, f) in t.fields().iter().enumerate() {
        if f.is_array {
            let elems: Vec<serde_json::Value> =
                pv.get(t, i).iter().map(key_ref_json).collect();
            obj.insert(f.name.clone(), serde_json::Value::Array(elems));
        } else {
            obj.insert(f.name.clone(), key_ref_json(&pv.get_one(t, i)));
        }
    }
    serde_json::Value::Object(obj)
}

fn key_ref_json(r: &KeyRef<'_>) -> serde_json::Value {
    match r {
        KeyRef::Int32(v) => json!(v),
        KeyRef::Int64(v) => json!(v),
        KeyRef::Double(v) => json!(v),
        KeyRef::Str(s) => json!(s),
        KeyRef::Composite(_) | KeyRef::Null => serde_json::Value::Null,
    }
}

pub fn value_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Int32(x) => json!(x),
        Value::Int64(x) => json!(x),
        Value::Double(x) => json!(x),
        Value::String(s) => json!(s),
        Value::Composite(_) | Value::Null => serde_json::Value::Null,
    }
}
