pub mod column;
pub mod composite;
pub mod fulltext;
pub mod hash;
pub mod idset;
pub mod tree;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::collate::{sort_key, CollateOpts, SortKey};
use crate::core::error::{Error, Result};
use crate::core::stats::IndexMemStat;
use crate::core::value::{KeyValueType, RowId, Value};
use crate::payload::{FieldsSet, PayloadType, PayloadValue};
use crate::query::query::CondType;

pub use idset::IdSet;

use column::ColumnIndex;
use composite::CompositeIndex;
use fulltext::FullTextIndex;
use hash::HashIndex;
use tree::TreeIndex;

/// Storage kind of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Hash,
    Tree,
    Column,
    #[serde(rename = "text")]
    FullText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexOpts {
    #[serde(default)]
    pub is_pk: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub collate: CollateOpts,
}

impl IndexOpts {
    pub fn pk() -> Self {
        IndexOpts {
            is_pk: true,
            is_unique: true,
            ..Default::default()
        }
    }

    pub fn unique() -> Self {
        IndexOpts {
            is_unique: true,
            ..Default::default()
        }
    }

    /// PK implies unique.
    pub fn enforces_unique(&self) -> bool {
        self.is_pk || self.is_unique
    }
}

/// Declarative index definition; JSON round-trippable for namespace
/// metadata and the remote adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub json_paths: Vec<String>,
    pub kind: IndexKind,
    pub field_type: KeyValueType,
    #[serde(default)]
    pub opts: IndexOpts,
}

impl IndexDef {
    pub fn new(name: &str, kind: IndexKind, field_type: KeyValueType, opts: IndexOpts) -> Self {
        IndexDef {
            name: name.to_string(),
            json_paths: vec![name.to_string()],
            kind,
            field_type,
            opts,
        }
    }

    /// Composite definitions list one json path per component field.
    pub fn composite(name: &str, kind: IndexKind, fields: &[&str], opts: IndexOpts) -> Self {
        IndexDef {
            name: name.to_string(),
            json_paths: fields.iter().map(|f| f.to_string()).collect(),
            kind,
            field_type: KeyValueType::Composite,
            opts,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.field_type == KeyValueType::Composite
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("index def serializes")
    }
}

/// Map key stored by the hash and tree backings. Strings are kept in
/// collation-normalized form so map order and equality agree with
/// `collate_compare`; doubles are kept as total-order bits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Int32(i32),
    Int64(i64),
    Double(u64),
    Str(SortKey),
}

impl IndexKey {
    pub fn make(v: &Value, field_type: KeyValueType, collate: &CollateOpts) -> Result<IndexKey> {
        let v = v.convert(field_type)?;
        Ok(match v {
            Value::Int32(x) => IndexKey::Int32(x),
            Value::Int64(x) => IndexKey::Int64(x),
            Value::Double(x) => IndexKey::Double(ord_bits(x)),
            Value::String(s) => IndexKey::Str(sort_key(&s, collate)),
            other => {
                return Err(Error::params(format!(
                    "{} can't be an index key",
                    other.value_type().name()
                )))
            }
        })
    }
}

fn ord_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

/// One key extracted from a record for indexing: a plain value per scalar
/// (or per array element), or the component tuple for a composite index.
#[derive(Debug, Clone)]
pub enum KeyEntry {
    Value(Value),
    Composite(Vec<Value>),
}

impl KeyEntry {
    pub fn eq_entry(&self, other: &KeyEntry, collate: &CollateOpts) -> bool {
        match (self, other) {
            (KeyEntry::Value(a), KeyEntry::Value(b)) => values_eq(a, b, collate),
            (KeyEntry::Composite(a), KeyEntry::Composite(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_eq(x, y, collate))
            }
            _ => false,
        }
    }
}

fn values_eq(a: &Value, b: &Value, collate: &CollateOpts) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => {
            crate::core::collate::collate_compare(x, y, collate) == std::cmp::Ordering::Equal
        }
        _ => a == b,
    }
}

/// Outcome of asking an index for a condition.
#[derive(Debug)]
pub enum KeySelect {
    /// One IdSet per requested key; the caller unions or intersects them.
    Ids(Vec<IdSet>),
    /// Match results with per-row relevance ranks.
    Ranked(IdSet, HashMap<RowId, f32>),
    /// The index can't serve this condition; evaluate a comparator on scan.
    Scan,
}

impl KeySelect {
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            KeySelect::Ids(sets) => Some(sets.iter().map(|s| s.len()).sum()),
            KeySelect::Ranked(ids, _) => Some(ids.len()),
            KeySelect::Scan => None,
        }
    }
}

#[derive(Debug)]
pub enum IndexStore {
    Hash(HashIndex),
    Tree(TreeIndex),
    Column(ColumnIndex),
    FullText(FullTextIndex),
    Composite(CompositeIndex),
}

/// An index over one field (or a field set): definition, the resolved
/// payload field indices, and the backing structure.
#[derive(Debug)]
pub struct Index {
    pub def: IndexDef,
    pub fields: FieldsSet,
    pub store: IndexStore,
}

impl Index {
    /// Build an empty index for a definition whose fields already exist in
    /// the payload type.
    pub fn build(def: IndexDef, t: &PayloadType) -> Result<Index> {
        let mut fields = FieldsSet::new();
        for path in &def.json_paths {
            let idx = t.field_by_json_path(path).ok_or_else(|| {
                Error::logic(format!("unknown field '{}' in index '{}'", path, def.name))
            })?;
            fields.push(idx);
        }
        if fields.is_empty() {
            return Err(Error::params(format!("index '{}' has no fields", def.name)));
        }

        let store = if def.is_composite() {
            IndexStore::Composite(CompositeIndex::new(
                def.kind,
                component_types(t, &fields),
                def.opts.clone(),
            ))
        } else {
            let ft = def.field_type;
            match def.kind {
                IndexKind::Hash => IndexStore::Hash(HashIndex::new(ft, def.opts.clone())),
                IndexKind::Tree => IndexStore::Tree(TreeIndex::new(ft, def.opts.clone())),
                IndexKind::Column => {
                    if def.opts.is_array {
                        // A column holds one cell per row
                        return Err(Error::params(format!(
                            "column index '{}' can't cover an array field",
                            def.name
                        )));
                    }
                    IndexStore::Column(ColumnIndex::new(ft, def.opts.clone()))
                }
                IndexKind::FullText => {
                    if ft != KeyValueType::String || def.opts.is_array {
                        return Err(Error::params(format!(
                            "full-text index '{}' requires a scalar string field",
                            def.name
                        )));
                    }
                    IndexStore::FullText(FullTextIndex::new())
                }
            }
        };

        Ok(Index { def, fields, store })
    }

    /// Keys this record contributes: one per scalar, one per array element,
    /// one component tuple for composites.
    pub fn extract_keys(&self, t: &PayloadType, pv: &PayloadValue) -> Vec<KeyEntry> {
        if self.def.is_composite() {
            let tuple = self
                .fields
                .iter()
                .map(|&f| pv.get_one(t, f).to_value())
                .collect();
            return vec![KeyEntry::Composite(tuple)];
        }
        let field = self.fields[0];
        pv.get(t, field)
            .into_iter()
            .map(|r| KeyEntry::Value(r.to_value()))
            .collect()
    }

    pub fn upsert(&mut self, key: &KeyEntry, row: RowId) -> Result<()> {
        match (&mut self.store, key) {
            (IndexStore::Hash(ix), KeyEntry::Value(v)) => ix.upsert(v, row),
            (IndexStore::Tree(ix), KeyEntry::Value(v)) => ix.upsert(v, row),
            (IndexStore::Column(ix), KeyEntry::Value(v)) => ix.upsert(v, row),
            (IndexStore::FullText(ix), KeyEntry::Value(v)) => ix.upsert(v, row),
            (IndexStore::Composite(ix), KeyEntry::Composite(vs)) => ix.upsert(vs, row),
            _ => Err(Error::logic(format!(
                "key shape mismatch for index '{}'",
                self.def.name
            ))),
        }
    }

    pub fn delete(&mut self, key: &KeyEntry, row: RowId) {
        match (&mut self.store, key) {
            (IndexStore::Hash(ix), KeyEntry::Value(v)) => ix.delete(v, row),
            (IndexStore::Tree(ix), KeyEntry::Value(v)) => ix.delete(v, row),
            (IndexStore::Column(ix), KeyEntry::Value(v)) => ix.delete(v, row),
            (IndexStore::FullText(ix), KeyEntry::Value(v)) => ix.delete(v, row),
            (IndexStore::Composite(ix), KeyEntry::Composite(vs)) => ix.delete(vs, row),
            _ => {}
        }
    }

    /// Ask the backing structure for a condition over the given keys.
    pub fn select(&self, keys: &[Value], cond: CondType) -> Result<KeySelect> {
        match &self.store {
            IndexStore::Hash(ix) => ix.select(keys, cond),
            IndexStore::Tree(ix) => ix.select(keys, cond),
            IndexStore::Column(_) => Ok(KeySelect::Scan),
            IndexStore::FullText(ix) => ix.select(keys, cond),
            IndexStore::Composite(ix) => ix.select_flat(keys, cond),
        }
    }

    /// Rebuild lazy structures (the column sort order).
    pub fn commit(&mut self) {
        if let IndexStore::Column(ix) = &mut self.store {
            ix.rebuild_sort_order();
        }
    }

    /// All rows in key order; only ordered backings can provide this.
    pub fn sorted_rows(&self, desc: bool) -> Option<Vec<RowId>> {
        match &self.store {
            IndexStore::Tree(ix) => Some(ix.sorted_rows(desc)),
            IndexStore::Column(ix) => ix.sorted_rows(desc),
            _ => None,
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self.store, IndexStore::Tree(_))
            || matches!(&self.store, IndexStore::Composite(ix) if ix.is_ordered())
    }

    pub fn unique_keys_count(&self) -> usize {
        match &self.store {
            IndexStore::Hash(ix) => ix.unique_keys(),
            IndexStore::Tree(ix) => ix.unique_keys(),
            IndexStore::Column(ix) => ix.unique_keys(),
            IndexStore::FullText(ix) => ix.unique_keys(),
            IndexStore::Composite(ix) => ix.unique_keys(),
        }
    }

    pub fn mem_stat(&self) -> IndexMemStat {
        let (ids, data) = match &self.store {
            IndexStore::Hash(ix) => ix.mem_usage(),
            IndexStore::Tree(ix) => ix.mem_usage(),
            IndexStore::Column(ix) => ix.mem_usage(),
            IndexStore::FullText(ix) => ix.mem_usage(),
            IndexStore::Composite(ix) => ix.mem_usage(),
        };
        IndexMemStat {
            name: self.def.name.clone(),
            unique_keys: self.unique_keys_count(),
            ids_size_bytes: ids,
            data_size_bytes: data,
        }
    }
}

fn component_types(t: &PayloadType, fields: &FieldsSet) -> Vec<KeyValueType> {
    fields.iter().map(|&f| t.field(f).field_type).collect()
}
