use std::collections::BTreeMap;
use std::ops::Bound;

use crate::core::collate::CollateOpts;
use crate::core::error::{Error, Result};
use crate::core::value::{KeyValueType, RowId, Value};
use crate::index::idset::IdSet;
use crate::index::{IndexKey, IndexOpts, KeySelect};
use crate::query::query::CondType;

/// Ordered key → IdSet map. Serves every ordering condition and can emit
/// rows pre-sorted by key, which the planner exploits for ORDER BY.
#[derive(Debug)]
pub struct TreeIndex {
    map: BTreeMap<IndexKey, IdSet>,
    field_type: KeyValueType,
    collate: CollateOpts,
    unique: bool,
}

impl TreeIndex {
    pub fn new(field_type: KeyValueType, opts: IndexOpts) -> Self {
        TreeIndex {
            map: BTreeMap::new(),
            field_type,
            collate: opts.collate.clone(),
            unique: opts.enforces_unique(),
        }
    }

    pub fn upsert(&mut self, key: &Value, row: RowId) -> Result<()> {
        let k = IndexKey::make(key, self.field_type, &self.collate)?;
        let set = self.map.entry(k).or_default();
        if self.unique && !set.is_empty() && !set.contains(row) {
            return Err(Error::conflict(format!(
                "duplicate key in unique index: {:?}",
                key
            )));
        }
        set.add(row);
        Ok(())
    }

    pub fn delete(&mut self, key: &Value, row: RowId) {
        if let Ok(k) = IndexKey::make(key, self.field_type, &self.collate) {
            if let Some(set) = self.map.get_mut(&k) {
                set.remove(row);
                if set.is_empty() {
                    self.map.remove(&k);
                }
            }
        }
    }

    pub fn select(&self, keys: &[Value], cond: CondType) -> Result<KeySelect> {
        let mut sets = Vec::new();
        match cond {
            CondType::Eq | CondType::Set => {
                for key in keys {
                    let k = IndexKey::make(key, self.field_type, &self.collate)?;
                    if let Some(set) = self.map.get(&k) {
                        sets.push(set.clone());
                    }
                }
            }
            CondType::Lt | CondType::Le | CondType::Gt | CondType::Ge => {
                let key = keys
                    .first()
                    .ok_or_else(|| Error::params("ordering condition needs a value"))?;
                let k = IndexKey::make(key, self.field_type, &self.collate)?;
                let range: (Bound<&IndexKey>, Bound<&IndexKey>) = match cond {
                    CondType::Lt => (Bound::Unbounded, Bound::Excluded(&k)),
                    CondType::Le => (Bound::Unbounded, Bound::Included(&k)),
                    CondType::Gt => (Bound::Excluded(&k), Bound::Unbounded),
                    _ => (Bound::Included(&k), Bound::Unbounded),
                };
                for set in self.map.range(range).map(|(_, s)| s) {
                    sets.push(set.clone());
                }
            }
            CondType::Range => {
                if keys.len() < 2 {
                    return Err(Error::params("range condition needs two values"));
                }
                let lo = IndexKey::make(&keys[0], self.field_type, &self.collate)?;
                let hi = IndexKey::make(&keys[1], self.field_type, &self.collate)?;
                // Inverted bounds give the empty result, not an error
                if lo <= hi {
                    for set in self.map.range(lo..=hi).map(|(_, s)| s) {
                        sets.push(set.clone());
                    }
                }
            }
            _ => return Ok(KeySelect::Scan),
        }
        Ok(KeySelect::Ids(sets))
    }

    /// All rows ordered by key; rows under one key stay in ascending rowId
    /// order either way.
    pub fn sorted_rows(&self, desc: bool) -> Vec<RowId> {
        let mut out = Vec::new();
        if desc {
            for set in self.map.values().rev() {
                out.extend(set.iter());
            }
        } else {
            for set in self.map.values() {
                out.extend(set.iter());
            }
        }
        out
    }

    pub fn unique_keys(&self) -> usize {
        self.map.len()
    }

    pub fn mem_usage(&self) -> (usize, usize) {
        let ids = self.map.values().map(|s| s.heap_size()).sum();
        let data = self.map.len() * std::mem::size_of::<IndexKey>();
        (ids, data)
    }
}
