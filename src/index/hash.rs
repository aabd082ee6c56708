use std::collections::HashMap;

use crate::core::collate::CollateOpts;
use crate::core::error::{Error, Result};
use crate::core::value::{KeyValueType, RowId, Value};
use crate::index::idset::IdSet;
use crate::index::{IndexKey, IndexOpts, KeySelect};
use crate::query::query::CondType;

/// Unordered key → IdSet map. Serves Eq and Set; everything else falls
/// through to a comparator on scan.
#[derive(Debug)]
pub struct HashIndex {
    map: HashMap<IndexKey, IdSet>,
    field_type: KeyValueType,
    collate: CollateOpts,
    unique: bool,
}

impl HashIndex {
    pub fn new(field_type: KeyValueType, opts: IndexOpts) -> Self {
        HashIndex {
            map: HashMap::new(),
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
        match cond {
            CondType::Eq | CondType::Set => {
                let mut sets = Vec::with_capacity(keys.len());
                for key in keys {
                    let k = IndexKey::make(key, self.field_type, &self.collate)?;
                    if let Some(set) = self.map.get(&k) {
                        sets.push(set.clone());
                    }
                }
                Ok(KeySelect::Ids(sets))
            }
            _ => Ok(KeySelect::Scan),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collate::CollateMode;

    #[test]
    fn eq_select_finds_rows() {
        let mut ix = HashIndex::new(KeyValueType::Int32, IndexOpts::default());
        ix.upsert(&Value::Int32(10), 1).unwrap();
        ix.upsert(&Value::Int32(10), 3).unwrap();
        ix.upsert(&Value::Int32(20), 2).unwrap();

        match ix.select(&[Value::Int32(10)], CondType::Eq).unwrap() {
            KeySelect::Ids(sets) => {
                assert_eq!(sets.len(), 1);
                assert_eq!(sets[0].as_slice(), &[1, 3]);
            }
            other => panic!("expected ids, got {:?}", other),
        }
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let mut ix = HashIndex::new(KeyValueType::Int32, IndexOpts::pk());
        ix.upsert(&Value::Int32(1), 0).unwrap();
        // Same row again is fine (update path)
        ix.upsert(&Value::Int32(1), 0).unwrap();
        let err = ix.upsert(&Value::Int32(1), 1).unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Conflict);
    }

    #[test]
    fn collated_keys_fold_case() {
        let opts = IndexOpts {
            collate: CollateOpts::new(CollateMode::Ascii),
            ..Default::default()
        };
        let mut ix = HashIndex::new(KeyValueType::String, opts);
        ix.upsert(&Value::String("Ada".into()), 5).unwrap();

        match ix
            .select(&[Value::String("aDA".into())], CondType::Eq)
            .unwrap()
        {
            KeySelect::Ids(sets) => assert_eq!(sets[0].as_slice(), &[5]),
            other => panic!("expected ids, got {:?}", other),
        }
    }

    #[test]
    fn range_falls_back_to_scan() {
        let ix = HashIndex::new(KeyValueType::Int32, IndexOpts::default());
        assert!(matches!(
            ix.select(&[Value::Int32(1), Value::Int32(5)], CondType::Range)
                .unwrap(),
            KeySelect::Scan
        ));
    }

    #[test]
    fn delete_drops_empty_keys() {
        let mut ix = HashIndex::new(KeyValueType::Int32, IndexOpts::default());
        ix.upsert(&Value::Int32(1), 7).unwrap();
        ix.delete(&Value::Int32(1), 7);
        assert_eq!(ix.unique_keys(), 0);
    }
}
