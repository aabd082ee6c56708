use std::collections::{BTreeMap, HashMap};

use crate::core::collate::CollateOpts;
use crate::core::error::{Error, Result};
use crate::core::value::{KeyValueType, RowId, Value};
use crate::index::idset::IdSet;
use crate::index::{IndexKey, IndexKind, IndexOpts, KeySelect};
use crate::query::query::CondType;

/// Tuple key over a set of payload fields, compared component by
/// component. Backed by a hash map or an ordered map depending on the
/// declared kind; the ordered backing additionally serves ranges.
#[derive(Debug)]
pub struct CompositeIndex {
    store: CompositeStore,
    component_types: Vec<KeyValueType>,
    collate: CollateOpts,
    unique: bool,
}

#[derive(Debug)]
enum CompositeStore {
    Hash(HashMap<Vec<IndexKey>, IdSet>),
    Tree(BTreeMap<Vec<IndexKey>, IdSet>),
}

impl CompositeIndex {
    pub fn new(kind: IndexKind, component_types: Vec<KeyValueType>, opts: IndexOpts) -> Self {
        let store = match kind {
            IndexKind::Tree => CompositeStore::Tree(BTreeMap::new()),
            _ => CompositeStore::Hash(HashMap::new()),
        };
        CompositeIndex {
            store,
            component_types,
            collate: opts.collate.clone(),
            unique: opts.enforces_unique(),
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self.store, CompositeStore::Tree(_))
    }

    pub fn arity(&self) -> usize {
        self.component_types.len()
    }

    /// The canonical tuple form of a component list; equality and hashing
    /// of composite keys go through this.
    pub fn make_key(&self, components: &[Value]) -> Result<Vec<IndexKey>> {
        if components.len() != self.component_types.len() {
            return Err(Error::params(format!(
                "composite key needs {} components, got {}",
                self.component_types.len(),
                components.len()
            )));
        }
        components
            .iter()
            .zip(&self.component_types)
            .map(|(v, &t)| IndexKey::make(v, t, &self.collate))
            .collect()
    }

    pub fn upsert(&mut self, components: &[Value], row: RowId) -> Result<()> {
        let key = self.make_key(components)?;
        let set = match &mut self.store {
            CompositeStore::Hash(m) => m.entry(key).or_default(),
            CompositeStore::Tree(m) => m.entry(key).or_default(),
        };
        if self.unique && !set.is_empty() && !set.contains(row) {
            return Err(Error::conflict("duplicate key in unique composite index"));
        }
        set.add(row);
        Ok(())
    }

    pub fn delete(&mut self, components: &[Value], row: RowId) {
        if let Ok(key) = self.make_key(components) {
            let emptied = match &mut self.store {
                CompositeStore::Hash(m) => match m.get_mut(&key) {
                    Some(set) => {
                        set.remove(row);
                        set.is_empty()
                    }
                    None => false,
                },
                CompositeStore::Tree(m) => match m.get_mut(&key) {
                    Some(set) => {
                        set.remove(row);
                        set.is_empty()
                    }
                    None => false,
                },
            };
            if emptied {
                match &mut self.store {
                    CompositeStore::Hash(m) => {
                        m.remove(&key);
                    }
                    CompositeStore::Tree(m) => {
                        m.remove(&key);
                    }
                }
            }
        }
    }

    /// Select over a flat component list: Eq takes one tuple, Set any
    /// multiple of the arity, Range two tuples (ordered backing only).
    pub fn select_flat(&self, keys: &[Value], cond: CondType) -> Result<KeySelect> {
        let arity = self.arity();
        if arity == 0 || keys.len() % arity != 0 {
            return Err(Error::params(format!(
                "composite condition values must come in groups of {}",
                arity
            )));
        }
        let tuples: Vec<&[Value]> = keys.chunks(arity).collect();

        match cond {
            CondType::Eq | CondType::Set => {
                let mut sets = Vec::new();
                for tuple in tuples {
                    let key = self.make_key(tuple)?;
                    let found = match &self.store {
                        CompositeStore::Hash(m) => m.get(&key),
                        CompositeStore::Tree(m) => m.get(&key),
                    };
                    if let Some(set) = found {
                        sets.push(set.clone());
                    }
                }
                Ok(KeySelect::Ids(sets))
            }
            CondType::Range => {
                let m = match &self.store {
                    CompositeStore::Tree(m) => m,
                    CompositeStore::Hash(_) => return Ok(KeySelect::Scan),
                };
                if tuples.len() != 2 {
                    return Err(Error::params("composite range needs two tuples"));
                }
                let lo = self.make_key(tuples[0])?;
                let hi = self.make_key(tuples[1])?;
                let mut sets = Vec::new();
                if lo <= hi {
                    for set in m.range(lo..=hi).map(|(_, s)| s) {
                        sets.push(set.clone());
                    }
                }
                Ok(KeySelect::Ids(sets))
            }
            _ => Ok(KeySelect::Scan),
        }
    }

    pub fn unique_keys(&self) -> usize {
        match &self.store {
            CompositeStore::Hash(m) => m.len(),
            CompositeStore::Tree(m) => m.len(),
        }
    }

    pub fn mem_usage(&self) -> (usize, usize) {
        let (ids, keys) = match &self.store {
            CompositeStore::Hash(m) => (
                m.values().map(|s| s.heap_size()).sum::<usize>(),
                m.keys().map(|k| k.len()).sum::<usize>(),
            ),
            CompositeStore::Tree(m) => (
                m.values().map(|s| s.heap_size()).sum::<usize>(),
                m.keys().map(|k| k.len()).sum::<usize>(),
            ),
        };
        (ids, keys * std::mem::size_of::<IndexKey>())
    }
}
