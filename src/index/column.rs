use crate::core::collate::CollateOpts;
use crate::core::error::Result;
use crate::core::value::{KeyValueType, RowId, Value};
use crate::index::IndexOpts;

/// RowId-aligned value column. There is no key → set map: selects scan the
/// column with a comparator, which wins when selectivity is low. `commit`
/// rebuilds a sorted row permutation used for cheap unfiltered ORDER BY.
#[derive(Debug)]
pub struct ColumnIndex {
    values: Vec<Value>,
    occupied: usize,
    field_type: KeyValueType,
    collate: CollateOpts,
    sort_order: Vec<RowId>,
    sort_order_valid: bool,
}

impl ColumnIndex {
    pub fn new(field_type: KeyValueType, opts: IndexOpts) -> Self {
        ColumnIndex {
            values: Vec::new(),
            occupied: 0,
            field_type,
            collate: opts.collate.clone(),
            sort_order: Vec::new(),
            sort_order_valid: false,
        }
    }

    pub fn upsert(&mut self, key: &Value, row: RowId) -> Result<()> {
        let key = key.convert(self.field_type)?;
        let idx = row as usize;
        if idx >= self.values.len() {
            self.values.resize(idx + 1, Value::Null);
        }
        if self.values[idx].is_null() {
            self.occupied += 1;
        }
        self.values[idx] = key;
        self.sort_order_valid = false;
        Ok(())
    }

    pub fn delete(&mut self, _key: &Value, row: RowId) {
        let idx = row as usize;
        if idx < self.values.len() && !self.values[idx].is_null() {
            self.values[idx] = Value::Null;
            self.occupied -= 1;
            self.sort_order_valid = false;
        }
    }

    /// Raw cell for comparator-on-column evaluation; Null means the row
    /// holds no value here.
    pub fn value(&self, row: RowId) -> Option<&Value> {
        match self.values.get(row as usize) {
            Some(v) if !v.is_null() => Some(v),
            _ => None,
        }
    }

    /// Recompute the sorted permutation of occupied rows.
    pub fn rebuild_sort_order(&mut self) {
        let collate = self.collate.clone();
        let mut rows: Vec<RowId> = (0..self.values.len() as RowId)
            .filter(|&r| !self.values[r as usize].is_null())
            .collect();
        rows.sort_by(|&a, &b| {
            let va = &self.values[a as usize];
            let vb = &self.values[b as usize];
            va.as_key_ref()
                .compare(&vb.as_key_ref(), &collate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        self.sort_order = rows;
        self.sort_order_valid = true;
    }

    /// Rows in value order, if `commit` ran since the last mutation.
    pub fn sorted_rows(&self, desc: bool) -> Option<Vec<RowId>> {
        if !self.sort_order_valid {
            return None;
        }
        if desc {
            Some(self.sort_order.iter().rev().copied().collect())
        } else {
            Some(self.sort_order.clone())
        }
    }

    pub fn unique_keys(&self) -> usize {
        // Column keeps no key map; occupied rows is the honest figure.
        self.occupied
    }

    pub fn mem_usage(&self) -> (usize, usize) {
        let data = self.values.capacity() * std::mem::size_of::<Value>()
            + self
                .values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.len(),
                    _ => 0,
                })
                .sum::<usize>();
        let ids = self.sort_order.capacity() * std::mem::size_of::<RowId>();
        (ids, data)
    }
}
