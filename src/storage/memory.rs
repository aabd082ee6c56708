use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::error::Result;
use crate::storage::{BatchOp, Storage};

/// Storage adapter that keeps everything in a sorted map. Used by pure
/// in-memory namespaces and as the reference implementation in tests.
#[derive(Debug, Default)]
pub struct MemStorage {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        MemStorage::default()
    }
}

impl Storage for MemStorage {
    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.map.lock().remove(key);
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.lock();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: &[BatchOp]) -> Result<()> {
        let mut map = self.map.lock();
        for op in ops {
            match op {
                BatchOp::Put(k, v) => {
                    map.insert(k.clone(), v.clone());
                }
                BatchOp::Remove(k) => {
                    map.remove(k);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_iteration_is_ordered() {
        let s = MemStorage::new();
        s.write(b"I:0000000002", b"b").unwrap();
        s.write(b"I:0000000001", b"a").unwrap();
        s.write(b"M:", b"meta").unwrap();

        let items = s.iter_prefix(b"I:").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].1, b"a");
        assert_eq!(items[1].1, b"b");
    }

    #[test]
    fn batch_applies_all_ops() {
        let s = MemStorage::new();
        s.write(b"x", b"1").unwrap();
        s.write_batch(&[
            BatchOp::Put(b"y".to_vec(), b"2".to_vec()),
            BatchOp::Remove(b"x".to_vec()),
        ])
        .unwrap();
        assert_eq!(s.read(b"y").unwrap(), Some(b"2".to_vec()));
        assert_eq!(s.read(b"x").unwrap(), None);
    }
}
