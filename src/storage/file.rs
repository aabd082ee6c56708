use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::core::error::Result;
use crate::payload::serializer::{Decoder, Encoder};
use crate::storage::{BatchOp, Storage};

const OP_PUT: u64 = 0;
const OP_REMOVE: u64 = 1;

/// Append-log file adapter: every write is appended as a checksummed
/// record and folded into an in-memory map; the map is rebuilt by
/// replaying the log on open. A torn tail record stops the replay instead
/// of failing it.
#[derive(Debug)]
pub struct FileStorage {
    inner: Mutex<Inner>,
    path: PathBuf,
}

#[derive(Debug)]
struct Inner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    log: File,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut map = BTreeMap::new();
        if path.exists() {
            let mut bytes = Vec::new();
            File::open(&path)?.read_to_end(&mut bytes)?;
            replay(&bytes, &mut map, &path);
        }

        let log = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileStorage {
            inner: Mutex::new(Inner { map, log }),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(inner: &mut Inner, ops: &[BatchOp]) -> Result<()> {
        let mut framed = Vec::new();
        for op in ops {
            let mut enc = Encoder::new();
            match op {
                BatchOp::Put(k, v) => {
                    enc.put_varuint(OP_PUT);
                    enc.put_bytes(k);
                    enc.put_bytes(v);
                }
                BatchOp::Remove(k) => {
                    enc.put_varuint(OP_REMOVE);
                    enc.put_bytes(k);
                }
            }
            let body = enc.into_bytes();
            framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
            framed.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
            framed.extend_from_slice(&body);
        }
        // One write call per batch keeps a crash from interleaving batches
        inner.log.write_all(&framed)?;

        for op in ops {
            match op {
                BatchOp::Put(k, v) => {
                    inner.map.insert(k.clone(), v.clone());
                }
                BatchOp::Remove(k) => {
                    inner.map.remove(k);
                }
            }
        }
        Ok(())
    }
}

fn replay(bytes: &[u8], map: &mut BTreeMap<Vec<u8>, Vec<u8>>, path: &Path) {
    let mut pos = 0;
    while pos + 8 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().expect("4 bytes")) as usize;
        let crc = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().expect("4 bytes"));
        let start = pos + 8;
        if start + len > bytes.len() {
            warn!(path = %path.display(), "truncated record at log tail, stopping replay");
            return;
        }
        let body = &bytes[start..start + len];
        if crc32fast::hash(body) != crc {
            warn!(path = %path.display(), "checksum mismatch at log tail, stopping replay");
            return;
        }

        let mut dec = Decoder::new(body);
        let mut apply = || -> Result<()> {
            match dec.get_varuint()? {
                OP_PUT => {
                    let k = dec.get_bytes()?.to_vec();
                    let v = dec.get_bytes()?.to_vec();
                    map.insert(k, v);
                }
                _ => {
                    let k = dec.get_bytes()?.to_vec();
                    map.remove(&k);
                }
            }
            Ok(())
        };
        if apply().is_err() {
            warn!(path = %path.display(), "malformed record at log tail, stopping replay");
            return;
        }
        pos = start + len;
    }
}

impl Storage for FileStorage {
    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::append(
            &mut inner,
            &[BatchOp::Put(key.to_vec(), value.to_vec())],
        )
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().map.get(key).cloned())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::append(&mut inner, &[BatchOp::Remove(key.to_vec())])
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner = self.inner.lock();
        Ok(inner
            .map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: &[BatchOp]) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::append(&mut inner, ops)
    }

    fn sync(&self) -> Result<()> {
        self.inner.lock().log.sync_all()?;
        Ok(())
    }
}
