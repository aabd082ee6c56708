use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::Result;
use crate::core::value::RowId;
use crate::storage::{wal_key, BatchOp, Storage, WAL_PREFIX};

/// When appended records reach durable media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// fsync after every append
    Immediate,
    /// fsync at commit points
    Batch,
    /// Let the OS handle it
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    ItemUpsert { row: RowId, packed: Vec<u8> },
    ItemDelete { row: RowId },
    Commit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub op: WalOp,
    pub timestamp: DateTime<Utc>,
}

/// Append-only mutation log written through the storage adapter as
/// `W:<seq>` entries. Records carry a checksum; replay stops at the first
/// record that fails it.
#[derive(Debug)]
pub struct Wal {
    storage: Arc<dyn Storage>,
    sequence: u64,
    /// Everything below this seq has been folded into `I:` records.
    checkpoint: u64,
    sync_mode: SyncMode,
}

impl Wal {
    pub fn open(storage: Arc<dyn Storage>, sync_mode: SyncMode) -> Result<Self> {
        let mut sequence = 0;
        for (key, _) in storage.iter_prefix(WAL_PREFIX)? {
            if let Some(seq) = crate::storage::parse_wal_key(&key) {
                sequence = sequence.max(seq + 1);
            }
        }
        Ok(Wal {
            storage,
            sequence,
            checkpoint: sequence,
            sync_mode,
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn append(&mut self, op: WalOp) -> Result<u64> {
        let record = WalRecord {
            seq: self.sequence,
            op,
            timestamp: Utc::now(),
        };
        let body = bincode::serialize(&record)?;
        let mut framed = Vec::with_capacity(body.len() + 4);
        framed.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        framed.extend_from_slice(&body);

        self.storage.write(&wal_key(self.sequence), &framed)?;
        self.sequence += 1;

        if self.sync_mode == SyncMode::Immediate {
            self.storage.sync()?;
        }
        Ok(self.sequence - 1)
    }

    /// Records appended since the last checkpoint, in sequence order.
    pub fn replay(&self) -> Result<Vec<WalRecord>> {
        let mut records = Vec::new();
        for (key, framed) in self.storage.iter_prefix(WAL_PREFIX)? {
            if framed.len() < 4 {
                warn!("short record in mutation log, stopping replay");
                break;
            }
            let crc = u32::from_le_bytes(framed[..4].try_into().expect("4 bytes"));
            let body = &framed[4..];
            if crc32fast::hash(body) != crc {
                warn!(key = ?String::from_utf8_lossy(&key), "checksum mismatch in mutation log, stopping replay");
                break;
            }
            match bincode::deserialize::<WalRecord>(body) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(error = %e, "undecodable record in mutation log, stopping replay");
                    break;
                }
            }
        }
        Ok(records)
    }

    /// Checkpoint: everything up to the current sequence is durable in the
    /// item records, so the log entries behind it can go.
    pub fn truncate(&mut self) -> Result<()> {
        let mut ops = Vec::new();
        for seq in self.checkpoint..self.sequence {
            ops.push(BatchOp::Remove(wal_key(seq)));
        }
        if !ops.is_empty() {
            self.storage.write_batch(&ops)?;
        }
        self.checkpoint = self.sequence;
        if self.sync_mode != SyncMode::None {
            self.storage.sync()?;
        }
        Ok(())
    }
}
