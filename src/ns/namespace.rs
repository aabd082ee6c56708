use std::collections::HashSet;
use std::sync::Arc;

use roaring::RoaringBitmap;
use tracing::{debug, info};

use crate::cache::{JoinCache, QueryCache};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{NamespaceStat, PerfCounters};
use crate::core::value::{RowId, Value};
use crate::index::{Index, IndexDef, KeyEntry, KeySelect};
use crate::ns::item::Item;
use crate::payload::field_type::PayloadFieldType;
use crate::payload::serializer::{Decoder, Encoder};
use crate::payload::{packed, PayloadType, PayloadValue};
use crate::query::plan::{self, JoinCtx};
use crate::query::query::{CondType, Query};
use crate::query::results::QueryResults;
use crate::storage::wal::{Wal, WalOp, WalRecord};
use crate::storage::{item_key, parse_item_key, BatchOp, Storage, ITEM_PREFIX, META_KEY};

/// Declarative namespace definition: a name plus the index set that also
/// carries the field schema.
#[derive(Debug, Clone)]
pub struct NamespaceDef {
    pub name: String,
    pub indexes: Vec<IndexDef>,
}

/// Definition dump of a live namespace: its name, the payload fields in
/// schema order, and every index definition. The runtime counters live in
/// [`crate::core::stats::NamespaceStat`] instead.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NamespaceDescription {
    pub name: String,
    pub fields: Vec<PayloadFieldType>,
    pub indexes: Vec<IndexDef>,
}

impl NamespaceDef {
    pub fn new(name: &str) -> Self {
        NamespaceDef {
            name: name.to_string(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, def: IndexDef) -> Self {
        self.indexes.push(def);
        self
    }
}

enum WriteMode {
    Insert,
    Update,
    Upsert,
}

/// The per-collection runtime: payload schema, the dense item vector, the
/// index set (index 0 is the primary key), caches, perf counters and the
/// mutation log. The owning registry wraps it in a reader-writer lock;
/// methods taking `&mut self` expect the exclusive side.
pub struct Namespace {
    pub name: String,
    pub(crate) payload_type: Arc<PayloadType>,
    pub(crate) items: Vec<PayloadValue>,
    pub(crate) free_list: Vec<RowId>,
    /// Shadows the free-list so scans can skip holes without probing
    /// payloads.
    pub(crate) deleted: RoaringBitmap,
    pub(crate) indexes: Vec<Index>,
    /// Bumped on every mutation and structural change; cache keys embed it.
    pub(crate) version: u64,
    /// Bumped on structural changes only; items carry it.
    pub(crate) schema_version: u64,
    pub(crate) query_cache: QueryCache,
    pub(crate) join_cache: JoinCache,
    pub(crate) max_facet_buckets: usize,
    pub(crate) perf: PerfCounters,
    wal: Option<Wal>,
    storage: Option<Arc<dyn Storage>>,
    /// Rows touched since the last commit.
    dirty: HashSet<RowId>,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("items", &self.items.len())
            .field("indexes", &self.indexes.len())
            .field("version", &self.version)
            .finish()
    }
}

impl Namespace {
    pub fn open(
        def: NamespaceDef,
        config: &Config,
        storage: Option<Arc<dyn Storage>>,
    ) -> Result<Namespace> {
        let mut ns = Namespace {
            name: def.name.clone(),
            payload_type: Arc::new(PayloadType::new(&def.name)),
            items: Vec::new(),
            free_list: Vec::new(),
            deleted: RoaringBitmap::new(),
            indexes: Vec::new(),
            version: 0,
            schema_version: 0,
            query_cache: QueryCache::new(config.query_cache_items, config.cache_hit_threshold),
            join_cache: JoinCache::new(config.join_cache_items, config.cache_hit_threshold),
            max_facet_buckets: config.max_facet_buckets,
            perf: PerfCounters::default(),
            wal: None,
            storage: storage.clone(),
            dirty: HashSet::new(),
        };

        if let Some(st) = storage {
            ns.load_from_storage()?;
            ns.wal = Some(Wal::open(st, config.wal_sync_mode)?);
            ns.replay_wal()?;
            ns.rebuild_free_list();
        }

        for idx_def in def.indexes {
            if !ns.has_index(&idx_def.name) {
                ns.add_index(idx_def)?;
            }
        }
        // Schema must be durable before the first log record refers to it
        ns.persist_meta()?;

        info!(namespace = %ns.name, items = ns.live_count(), "namespace opened");
        Ok(ns)
    }

    pub fn new_item(&self) -> Item {
        Item::new(self.payload_type.clone(), self.schema_version)
    }

    pub fn live_count(&self) -> usize {
        self.items.len() - self.free_list.len()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|ix| ix.def.name == name)
    }

    pub fn index_defs(&self) -> Vec<IndexDef> {
        self.indexes.iter().map(|ix| ix.def.clone()).collect()
    }

    pub fn insert(&mut self, item: &mut Item) -> Result<()> {
        self.write_item(item, WriteMode::Insert)?;
        self.perf
            .inserts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    pub fn update(&mut self, item: &mut Item) -> Result<()> {
        self.write_item(item, WriteMode::Update)?;
        self.perf
            .updates
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    pub fn upsert(&mut self, item: &mut Item) -> Result<()> {
        self.write_item(item, WriteMode::Upsert)?;
        self.perf
            .upserts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Delete by document text: only the primary key fields are read out
    /// of the JSON, everything else in it is ignored.
    pub fn delete_json(&mut self, json: &str) -> Result<()> {
        let pk_pos = self.pk_index_pos()?;
        let pk_fields = self.indexes[pk_pos].fields.clone();
        let mut item = self.new_item();
        item.from_json_filtered(json, Some(&pk_fields))?;
        self.delete(&item)
    }

    pub fn delete(&mut self, item: &Item) -> Result<()> {
        self.check_item_version(item)?;
        // The primary key decides which row goes; a remembered rowId may be
        // stale after the slot was reused.
        let row = self
            .find_by_pk(&item.payload)?
            .ok_or_else(|| Error::not_found("item not found"))?;
        self.delete_row(row)?;
        self.perf
            .deletes
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Serve a select. Cache hits answer under the shared lock; the cache
    /// key embeds the namespace version, so bumps orphan stale entries.
    pub fn select(&self, q: &Query, joined: &JoinCtx<'_>) -> Result<QueryResults> {
        self.perf
            .selects
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // Join results depend on other namespaces' state; only join-free
        // queries are memoized here.
        let cacheable = q.joins.is_empty();
        let fingerprint = q.fingerprint();
        if cacheable {
            if let Some(hit) = self.query_cache.get(&fingerprint, self.version) {
                debug!(namespace = %self.name, "select served from cache");
                return Ok(hit);
            }
        }

        let results = plan::run_select(self, q, joined)?;
        if cacheable {
            self.query_cache
                .put(fingerprint, self.version, results.clone());
        }
        Ok(results)
    }

    /// Flush lazy index structures and persist dirty rows, then checkpoint
    /// the mutation log.
    pub fn commit(&mut self) -> Result<()> {
        for ix in &mut self.indexes {
            ix.commit();
        }

        if let Some(storage) = self.storage.clone() {
            let mut ops = vec![BatchOp::Put(META_KEY.to_vec(), self.serialize_meta())];
            for &row in &self.dirty {
                if self.deleted.contains(row) {
                    ops.push(BatchOp::Remove(item_key(row)));
                } else {
                    ops.push(BatchOp::Put(
                        item_key(row),
                        packed::pack(&self.payload_type, &self.items[row as usize]),
                    ));
                }
            }
            storage.write_batch(&ops)?;
            if let Some(wal) = &mut self.wal {
                wal.append(WalOp::Commit)?;
                wal.truncate()?;
            }
        }

        self.dirty.clear();
        self.perf
            .commits
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(namespace = %self.name, "commit done");
        Ok(())
    }

    /// Add an index (and, for non-composite definitions, the payload field
    /// it indexes). Existing items are folded in; any failure rolls the
    /// namespace back to its prior shape.
    pub fn add_index(&mut self, def: IndexDef) -> Result<()> {
        if let Some(existing) = self.indexes.iter().find(|ix| ix.def.name == def.name) {
            if existing.def == def {
                return Ok(());
            }
            return Err(Error::conflict(format!(
                "index '{}' already exists with a different definition",
                def.name
            )));
        }
        if def.opts.is_pk {
            if !self.indexes.is_empty() {
                return Err(Error::logic("primary key must be the first index"));
            }
            if def.opts.is_array {
                return Err(Error::params("primary key can't be an array"));
            }
        }
        if !self.indexes.is_empty() && !self.indexes[0].def.opts.is_pk && !def.opts.is_pk {
            // Keeps slot 0 reserved for the primary key
            return Err(Error::logic("define the primary key index first"));
        }

        let old_type = self.payload_type.clone();
        let old_items = if def.is_composite() {
            None
        } else {
            Some(self.items.clone())
        };

        if !def.is_composite() {
            let mut new_type = (*self.payload_type).clone();
            let mut field = PayloadFieldType::new(&def.name, def.field_type, "", def.opts.is_array);
            field.json_paths = def.json_paths.clone();
            new_type.add(field)?;
            let new_type = Arc::new(new_type);
            self.reshape_items(&old_type, &new_type)?;
            self.payload_type = new_type;
        }

        let mut index = Index::build(def, &self.payload_type)?;

        // Fold existing rows in; a uniqueness conflict aborts the add
        let mut populate = || -> Result<()> {
            for row in 0..self.items.len() as RowId {
                if self.deleted.contains(row) {
                    continue;
                }
                for key in index.extract_keys(&self.payload_type, &self.items[row as usize]) {
                    index.upsert(&key, row)?;
                }
            }
            Ok(())
        };
        if let Err(e) = populate() {
            self.payload_type = old_type;
            if let Some(items) = old_items {
                self.items = items;
            }
            return Err(e);
        }

        info!(namespace = %self.name, index = %index.def.name, "index added");
        self.indexes.push(index);
        self.bump_schema_version();
        self.persist_meta()
    }

    /// Drop an index. The payload field stays only while another index
    /// still reads it.
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        let pos = self
            .indexes
            .iter()
            .position(|ix| ix.def.name == name)
            .ok_or_else(|| Error::not_found(format!("index '{}' not found", name)))?;
        if self.indexes[pos].def.opts.is_pk {
            return Err(Error::logic("can't drop the primary key index"));
        }

        let dropped = self.indexes.remove(pos);
        if !dropped.def.is_composite() {
            let field = dropped.fields[0];
            let used_elsewhere = self.indexes.iter().any(|ix| ix.fields.contains(&field));
            if used_elsewhere {
                if self
                    .indexes
                    .iter()
                    .any(|ix| ix.def.is_composite() && ix.fields.contains(&field))
                {
                    // Composite indexes hold this field's position; dropping
                    // the field would silently re-key them.
                    self.indexes.insert(pos, dropped);
                    return Err(Error::logic(format!(
                        "field '{}' is part of a composite index",
                        name
                    )));
                }
            } else {
                let mut new_type = (*self.payload_type).clone();
                new_type.drop(&dropped.def.name);
                let new_type = Arc::new(new_type);
                let old_type = self.payload_type.clone();
                self.reshape_items(&old_type, &new_type)?;
                self.payload_type = new_type;
                self.rebuild_index_fields()?;
            }
        }

        info!(namespace = %self.name, index = name, "index dropped");
        self.bump_schema_version();
        self.persist_meta()
    }

    /// Replace an index definition in place: kind, collation or uniqueness
    /// change rebuilds the backing structure; a field type change also
    /// re-types the stored column.
    pub fn update_index(&mut self, def: IndexDef) -> Result<()> {
        let pos = self
            .indexes
            .iter()
            .position(|ix| ix.def.name == def.name)
            .ok_or_else(|| Error::not_found(format!("index '{}' not found", def.name)))?;
        let old_def = self.indexes[pos].def.clone();
        if old_def == def {
            return Ok(());
        }
        if old_def.opts.is_pk != def.opts.is_pk {
            return Err(Error::logic("can't change the primary key flag"));
        }
        if old_def.is_composite() != def.is_composite() {
            return Err(Error::params(
                "can't convert between composite and scalar indexes",
            ));
        }

        let old_type = self.payload_type.clone();
        let mut retyped = false;
        if !def.is_composite() && old_def.field_type != def.field_type {
            let mut new_type = (*self.payload_type).clone();
            new_type.retype(&def.name, def.field_type)?;
            let new_type = Arc::new(new_type);
            self.reshape_items(&old_type, &new_type)?;
            self.payload_type = new_type;
            retyped = true;
        }

        let build = || -> Result<Index> {
            let mut index = Index::build(def.clone(), &self.payload_type)?;
            for row in 0..self.items.len() as RowId {
                if self.deleted.contains(row) {
                    continue;
                }
                for key in index.extract_keys(&self.payload_type, &self.items[row as usize]) {
                    index.upsert(&key, row)?;
                }
            }
            Ok(index)
        };

        match build() {
            Ok(index) => {
                self.indexes[pos] = index;
                info!(namespace = %self.name, index = %def.name, "index updated");
                self.bump_schema_version();
                self.persist_meta()
            }
            Err(e) => {
                if retyped {
                    let new_type = self.payload_type.clone();
                    self.reshape_items(&new_type, &old_type)?;
                    self.payload_type = old_type;
                }
                Err(e)
            }
        }
    }

    pub fn describe(&self) -> NamespaceDescription {
        NamespaceDescription {
            name: self.name.clone(),
            fields: self.payload_type.fields().to_vec(),
            indexes: self.index_defs(),
        }
    }

    pub fn stats(&self) -> NamespaceStat {
        NamespaceStat {
            name: self.name.clone(),
            items_count: self.live_count(),
            empty_slots: self.free_list.len(),
            data_size_bytes: self.items.iter().map(|pv| pv.heap_size()).sum(),
            version: self.version,
            indexes: self.indexes.iter().map(|ix| ix.mem_stat()).collect(),
            query_cache: self.query_cache.stats(),
            join_cache: self.join_cache.stats(),
            perf: self.perf.snapshot(),
        }
    }

    fn write_item(&mut self, item: &mut Item, mode: WriteMode) -> Result<()> {
        self.check_item_version(item)?;
        let pk_pos = self.pk_index_pos()?;
        let pk_key = self.pk_key_of(pk_pos, &item.payload)?;

        let existing = self.find_row(pk_pos, &pk_key)?;
        match (mode, existing) {
            (WriteMode::Insert, Some(_)) => Err(Error::conflict(format!(
                "duplicate primary key in namespace '{}'",
                self.name
            ))),
            (WriteMode::Update, None) => Err(Error::not_found("item not found")),
            (_, Some(row)) => {
                self.update_row(row, item.payload.clone())?;
                item.row_id = Some(row);
                Ok(())
            }
            (_, None) => {
                let row = self.insert_row(item.payload.clone())?;
                item.row_id = Some(row);
                Ok(())
            }
        }
    }

    fn insert_row(&mut self, payload: PayloadValue) -> Result<RowId> {
        let (row, reused) = match self.free_list.pop() {
            Some(row) => (row, true),
            None => {
                self.items.push(PayloadValue::empty());
                (self.items.len() as RowId - 1, false)
            }
        };

        // Indexes are updated in definition order; on failure the already
        // applied entries are walked back in reverse.
        let mut applied: Vec<(usize, KeyEntry)> = Vec::new();
        let mut failure = None;
        'outer: for i in 0..self.indexes.len() {
            let keys = self.indexes[i].extract_keys(&self.payload_type, &payload);
            for key in keys {
                if let Err(e) = self.indexes[i].upsert(&key, row) {
                    failure = Some(e);
                    break 'outer;
                }
                applied.push((i, key));
            }
        }
        if let Some(e) = failure {
            for (i, key) in applied.iter().rev() {
                self.indexes[*i].delete(key, row);
            }
            if reused {
                self.free_list.push(row);
            } else {
                self.items.pop();
            }
            return Err(e);
        }

        self.items[row as usize] = payload;
        self.deleted.remove(row);
        self.dirty.insert(row);
        self.wal_append(WalOp::ItemUpsert {
            row,
            packed: packed::pack(&self.payload_type, &self.items[row as usize]),
        })?;
        self.version += 1;
        debug!(namespace = %self.name, row, "item inserted");
        Ok(row)
    }

    fn update_row(&mut self, row: RowId, payload: PayloadValue) -> Result<()> {
        let old = self.items[row as usize].clone();

        // Per-index delta: only changed keys are touched
        let mut applied_adds: Vec<(usize, KeyEntry)> = Vec::new();
        let mut applied_dels: Vec<(usize, KeyEntry)> = Vec::new();
        let mut failure = None;
        'outer: for i in 0..self.indexes.len() {
            let collate = self.indexes[i].def.opts.collate.clone();
            let old_keys = self.indexes[i].extract_keys(&self.payload_type, &old);
            let new_keys = self.indexes[i].extract_keys(&self.payload_type, &payload);

            for key in old_keys
                .iter()
                .filter(|k| !new_keys.iter().any(|n| n.eq_entry(k, &collate)))
            {
                self.indexes[i].delete(key, row);
                applied_dels.push((i, key.clone()));
            }
            for key in new_keys
                .iter()
                .filter(|k| !old_keys.iter().any(|o| o.eq_entry(k, &collate)))
            {
                if let Err(e) = self.indexes[i].upsert(key, row) {
                    failure = Some(e);
                    break 'outer;
                }
                applied_adds.push((i, key.clone()));
            }
        }
        if let Some(e) = failure {
            for (i, key) in applied_adds.iter().rev() {
                self.indexes[*i].delete(key, row);
            }
            for (i, key) in applied_dels.iter().rev() {
                self.indexes[*i].upsert(key, row).expect(
                    "key was held by this row before the update began; rollback re-insertion cannot conflict",
                );
            }
            return Err(e);
        }

        self.items[row as usize] = payload;
        self.dirty.insert(row);
        self.wal_append(WalOp::ItemUpsert {
            row,
            packed: packed::pack(&self.payload_type, &self.items[row as usize]),
        })?;
        self.version += 1;
        debug!(namespace = %self.name, row, "item updated");
        Ok(())
    }

    fn delete_row(&mut self, row: RowId) -> Result<()> {
        let old = self.items[row as usize].clone();
        for i in 0..self.indexes.len() {
            for key in self.indexes[i].extract_keys(&self.payload_type, &old) {
                self.indexes[i].delete(&key, row);
            }
        }
        self.items[row as usize] = PayloadValue::empty();
        self.free_list.push(row);
        self.deleted.insert(row);
        self.dirty.insert(row);
        self.wal_append(WalOp::ItemDelete { row })?;
        self.version += 1;
        debug!(namespace = %self.name, row, "item deleted");
        Ok(())
    }

    pub(crate) fn pk_index_pos(&self) -> Result<usize> {
        self.indexes
            .iter()
            .position(|ix| ix.def.opts.is_pk)
            .ok_or_else(|| {
                Error::logic(format!("namespace '{}' has no primary key index", self.name))
            })
    }

    fn pk_key_of(&self, pk_pos: usize, payload: &PayloadValue) -> Result<KeyEntry> {
        let key = self.indexes[pk_pos]
            .extract_keys(&self.payload_type, payload)
            .into_iter()
            .next()
            .ok_or_else(|| Error::logic("missing primary key value"))?;
        let missing = match &key {
            KeyEntry::Value(Value::Null) => true,
            KeyEntry::Value(Value::String(s)) => s.is_empty(),
            _ => false,
        };
        if missing {
            return Err(Error::logic("missing primary key value"));
        }
        Ok(key)
    }

    fn find_row(&self, pk_pos: usize, key: &KeyEntry) -> Result<Option<RowId>> {
        let select = match key {
            KeyEntry::Value(v) => self.indexes[pk_pos].select(std::slice::from_ref(v), CondType::Eq),
            KeyEntry::Composite(vs) => self.indexes[pk_pos].select(vs, CondType::Eq),
        }?;
        Ok(match select {
            KeySelect::Ids(sets) => sets.iter().flat_map(|s| s.iter()).next(),
            _ => None,
        })
    }

    pub(crate) fn find_by_pk(&self, payload: &PayloadValue) -> Result<Option<RowId>> {
        let pk_pos = self.pk_index_pos()?;
        let key = self.pk_key_of(pk_pos, payload)?;
        self.find_row(pk_pos, &key)
    }

    fn check_item_version(&self, item: &Item) -> Result<()> {
        if item.schema_version != self.schema_version {
            return Err(Error::new(
                ErrorKind::StateInvalidated,
                format!(
                    "item was built against an older schema of namespace '{}'",
                    self.name
                ),
            ));
        }
        Ok(())
    }

    fn bump_schema_version(&mut self) {
        self.schema_version += 1;
        self.version += 1;
        self.query_cache.invalidate();
        self.join_cache.invalidate();
    }

    /// Re-lay every live record from one schema onto another, matching
    /// fields by name.
    fn reshape_items(&mut self, old_t: &PayloadType, new_t: &PayloadType) -> Result<()> {
        if old_t.num_fields() == 0 && self.items.is_empty() {
            return Ok(());
        }
        for row in 0..self.items.len() as RowId {
            if self.deleted.contains(row) {
                continue;
            }
            let old_pv = &self.items[row as usize];
            let mut new_pv = PayloadValue::new(new_t);
            for (new_field, f) in new_t.fields().iter().enumerate() {
                if let Ok(old_field) = old_t.field_by_name(&f.name) {
                    let values: Vec<Value> = old_pv
                        .get(old_t, old_field)
                        .iter()
                        .map(|r| r.to_value())
                        .filter(|v| !v.is_null())
                        .collect();
                    new_pv.set(new_t, new_field, &values)?;
                }
            }
            self.items[row as usize] = new_pv;
            self.dirty.insert(row);
        }
        Ok(())
    }

    /// Resolve every index's field positions against the current schema.
    fn rebuild_index_fields(&mut self) -> Result<()> {
        for ix in &mut self.indexes {
            let mut fields = Vec::new();
            for path in &ix.def.json_paths {
                let idx = self.payload_type.field_by_json_path(path).ok_or_else(|| {
                    Error::logic(format!("index '{}' lost its field", ix.def.name))
                })?;
                fields.push(idx);
            }
            ix.fields = fields;
        }
        Ok(())
    }

    fn persist_meta(&self) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.write(META_KEY, &self.serialize_meta())?;
        }
        Ok(())
    }

    fn wal_append(&mut self, op: WalOp) -> Result<()> {
        if let Some(wal) = &mut self.wal {
            wal.append(op)?;
        }
        Ok(())
    }

    fn serialize_meta(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.payload_type.serialize(&mut enc);
        enc.put_varuint(self.version);
        let defs = serde_json::to_string(&self.index_defs()).expect("index defs serialize");
        enc.put_vstring(&defs);
        enc.into_bytes()
    }

    fn load_from_storage(&mut self) -> Result<()> {
        let storage = self.storage.clone().expect("storage configured");
        let meta = match storage.read(META_KEY)? {
            Some(meta) => meta,
            None => return Ok(()),
        };

        let mut dec = Decoder::new(&meta);
        let payload_type = PayloadType::deserialize(&self.name, &mut dec)?;
        self.version = dec.get_varuint()?;
        let defs: Vec<IndexDef> = serde_json::from_str(dec.get_vstring()?)?;
        self.payload_type = Arc::new(payload_type);

        for def in defs {
            self.indexes.push(Index::build(def, &self.payload_type)?);
        }

        for (key, bytes) in storage.iter_prefix(ITEM_PREFIX)? {
            let row = match parse_item_key(&key) {
                Some(row) => row,
                None => continue,
            };
            let pv = packed::unpack(&self.payload_type, &bytes)?;
            self.place_row(row, pv)?;
        }
        Ok(())
    }

    fn replay_wal(&mut self) -> Result<()> {
        let records: Vec<WalRecord> = match &self.wal {
            Some(wal) => wal.replay()?,
            None => return Ok(()),
        };
        let count = records.len();
        for record in records {
            match record.op {
                WalOp::ItemUpsert { row, packed: bytes } => {
                    let pv = packed::unpack(&self.payload_type, &bytes)?;
                    self.place_row(row, pv)?;
                    self.dirty.insert(row);
                }
                WalOp::ItemDelete { row } => {
                    if (row as usize) < self.items.len() && !self.items[row as usize].is_empty() {
                        let old = self.items[row as usize].clone();
                        for i in 0..self.indexes.len() {
                            for key in self.indexes[i].extract_keys(&self.payload_type, &old) {
                                self.indexes[i].delete(&key, row);
                            }
                        }
                        self.items[row as usize] = PayloadValue::empty();
                        self.deleted.insert(row);
                        self.dirty.insert(row);
                    }
                }
                WalOp::Commit => {}
            }
        }
        if count > 0 {
            info!(namespace = %self.name, records = count, "mutation log replayed");
        }
        Ok(())
    }

    /// Put a recovered record into its slot, re-indexing as needed.
    fn place_row(&mut self, row: RowId, pv: PayloadValue) -> Result<()> {
        if row as usize >= self.items.len() {
            self.items.resize(row as usize + 1, PayloadValue::empty());
        }
        if !self.items[row as usize].is_empty() {
            let old = self.items[row as usize].clone();
            for i in 0..self.indexes.len() {
                for key in self.indexes[i].extract_keys(&self.payload_type, &old) {
                    self.indexes[i].delete(&key, row);
                }
            }
        }
        for i in 0..self.indexes.len() {
            for key in self.indexes[i].extract_keys(&self.payload_type, &pv) {
                self.indexes[i].upsert(&key, row)?;
            }
        }
        self.items[row as usize] = pv;
        self.deleted.remove(row);
        Ok(())
    }

    fn rebuild_free_list(&mut self) {
        self.free_list.clear();
        self.deleted.clear();
        for row in 0..self.items.len() as RowId {
            if self.items[row as usize].is_empty() {
                self.free_list.push(row);
                self.deleted.insert(row);
            }
        }
    }
}
