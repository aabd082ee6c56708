use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::NamespaceStat;
use crate::index::IndexDef;
use crate::ns::{Item, Namespace, NamespaceDef, NamespaceDescription};
use crate::query::plan::JoinCtx;
use crate::query::query::Query;
use crate::query::results::QueryResults;
use crate::query::{dsl, sql};
use crate::storage::file::FileStorage;
use crate::storage::Storage;

/// The registry: maps namespace names to their runtimes and carries the
/// embedded API surface. Each namespace sits behind its own
/// reader-writer lock; cross-namespace joins take read locks in
/// lexicographic name order.
pub struct Database {
    config: Config,
    namespaces: RwLock<HashMap<String, Arc<RwLock<Namespace>>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("namespaces", &self.namespaces.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Database {
    pub fn open(config: Config) -> Result<Database> {
        if let Some(path) = &config.storage_path {
            std::fs::create_dir_all(path)?;
        }
        Ok(Database {
            config,
            namespaces: RwLock::new(HashMap::new()),
        })
    }

    /// Connect by DSN. `builtin://` runs fully in memory,
    /// `builtin:///var/lib/data` persists under the given directory.
    /// Remote schemes belong to the network adapters, not the core.
    pub fn connect(dsn: &str) -> Result<Database> {
        let rest = dsn
            .strip_prefix("builtin://")
            .ok_or_else(|| Error::params(format!("unsupported DSN scheme in '{}'", dsn)))?;
        let mut config = Config::default();
        if !rest.is_empty() {
            config.storage_path = Some(rest.into());
        }
        Database::open(config)
    }

    pub fn open_namespace(&self, def: NamespaceDef) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        if namespaces.contains_key(&def.name) {
            return Ok(());
        }

        let storage: Option<Arc<dyn Storage>> = match &self.config.storage_path {
            Some(dir) => Some(Arc::new(FileStorage::open(
                dir.join(format!("{}.db", def.name)),
            )?)),
            None => None,
        };
        let name = def.name.clone();
        let ns = Namespace::open(def, &self.config, storage)?;
        namespaces.insert(name, Arc::new(RwLock::new(ns)));
        Ok(())
    }

    /// Flush and forget a namespace. Persistent data stays on disk and
    /// comes back on the next open.
    pub fn close_namespace(&self, name: &str) -> Result<()> {
        let handle = {
            let mut namespaces = self.namespaces.write();
            namespaces
                .remove(name)
                .ok_or_else(|| Error::not_found(format!("namespace '{}' not found", name)))?
        };
        handle.write().commit()?;
        info!(namespace = name, "namespace closed");
        Ok(())
    }

    pub fn enum_namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn namespace_stats(&self, name: &str) -> Result<NamespaceStat> {
        Ok(self.ns(name)?.read().stats())
    }

    /// Definition dump of one namespace: name, payload fields, index defs.
    pub fn describe(&self, name: &str) -> Result<NamespaceDescription> {
        Ok(self.ns(name)?.read().describe())
    }

    pub fn add_index(&self, ns: &str, def: IndexDef) -> Result<()> {
        self.ns(ns)?.write().add_index(def)
    }

    pub fn update_index(&self, ns: &str, def: IndexDef) -> Result<()> {
        self.ns(ns)?.write().update_index(def)
    }

    pub fn drop_index(&self, ns: &str, name: &str) -> Result<()> {
        self.ns(ns)?.write().drop_index(name)
    }

    pub fn new_item(&self, ns: &str) -> Result<Item> {
        Ok(self.ns(ns)?.read().new_item())
    }

    pub fn insert(&self, ns: &str, item: &mut Item) -> Result<()> {
        self.ns(ns)?.write().insert(item)
    }

    pub fn update(&self, ns: &str, item: &mut Item) -> Result<()> {
        self.ns(ns)?.write().update(item)
    }

    pub fn upsert(&self, ns: &str, item: &mut Item) -> Result<()> {
        self.ns(ns)?.write().upsert(item)
    }

    pub fn delete(&self, ns: &str, item: &Item) -> Result<()> {
        self.ns(ns)?.write().delete(item)
    }

    /// Delete by document text; only the primary key is read from the JSON.
    pub fn delete_json(&self, ns: &str, json: &str) -> Result<()> {
        self.ns(ns)?.write().delete_json(json)
    }

    /// Execute a query. The main namespace and every joined one are read
    /// locked for the whole run, acquired in lexicographic order so two
    /// concurrent joins can't deadlock.
    pub fn select(&self, q: &Query) -> Result<QueryResults> {
        let mut names: Vec<&str> = vec![q.namespace.as_str()];
        names.extend(q.joins.iter().map(|j| j.namespace.as_str()));
        names.sort_unstable();
        names.dedup();

        let handles: Vec<(String, Arc<RwLock<Namespace>>)> = names
            .iter()
            .map(|n| Ok((n.to_string(), self.ns(n)?)))
            .collect::<Result<_>>()?;
        let guards: Vec<_> = handles.iter().map(|(_, h)| h.read()).collect();

        let mut ctx = JoinCtx::empty();
        let mut main: Option<&Namespace> = None;
        for (i, (name, _)) in handles.iter().enumerate() {
            let ns: &Namespace = &guards[i];
            if *name == q.namespace {
                main = Some(ns);
            }
            ctx.namespaces.insert(name.clone(), ns);
        }
        let main = main.expect("main namespace is always locked");
        main.select(q, &ctx)
    }

    pub fn select_sql(&self, query: &str) -> Result<QueryResults> {
        self.select(&sql::parse_sql(query)?)
    }

    pub fn select_dsl(&self, query: &str) -> Result<QueryResults> {
        self.select(&dsl::parse_dsl(query)?)
    }

    pub fn commit(&self, ns: &str) -> Result<()> {
        self.ns(ns)?.write().commit()
    }

    fn ns(&self, name: &str) -> Result<Arc<RwLock<Namespace>>> {
        self.namespaces
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("namespace '{}' not found", name)))
    }
}
