//! corral — an embeddable, in-memory indexed document store.
//!
//! Items (typed-but-schemaless documents) live in namespaces; fields are
//! indexed by a family of index kinds (hash, ordered tree, column,
//! full-text, composite) and queried through SQL text, a JSON DSL, or the
//! programmatic [`Query`] builder.
//!
//! ```no_run
//! use corral::{Database, NamespaceDef, IndexDef, IndexKind, IndexOpts, KeyValueType};
//!
//! let db = Database::connect("builtin://").unwrap();
//! db.open_namespace(
//!     NamespaceDef::new("users")
//!         .with_index(IndexDef::new("id", IndexKind::Hash, KeyValueType::Int32, IndexOpts::pk()))
//!         .with_index(IndexDef::new("name", IndexKind::Tree, KeyValueType::String, IndexOpts::default())),
//! )
//! .unwrap();
//!
//! let mut item = db.new_item("users").unwrap();
//! item.from_json(r#"{"id": 1, "name": "Ada"}"#).unwrap();
//! db.insert("users", &mut item).unwrap();
//!
//! let results = db.select_sql("SELECT * FROM users WHERE name = 'Ada'").unwrap();
//! assert_eq!(results.total_count, 1);
//! ```

pub mod cache;
pub mod core;
pub mod db;
pub mod index;
pub mod ns;
pub mod payload;
pub mod query;
pub mod storage;

pub use crate::core::collate::{CollateMode, CollateOpts};
pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::stats::NamespaceStat;
pub use crate::core::value::{KeyRef, KeyValueType, RowId, Value};
pub use crate::db::Database;
pub use crate::index::{IdSet, IndexDef, IndexKind, IndexOpts};
pub use crate::ns::{Item, Namespace, NamespaceDef, NamespaceDescription};
pub use crate::query::{
    AggType, CondType, JoinType, JoinedQuery, OpType, Query, QueryEntry, QueryResults, SortEntry,
};
