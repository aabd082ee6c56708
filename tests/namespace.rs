use corral::{
    CollateMode, CollateOpts, CondType, Database, IndexDef, IndexKind, IndexOpts, JoinType,
    JoinedQuery, KeyValueType, NamespaceDef, Query, Value,
};

fn db_with(defs: NamespaceDef) -> Database {
    let db = Database::connect("builtin://").unwrap();
    db.open_namespace(defs).unwrap();
    db
}

fn pk_i32(name: &str) -> IndexDef {
    IndexDef::new(name, IndexKind::Hash, KeyValueType::Int32, IndexOpts::pk())
}

fn ids(results: &corral::QueryResults) -> Vec<i64> {
    results
        .iter()
        .map(|it| it.get_json()["id"].as_i64().unwrap())
        .collect()
}

#[test]
fn insert_then_delete_restores_observable_state() {
    let db = db_with(
        NamespaceDef::new("t")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "name",
                IndexKind::Tree,
                KeyValueType::String,
                IndexOpts::default(),
            )),
    );

    let before = db.namespace_stats("t").unwrap();

    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 1, "name": "x"}"#).unwrap();
    db.insert("t", &mut item).unwrap();
    db.delete("t", &item).unwrap();

    let after = db.namespace_stats("t").unwrap();
    assert_eq!(after.items_count, before.items_count);
    for (b, a) in before.indexes.iter().zip(&after.indexes) {
        assert_eq!(b.unique_keys, a.unique_keys);
    }
    assert!(db.select_sql("SELECT * FROM t").unwrap().is_empty());
}

#[test]
fn upsert_twice_equals_once() {
    let db = db_with(NamespaceDef::new("t").with_index(pk_i32("id")).with_index(
        IndexDef::new("v", IndexKind::Tree, KeyValueType::Int32, IndexOpts::default()),
    ));

    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 1, "v": 7}"#).unwrap();
    db.upsert("t", &mut item).unwrap();
    let first = db.namespace_stats("t").unwrap();

    let mut again = db.new_item("t").unwrap();
    again.from_json(r#"{"id": 1, "v": 7}"#).unwrap();
    db.upsert("t", &mut again).unwrap();
    let second = db.namespace_stats("t").unwrap();

    assert_eq!(first.items_count, second.items_count);
    assert_eq!(
        first.indexes.iter().map(|i| i.unique_keys).collect::<Vec<_>>(),
        second.indexes.iter().map(|i| i.unique_keys).collect::<Vec<_>>()
    );
    assert_eq!(item.id(), again.id());
}

#[test]
fn update_missing_item_is_not_found() {
    let db = db_with(NamespaceDef::new("t").with_index(pk_i32("id")));
    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 5}"#).unwrap();
    assert_eq!(
        db.update("t", &mut item).unwrap_err().kind,
        corral::ErrorKind::NotFound
    );
}

#[test]
fn missing_pk_value_is_a_logic_error() {
    let db = db_with(
        NamespaceDef::new("t")
            .with_index(IndexDef::new(
                "key",
                IndexKind::Hash,
                KeyValueType::String,
                IndexOpts::pk(),
            ))
            .with_index(IndexDef::new(
                "v",
                IndexKind::Tree,
                KeyValueType::Int32,
                IndexOpts::default(),
            )),
    );
    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"v": 3}"#).unwrap();
    assert_eq!(
        db.insert("t", &mut item).unwrap_err().kind,
        corral::ErrorKind::Logic
    );
}

#[test]
fn stale_item_is_invalidated_by_schema_change() {
    let db = db_with(NamespaceDef::new("t").with_index(pk_i32("id")));
    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 1}"#).unwrap();

    db.add_index(
        "t",
        IndexDef::new("v", IndexKind::Tree, KeyValueType::Int32, IndexOpts::default()),
    )
    .unwrap();

    assert_eq!(
        db.insert("t", &mut item).unwrap_err().kind,
        corral::ErrorKind::StateInvalidated
    );
}

#[test]
fn array_fields_index_every_element() {
    let db = db_with(
        NamespaceDef::new("t")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "tags",
                IndexKind::Hash,
                KeyValueType::String,
                IndexOpts {
                    is_array: true,
                    ..Default::default()
                },
            )),
    );

    let mut a = db.new_item("t").unwrap();
    a.from_json(r#"{"id": 1, "tags": ["red", "blue"]}"#).unwrap();
    db.insert("t", &mut a).unwrap();
    let mut b = db.new_item("t").unwrap();
    b.from_json(r#"{"id": 2, "tags": []}"#).unwrap();
    db.insert("t", &mut b).unwrap();

    let red = db
        .select(&Query::new("t").where_("tags", CondType::Eq, vec![Value::String("red".into())]))
        .unwrap();
    assert_eq!(ids(&red), vec![1]);

    // Zero elements match Empty, not Any
    let empty = db.select_sql("SELECT * FROM t WHERE tags IS NULL").unwrap();
    assert_eq!(ids(&empty), vec![2]);
    let any = db.select_sql("SELECT * FROM t WHERE tags IS NOT NULL").unwrap();
    assert_eq!(ids(&any), vec![1]);

    // Delete removes every element's entry
    db.delete("t", &a).unwrap();
    let red = db
        .select(&Query::new("t").where_("tags", CondType::Eq, vec![Value::String("red".into())]))
        .unwrap();
    assert!(red.is_empty());
}

#[test]
fn collated_index_folds_case() {
    let db = db_with(
        NamespaceDef::new("t")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "name",
                IndexKind::Hash,
                KeyValueType::String,
                IndexOpts {
                    collate: CollateOpts::new(CollateMode::Ascii),
                    ..Default::default()
                },
            )),
    );
    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 1, "name": "Ada"}"#).unwrap();
    db.insert("t", &mut item).unwrap();

    let res = db.select_sql("SELECT * FROM t WHERE name = 'aDA'").unwrap();
    assert_eq!(ids(&res), vec![1]);
}

#[test]
fn composite_index_matches_tuples() {
    let db = db_with(
        NamespaceDef::new("t")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "name",
                IndexKind::Hash,
                KeyValueType::String,
                IndexOpts::default(),
            ))
            .with_index(IndexDef::new(
                "age",
                IndexKind::Tree,
                KeyValueType::Int32,
                IndexOpts::default(),
            )),
    );
    db.add_index(
        "t",
        IndexDef::composite(
            "name+age",
            IndexKind::Hash,
            &["name", "age"],
            IndexOpts::default(),
        ),
    )
    .unwrap();

    for json in [
        r#"{"id": 1, "name": "Ada", "age": 36}"#,
        r#"{"id": 2, "name": "Ada", "age": 20}"#,
        r#"{"id": 3, "name": "Bo", "age": 36}"#,
    ] {
        let mut item = db.new_item("t").unwrap();
        item.from_json(json).unwrap();
        db.insert("t", &mut item).unwrap();
    }

    let res = db
        .select(&Query::new("t").where_composite(
            "name+age",
            CondType::Eq,
            vec![Value::String("Ada".into()), Value::Int32(36)],
        ))
        .unwrap();
    assert_eq!(ids(&res), vec![1]);
}

#[test]
fn full_text_match_ranks_by_relevance() {
    let db = db_with(
        NamespaceDef::new("docs")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "body",
                IndexKind::FullText,
                KeyValueType::String,
                IndexOpts::default(),
            )),
    );

    for json in [
        r#"{"id": 1, "body": "the quick brown fox"}"#,
        r#"{"id": 2, "body": "fox fox fox everywhere"}"#,
        r#"{"id": 3, "body": "lazy dogs sleep"}"#,
    ] {
        let mut item = db.new_item("docs").unwrap();
        item.from_json(json).unwrap();
        db.insert("docs", &mut item).unwrap();
    }

    let res = db
        .select_sql("SELECT * FROM docs WHERE body MATCH 'fox'")
        .unwrap();
    // Higher term frequency ranks first
    assert_eq!(ids(&res), vec![2, 1]);

    // Stemming folds plural queries onto the indexed terms
    let stemmed = db
        .select_sql("SELECT * FROM docs WHERE body MATCH 'foxes'")
        .unwrap();
    assert_eq!(stemmed.total_count, 2);
}

#[test]
fn inner_and_left_joins() {
    let db = Database::connect("builtin://").unwrap();
    db.open_namespace(
        NamespaceDef::new("users")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "age",
                IndexKind::Tree,
                KeyValueType::Int32,
                IndexOpts::default(),
            )),
    )
    .unwrap();
    db.open_namespace(
        NamespaceDef::new("orders")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "user_id",
                IndexKind::Hash,
                KeyValueType::Int32,
                IndexOpts::default(),
            )),
    )
    .unwrap();

    for json in [
        r#"{"id": 1, "age": 36}"#,
        r#"{"id": 2, "age": 17}"#,
    ] {
        let mut item = db.new_item("users").unwrap();
        item.from_json(json).unwrap();
        db.insert("users", &mut item).unwrap();
    }
    for json in [
        r#"{"id": 10, "user_id": 1}"#,
        r#"{"id": 11, "user_id": 1}"#,
        r#"{"id": 12, "user_id": 99}"#,
    ] {
        let mut item = db.new_item("orders").unwrap();
        item.from_json(json).unwrap();
        db.insert("orders", &mut item).unwrap();
    }

    let inner = db
        .select(&Query::new("orders").join(JoinedQuery {
            join_type: JoinType::Inner,
            namespace: "users".to_string(),
            left_field: "user_id".to_string(),
            cond: CondType::Eq,
            right_field: "id".to_string(),
            entries: vec![],
        }))
        .unwrap();
    let mut got = ids(&inner);
    got.sort_unstable();
    // Order 12 points at a missing user and drops out
    assert_eq!(got, vec![10, 11]);
    let joined = &inner.iter().next().unwrap().get_json()["joined_users"];
    assert_eq!(joined.as_array().unwrap().len(), 1);

    let left = db
        .select(&Query::new("orders").join(JoinedQuery {
            join_type: JoinType::Left,
            namespace: "users".to_string(),
            left_field: "user_id".to_string(),
            cond: CondType::Eq,
            right_field: "id".to_string(),
            entries: vec![],
        }))
        .unwrap();
    assert_eq!(left.total_count, 3);

    // Subquery filters narrow the joined side
    let adults = db
        .select(&Query::new("orders").join(JoinedQuery {
            join_type: JoinType::Inner,
            namespace: "users".to_string(),
            left_field: "user_id".to_string(),
            cond: CondType::Eq,
            right_field: "id".to_string(),
            entries: vec![corral::QueryEntry {
                op: corral::OpType::And,
                field: "age".to_string(),
                cond: CondType::Ge,
                values: vec![Value::Int32(18)],
            }],
        }))
        .unwrap();
    let mut got = ids(&adults);
    got.sort_unstable();
    assert_eq!(got, vec![10, 11]);
}

#[test]
fn drop_index_falls_back_to_scan() {
    let db = db_with(
        NamespaceDef::new("t")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "v",
                IndexKind::Tree,
                KeyValueType::Int32,
                IndexOpts::default(),
            )),
    );
    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 1, "v": 5}"#).unwrap();
    db.insert("t", &mut item).unwrap();

    db.drop_index("t", "v").unwrap();
    // The field went with its only index; filtering on it now fails
    assert!(db.select_sql("SELECT * FROM t WHERE v = 5").is_err());
    assert_eq!(db.select_sql("SELECT * FROM t").unwrap().total_count, 1);
}

#[test]
fn pk_index_cannot_be_dropped() {
    let db = db_with(NamespaceDef::new("t").with_index(pk_i32("id")));
    assert_eq!(
        db.drop_index("t", "id").unwrap_err().kind,
        corral::ErrorKind::Logic
    );
}

#[test]
fn add_index_backfills_existing_items() {
    let db = db_with(NamespaceDef::new("t").with_index(pk_i32("id")));
    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 1}"#).unwrap();
    db.insert("t", &mut item).unwrap();

    db.add_index(
        "t",
        IndexDef::new("v", IndexKind::Tree, KeyValueType::Int32, IndexOpts::default()),
    )
    .unwrap();

    // Existing row reads the default for the new field
    let res = db.select_sql("SELECT * FROM t WHERE v = 0").unwrap();
    assert_eq!(ids(&res), vec![1]);

    let mut second = db.new_item("t").unwrap();
    second.from_json(r#"{"id": 2, "v": 9}"#).unwrap();
    db.insert("t", &mut second).unwrap();
    let res = db.select_sql("SELECT * FROM t WHERE v = 9").unwrap();
    assert_eq!(ids(&res), vec![2]);
}

#[test]
fn enum_and_close_namespaces() {
    let db = Database::connect("builtin://").unwrap();
    db.open_namespace(NamespaceDef::new("b").with_index(pk_i32("id")))
        .unwrap();
    db.open_namespace(NamespaceDef::new("a").with_index(pk_i32("id")))
        .unwrap();
    assert_eq!(db.enum_namespaces(), vec!["a", "b"]);

    db.close_namespace("a").unwrap();
    assert_eq!(db.enum_namespaces(), vec!["b"]);
    assert_eq!(
        db.close_namespace("a").unwrap_err().kind,
        corral::ErrorKind::NotFound
    );
}

#[test]
fn delete_json_reads_only_the_primary_key() {
    let db = db_with(
        NamespaceDef::new("t")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "name",
                IndexKind::Tree,
                KeyValueType::String,
                IndexOpts::default(),
            )),
    );
    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 1, "name": "Ada"}"#).unwrap();
    db.insert("t", &mut item).unwrap();

    // Fields other than the key never get parsed in; a mistyped name is fine
    db.delete_json("t", r#"{"id": 1, "name": 42}"#).unwrap();
    assert!(db.select_sql("SELECT * FROM t").unwrap().is_empty());

    assert_eq!(
        db.delete_json("t", r#"{"id": 1}"#).unwrap_err().kind,
        corral::ErrorKind::NotFound
    );
}

#[test]
fn describe_dumps_fields_and_index_defs() {
    let db = db_with(
        NamespaceDef::new("t")
            .with_index(pk_i32("id"))
            .with_index(IndexDef::new(
                "tags",
                IndexKind::Hash,
                KeyValueType::String,
                IndexOpts {
                    is_array: true,
                    ..Default::default()
                },
            )),
    );

    let desc = db.describe("t").unwrap();
    assert_eq!(desc.name, "t");
    assert_eq!(desc.fields.len(), 2);
    assert_eq!(desc.fields[0].name, "id");
    assert_eq!(desc.fields[0].field_type, KeyValueType::Int32);
    assert_eq!(desc.fields[0].offset, 0);
    assert!(desc.fields[1].is_array);
    assert_eq!(desc.indexes.len(), 2);
    assert!(desc.indexes[0].opts.is_pk);
    assert_eq!(desc.indexes[1].kind, IndexKind::Hash);

    // Structural changes show up in the dump
    db.drop_index("t", "tags").unwrap();
    let desc = db.describe("t").unwrap();
    assert_eq!(desc.fields.len(), 1);
    assert_eq!(desc.indexes.len(), 1);
}

#[test]
fn index_def_json_round_trip() {
    let def = IndexDef::new(
        "name",
        IndexKind::Tree,
        KeyValueType::String,
        IndexOpts {
            is_unique: true,
            collate: CollateOpts::new(CollateMode::Ascii),
            ..Default::default()
        },
    );
    let json = def.to_json();
    let back = IndexDef::from_json(&json).unwrap();
    assert_eq!(back, def);
}

#[test]
fn perf_counters_track_operations() {
    let db = db_with(NamespaceDef::new("t").with_index(pk_i32("id")));
    let mut item = db.new_item("t").unwrap();
    item.from_json(r#"{"id": 1}"#).unwrap();
    db.insert("t", &mut item).unwrap();
    db.select_sql("SELECT * FROM t").unwrap();
    db.select_sql("SELECT * FROM t").unwrap();
    db.delete("t", &item).unwrap();

    let stats = db.namespace_stats("t").unwrap();
    assert_eq!(stats.perf.inserts, 1);
    assert_eq!(stats.perf.selects, 2);
    assert_eq!(stats.perf.deletes, 1);
}
