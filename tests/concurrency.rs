use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use corral::{Database, IndexDef, IndexKind, IndexOpts, KeyValueType, NamespaceDef};

fn open_users() -> Arc<Database> {
    let db = Database::connect("builtin://").unwrap();
    db.open_namespace(
        NamespaceDef::new("users")
            .with_index(IndexDef::new(
                "id",
                IndexKind::Hash,
                KeyValueType::Int32,
                IndexOpts::pk(),
            ))
            .with_index(IndexDef::new(
                "age",
                IndexKind::Tree,
                KeyValueType::Int32,
                IndexOpts::default(),
            )),
    )
    .unwrap();
    Arc::new(db)
}

#[test]
fn readers_see_consistent_snapshots_during_writes() {
    let db = open_users();
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let db = db.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut id = 0;
            while !stop.load(Ordering::Relaxed) {
                id += 1;
                let mut item = db.new_item("users").unwrap();
                item.set("id", &[corral::Value::Int32(id)]).unwrap();
                item.set("age", &[corral::Value::Int32(id % 100)]).unwrap();
                db.insert("users", &mut item).unwrap();
            }
            id as usize
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let db = db.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut last_total = 0;
                while !stop.load(Ordering::Relaxed) {
                    let res = db
                        .select_sql("SELECT * FROM users WHERE age >= 0")
                        .unwrap();
                    // Row count only grows while this workload runs
                    assert!(res.total_count >= last_total);
                    last_total = res.total_count;
                }
            })
        })
        .collect();

    thread::sleep(std::time::Duration::from_millis(200));
    stop.store(true, Ordering::Relaxed);

    let written = writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }

    let res = db.select_sql("SELECT COUNT(*) FROM users").unwrap();
    assert_eq!(res.total_count, written);
}

#[test]
fn concurrent_upserts_of_one_key_keep_one_row() {
    let db = open_users();
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let db = db.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    let mut item = db.new_item("users").unwrap();
                    item.set("id", &[corral::Value::Int32(1)]).unwrap();
                    item.set("age", &[corral::Value::Int32(t * 1000 + i)])
                        .unwrap();
                    db.upsert("users", &mut item).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let res = db.select_sql("SELECT COUNT(*) FROM users").unwrap();
    assert_eq!(res.total_count, 1);
}

#[test]
fn cross_namespace_joins_do_not_deadlock() {
    let db = open_users();
    db.open_namespace(
        NamespaceDef::new("orders")
            .with_index(IndexDef::new(
                "id",
                IndexKind::Hash,
                KeyValueType::Int32,
                IndexOpts::pk(),
            ))
            .with_index(IndexDef::new(
                "user_id",
                IndexKind::Hash,
                KeyValueType::Int32,
                IndexOpts::default(),
            )),
    )
    .unwrap();

    let mut user = db.new_item("users").unwrap();
    user.from_json(r#"{"id": 1, "age": 30}"#).unwrap();
    db.insert("users", &mut user).unwrap();
    let mut order = db.new_item("orders").unwrap();
    order.from_json(r#"{"id": 10, "user_id": 1}"#).unwrap();
    db.insert("orders", &mut order).unwrap();

    // Joins in both directions from many threads; lock order is by name,
    // so no interleaving can deadlock
    let join_q = |main: &str, other: &str, left: &str, right: &str| {
        format!(
            r#"{{
                "namespace": "{}",
                "joins": [{{
                    "type": "left",
                    "namespace": "{}",
                    "on": {{"left_field": "{}", "cond": "eq", "right_field": "{}"}}
                }}]
            }}"#,
            main, other, left, right
        )
    };

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let db = db.clone();
            let q = if t % 2 == 0 {
                join_q("orders", "users", "user_id", "id")
            } else {
                join_q("users", "orders", "id", "user_id")
            };
            thread::spawn(move || {
                for _ in 0..200 {
                    db.select_dsl(&q).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
}
