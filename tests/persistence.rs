use corral::{Config, Database, IndexDef, IndexKind, IndexOpts, KeyValueType, NamespaceDef};
use tempfile::TempDir;

fn users_def() -> NamespaceDef {
    NamespaceDef::new("users")
        .with_index(IndexDef::new(
            "id",
            IndexKind::Hash,
            KeyValueType::Int32,
            IndexOpts::pk(),
        ))
        .with_index(IndexDef::new(
            "name",
            IndexKind::Tree,
            KeyValueType::String,
            IndexOpts::default(),
        ))
}

fn open_at(dir: &TempDir) -> Database {
    let config = Config {
        storage_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    Database::open(config).unwrap()
}

fn insert(db: &Database, json: &str) {
    let mut item = db.new_item("users").unwrap();
    item.from_json(json).unwrap();
    db.insert("users", &mut item).unwrap();
}

fn names_sorted(db: &Database) -> Vec<String> {
    db.select_sql("SELECT * FROM users ORDER BY name")
        .unwrap()
        .iter()
        .map(|it| it.get_json()["name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn committed_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_at(&dir);
        db.open_namespace(users_def()).unwrap();
        insert(&db, r#"{"id": 1, "name": "Ada"}"#);
        insert(&db, r#"{"id": 2, "name": "Bo"}"#);
        db.commit("users").unwrap();
    }

    let db = open_at(&dir);
    db.open_namespace(users_def()).unwrap();
    assert_eq!(names_sorted(&db), vec!["Ada", "Bo"]);

    // Indexes were rebuilt from the stored rows
    let res = db.select_sql("SELECT * FROM users WHERE name = 'Ada'").unwrap();
    assert_eq!(res.total_count, 1);
}

#[test]
fn uncommitted_writes_replay_from_the_log() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_at(&dir);
        db.open_namespace(users_def()).unwrap();
        // These never see an explicit commit
        insert(&db, r#"{"id": 1, "name": "Ada"}"#);
        insert(&db, r#"{"id": 2, "name": "Bo"}"#);
    }

    let db = open_at(&dir);
    db.open_namespace(users_def()).unwrap();
    assert_eq!(names_sorted(&db), vec!["Ada", "Bo"]);
}

#[test]
fn deletes_persist_and_rows_are_reused_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_at(&dir);
        db.open_namespace(users_def()).unwrap();
        insert(&db, r#"{"id": 1, "name": "Ada"}"#);
        insert(&db, r#"{"id": 2, "name": "Bo"}"#);
        let mut doomed = db.new_item("users").unwrap();
        doomed.from_json(r#"{"id": 1}"#).unwrap();
        db.delete("users", &doomed).unwrap();
        db.commit("users").unwrap();
    }

    let db = open_at(&dir);
    db.open_namespace(users_def()).unwrap();
    assert_eq!(names_sorted(&db), vec!["Bo"]);

    // The hole left by id 1 gets handed to the next insert
    let mut fresh = db.new_item("users").unwrap();
    fresh.from_json(r#"{"id": 3, "name": "Eve"}"#).unwrap();
    db.insert("users", &mut fresh).unwrap();
    assert_eq!(fresh.id(), Some(0));
}

#[test]
fn updates_after_commit_replay_over_stored_rows() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_at(&dir);
        db.open_namespace(users_def()).unwrap();
        insert(&db, r#"{"id": 1, "name": "Ada"}"#);
        db.commit("users").unwrap();

        let mut item = db.new_item("users").unwrap();
        item.from_json(r#"{"id": 1, "name": "Ada Lovelace"}"#).unwrap();
        db.upsert("users", &mut item).unwrap();
        // No commit after the upsert; recovery must take it from the log
    }

    let db = open_at(&dir);
    db.open_namespace(users_def()).unwrap();
    assert_eq!(names_sorted(&db), vec!["Ada Lovelace"]);
    assert_eq!(db.select_sql("SELECT * FROM users").unwrap().total_count, 1);
}

#[test]
fn close_namespace_flushes() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_at(&dir);
        db.open_namespace(users_def()).unwrap();
        insert(&db, r#"{"id": 1, "name": "Ada"}"#);
        db.close_namespace("users").unwrap();
    }

    let db = open_at(&dir);
    db.open_namespace(users_def()).unwrap();
    assert_eq!(names_sorted(&db), vec!["Ada"]);
}

#[test]
fn dsn_selects_the_backing() {
    let dir = TempDir::new().unwrap();
    let dsn = format!("builtin://{}", dir.path().display());
    {
        let db = Database::connect(&dsn).unwrap();
        db.open_namespace(users_def()).unwrap();
        insert(&db, r#"{"id": 1, "name": "Ada"}"#);
        db.commit("users").unwrap();
    }
    let db = Database::connect(&dsn).unwrap();
    db.open_namespace(users_def()).unwrap();
    assert_eq!(names_sorted(&db), vec!["Ada"]);

    assert_eq!(
        Database::connect("cproto://host:6534/db").unwrap_err().kind,
        corral::ErrorKind::Params
    );
}
