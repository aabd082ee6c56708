/// Walkthrough of the embedded API:
/// - namespace and index definition
/// - CRUD operations
/// - SQL, JSON-DSL and programmatic queries
/// - aggregations and joins
/// - statistics
use corral::{
    AggType, CondType, Database, IndexDef, IndexKind, IndexOpts, KeyValueType, NamespaceDef,
    Query, Value,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Opening an in-memory database...");
    let db = Database::connect("builtin://")?;

    println!("Defining the 'users' namespace...");
    db.open_namespace(
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
            .with_index(IndexDef::new(
                "age",
                IndexKind::Tree,
                KeyValueType::Int32,
                IndexOpts::default(),
            )),
    )?;

    println!("Inserting documents...");
    for json in [
        r#"{"id": 1, "name": "Ada", "age": 36}"#,
        r#"{"id": 2, "name": "Bo", "age": 40}"#,
        r#"{"id": 3, "name": "Ada", "age": 20}"#,
    ] {
        let mut item = db.new_item("users")?;
        item.from_json(json)?;
        db.insert("users", &mut item)?;
    }
    db.commit("users")?;

    println!("\nSQL query:");
    let res = db.select_sql("SELECT * FROM users WHERE name = 'Ada' ORDER BY age")?;
    for item in res.iter() {
        println!("  {}", item.get_json());
    }
    println!("  total: {}", res.total_count);

    println!("\nJSON DSL query:");
    let res = db.select_dsl(
        r#"{
            "namespace": "users",
            "filters": [{"field": "age", "cond": "range", "value": [20, 36]}],
            "sort": [{"field": "id", "desc": false}]
        }"#,
    )?;
    for item in res.iter() {
        println!("  {}", item.get_json());
    }

    println!("\nProgrammatic query with an aggregation:");
    let res = db.select(
        &Query::new("users")
            .where_("age", CondType::Ge, vec![Value::Int32(18)])
            .aggregate(AggType::Avg, "age"),
    )?;
    println!("  adults: {}", res.total_count);
    println!("  avg age: {:?}", res.aggregations[0].value);

    println!("\nUpsert and delete:");
    let mut item = db.new_item("users")?;
    item.from_json(r#"{"id": 2, "name": "Bo", "age": 41}"#)?;
    db.upsert("users", &mut item)?;
    db.delete("users", &item)?;

    let stats = db.namespace_stats("users")?;
    println!("\nNamespace stats:");
    println!("  items:      {}", stats.items_count);
    println!("  free slots: {}", stats.empty_slots);
    println!("  version:    {}", stats.version);
    for ix in &stats.indexes {
        println!("  index '{}': {} keys", ix.name, ix.unique_keys);
    }

    Ok(())
}
