use serde_json::json;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::value::Value;
use crate::query::query::{
    AggEntry, AggType, CondType, JoinType, JoinedQuery, OpType, Query, QueryEntry, SortEntry,
};
use crate::query::results::value_json;

/// JSON query DSL, the machine-facing twin of the SQL surface:
///
/// ```json
/// {
///   "namespace": "users",
///   "filters": [
///     {"field": "name", "cond": "eq", "value": "Ada"},
///     {"op": "or", "field": "age", "cond": "range", "value": [20, 40]}
///   ],
///   "sort": [{"field": "age", "desc": true}],
///   "limit": 10,
///   "offset": 0,
///   "req_total": true
/// }
/// ```
pub fn parse_dsl(input: &str) -> Result<Query> {
    let root: serde_json::Value = serde_json::from_str(input)?;
    let obj = root
        .as_object()
        .ok_or_else(|| err("query must be an object"))?;

    let namespace = obj
        .get("namespace")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err("missing 'namespace'"))?;
    let mut query = Query::new(namespace);

    if let Some(filters) = obj.get("filters") {
        let list = filters
            .as_array()
            .ok_or_else(|| err("'filters' must be an array"))?;
        for f in list {
            query.entries.push(parse_filter(f)?);
        }
    }

    if let Some(sort) = obj.get("sort") {
        let list = sort
            .as_array()
            .ok_or_else(|| err("'sort' must be an array"))?;
        for s in list {
            let field = s
                .get("field")
                .and_then(|v| v.as_str())
                .ok_or_else(|| err("sort entry needs 'field'"))?;
            let desc = s.get("desc").and_then(|v| v.as_bool()).unwrap_or(false);
            query.sort.push(SortEntry {
                field: field.to_string(),
                desc,
            });
        }
    }

    if let Some(v) = obj.get("limit") {
        query.limit = Some(
            v.as_u64()
                .ok_or_else(|| err("'limit' must be a non-negative integer"))? as usize,
        );
    }
    if let Some(v) = obj.get("offset") {
        query.offset = v
            .as_u64()
            .ok_or_else(|| err("'offset' must be a non-negative integer"))?
            as usize;
    }
    if let Some(v) = obj.get("req_total") {
        query.with_total = v
            .as_bool()
            .ok_or_else(|| err("'req_total' must be a boolean"))?;
    }

    if let Some(aggs) = obj.get("aggregations") {
        let list = aggs
            .as_array()
            .ok_or_else(|| err("'aggregations' must be an array"))?;
        for a in list {
            let kind = a
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| err("aggregation needs 'type'"))?;
            let field = a
                .get("field")
                .and_then(|v| v.as_str())
                .ok_or_else(|| err("aggregation needs 'field'"))?;
            query.aggregations.push(AggEntry {
                agg: parse_agg(kind)?,
                field: field.to_string(),
            });
        }
    }

    if let Some(joins) = obj.get("joins") {
        let list = joins
            .as_array()
            .ok_or_else(|| err("'joins' must be an array"))?;
        for j in list {
            query.joins.push(parse_join(j)?);
        }
    }

    Ok(query)
}

/// Render a query back into the DSL.
pub fn to_dsl(q: &Query) -> serde_json::Value {
    let filters: Vec<serde_json::Value> = q
        .entries
        .iter()
        .map(|e| {
            json!({
                "op": op_name(e.op),
                "field": e.field,
                "cond": e.cond.name(),
                "value": values_json(&e.values),
            })
        })
        .collect();
    let sort: Vec<serde_json::Value> = q
        .sort
        .iter()
        .map(|s| json!({"field": s.field, "desc": s.desc}))
        .collect();

    let mut out = json!({
        "namespace": q.namespace,
        "filters": filters,
        "sort": sort,
        "offset": q.offset,
        "req_total": q.with_total,
    });
    if let Some(limit) = q.limit {
        out["limit"] = json!(limit);
    }
    if !q.aggregations.is_empty() {
        out["aggregations"] = serde_json::Value::Array(
            q.aggregations
                .iter()
                .map(|a| json!({"type": a.agg.name(), "field": a.field}))
                .collect(),
        );
    }
    out
}

fn err(context: impl Into<String>) -> Error {
    Error::new(ErrorKind::ParseJson, context)
}

fn parse_filter(f: &serde_json::Value) -> Result<QueryEntry> {
    let field = f
        .get("field")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err("filter needs 'field'"))?;
    let cond = parse_cond(
        f.get("cond")
            .and_then(|v| v.as_str())
            .ok_or_else(|| err("filter needs 'cond'"))?,
    )?;
    let op = match f.get("op").and_then(|v| v.as_str()) {
        None => OpType::And,
        Some(s) => parse_op(s)?,
    };
    let values = match f.get("value") {
        None => Vec::new(),
        Some(serde_json::Value::Array(list)) => list
            .iter()
            .map(json_to_value)
            .collect::<Result<Vec<_>>>()?,
        Some(single) => vec![json_to_value(single)?],
    };
    Ok(QueryEntry {
        op,
        field: field.to_string(),
        cond,
        values,
    })
}

fn parse_join(j: &serde_json::Value) -> Result<JoinedQuery> {
    let join_type = match j.get("type").and_then(|v| v.as_str()).unwrap_or("inner") {
        "inner" => JoinType::Inner,
        "left" => JoinType::Left,
        other => return Err(err(format!("unknown join type '{}'", other))),
    };
    let namespace = j
        .get("namespace")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err("join needs 'namespace'"))?;
    let on = j.get("on").ok_or_else(|| err("join needs 'on'"))?;
    let left_field = on
        .get("left_field")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err("join 'on' needs 'left_field'"))?;
    let right_field = on
        .get("right_field")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err("join 'on' needs 'right_field'"))?;
    let cond = parse_cond(on.get("cond").and_then(|v| v.as_str()).unwrap_or("eq"))?;

    let mut entries = Vec::new();
    if let Some(filters) = j.get("filters") {
        let list = filters
            .as_array()
            .ok_or_else(|| err("join 'filters' must be an array"))?;
        for f in list {
            entries.push(parse_filter(f)?);
        }
    }

    Ok(JoinedQuery {
        join_type,
        namespace: namespace.to_string(),
        left_field: left_field.to_string(),
        cond,
        right_field: right_field.to_string(),
        entries,
    })
}

fn parse_cond(s: &str) -> Result<CondType> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "eq" | "=" => CondType::Eq,
        "lt" | "<" => CondType::Lt,
        "le" | "<=" => CondType::Le,
        "gt" | ">" => CondType::Gt,
        "ge" | ">=" => CondType::Ge,
        "range" => CondType::Range,
        "set" | "in" => CondType::Set,
        "match" => CondType::Match,
        "empty" => CondType::Empty,
        "any" => CondType::Any,
        other => return Err(err(format!("unknown condition '{}'", other))),
    })
}

fn parse_op(s: &str) -> Result<OpType> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "and" => OpType::And,
        "or" => OpType::Or,
        "not" => OpType::Not,
        other => return Err(err(format!("unknown op '{}'", other))),
    })
}

fn parse_agg(s: &str) -> Result<AggType> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "min" => AggType::Min,
        "max" => AggType::Max,
        "sum" => AggType::Sum,
        "avg" => AggType::Avg,
        "facet" => AggType::Facet,
        "distinct" => AggType::Distinct,
        other => return Err(err(format!("unknown aggregation '{}'", other))),
    })
}

fn op_name(op: OpType) -> &'static str {
    match op {
        OpType::And => "and",
        OpType::Or => "or",
        OpType::Not => "not",
    }
}

pub fn json_to_value(v: &serde_json::Value) -> Result<Value> {
    Ok(match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Int32(*b as i32),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    Value::Int32(i as i32)
                } else {
                    Value::Int64(i)
                }
            } else {
                Value::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        _ => return Err(err("filter values must be scalars")),
    })
}

fn values_json(values: &[Value]) -> serde_json::Value {
    match values {
        [one] => value_json(one),
        many => serde_json::Value::Array(many.iter().map(value_json).collect()),
    }
}
