use std::time::Instant;

use crate::core::value::Value;

/// Predicate condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondType {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Closed interval: values[0] <= x <= values[1].
    Range,
    /// Membership in the value list.
    Set,
    /// Full-text match; only full-text indexes serve it.
    Match,
    /// Array field with zero elements.
    Empty,
    /// Array field with at least one element.
    Any,
}

impl CondType {
    pub fn name(&self) -> &'static str {
        match self {
            CondType::Eq => "=",
            CondType::Lt => "<",
            CondType::Le => "<=",
            CondType::Gt => ">",
            CondType::Ge => ">=",
            CondType::Range => "range",
            CondType::Set => "in",
            CondType::Match => "match",
            CondType::Empty => "empty",
            CondType::Any => "any",
        }
    }
}

/// How a predicate combines with what came before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    And,
    Or,
    Not,
}

/// One predicate of the filter tree: field, condition, values.
#[derive(Debug, Clone)]
pub struct QueryEntry {
    pub op: OpType,
    pub field: String,
    pub cond: CondType,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortEntry {
    pub field: String,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggType {
    Min,
    Max,
    Sum,
    Avg,
    Facet,
    Distinct,
}

impl AggType {
    pub fn name(&self) -> &'static str {
        match self {
            AggType::Min => "min",
            AggType::Max => "max",
            AggType::Sum => "sum",
            AggType::Avg => "avg",
            AggType::Facet => "facet",
            AggType::Distinct => "distinct",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggEntry {
    pub agg: AggType,
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// "For each main row, run this subquery against another namespace with
/// the main row's `left_field` bound to `right_field`."
#[derive(Debug, Clone)]
pub struct JoinedQuery {
    pub join_type: JoinType,
    pub namespace: String,
    pub left_field: String,
    pub cond: CondType,
    pub right_field: String,
    /// Extra filters applied inside the joined namespace.
    pub entries: Vec<QueryEntry>,
}

/// A select request against one namespace. Built programmatically, parsed
/// from SQL text, or decoded from the JSON DSL.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub namespace: String,
    pub entries: Vec<QueryEntry>,
    pub sort: Vec<SortEntry>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub aggregations: Vec<AggEntry>,
    pub joins: Vec<JoinedQuery>,
    pub with_total: bool,
    /// Wall-clock cutoff checked between rows during execution.
    pub deadline: Option<Instant>,
}

impl Query {
    pub fn new(namespace: &str) -> Self {
        Query {
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn where_(mut self, field: &str, cond: CondType, values: Vec<Value>) -> Self {
        self.entries.push(QueryEntry {
            op: OpType::And,
            field: field.to_string(),
            cond,
            values,
        });
        self
    }

    /// OR-bracket with the previous predicate.
    pub fn or_where(mut self, field: &str, cond: CondType, values: Vec<Value>) -> Self {
        self.entries.push(QueryEntry {
            op: OpType::Or,
            field: field.to_string(),
            cond,
            values,
        });
        self
    }

    pub fn not_where(mut self, field: &str, cond: CondType, values: Vec<Value>) -> Self {
        self.entries.push(QueryEntry {
            op: OpType::Not,
            field: field.to_string(),
            cond,
            values,
        });
        self
    }

    /// Composite-index predicate: `tuples` is a flat component list, one
    /// group of values per key, in index field order.
    pub fn where_composite(mut self, index: &str, cond: CondType, tuple: Vec<Value>) -> Self {
        self.entries.push(QueryEntry {
            op: OpType::And,
            field: index.to_string(),
            cond,
            values: tuple,
        });
        self
    }

    pub fn sort(mut self, field: &str, desc: bool) -> Self {
        self.sort.push(SortEntry {
            field: field.to_string(),
            desc,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn aggregate(mut self, agg: AggType, field: &str) -> Self {
        self.aggregations.push(AggEntry {
            agg,
            field: field.to_string(),
        });
        self
    }

    pub fn req_total(mut self) -> Self {
        self.with_total = true;
        self
    }

    pub fn join(mut self, join: JoinedQuery) -> Self {
        self.joins.push(join);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stable textual identity of the request, used as the result cache
    /// key. The deadline is execution state, not identity.
    pub fn fingerprint(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let _ = write!(out, "ns={};", self.namespace);
        for e in &self.entries {
            let _ = write!(
                out,
                "{:?} {} {} {:?};",
                e.op,
                e.field,
                e.cond.name(),
                e.values
            );
        }
        for s in &self.sort {
            let _ = write!(out, "sort {} {};", s.field, s.desc);
        }
        let _ = write!(out, "lim {:?} off {};", self.limit, self.offset);
        for a in &self.aggregations {
            let _ = write!(out, "agg {} {};", a.agg.name(), a.field);
        }
        for j in &self.joins {
            let _ = write!(
                out,
                "join {:?} {} on {} {} {};",
                j.join_type,
                j.namespace,
                j.left_field,
                j.cond.name(),
                j.right_field
            );
            for e in &j.entries {
                let _ = write!(out, "{:?} {} {} {:?};", e.op, e.field, e.cond.name(), e.values);
            }
        }
        if self.with_total {
            out.push_str("total;");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chains() {
        let q = Query::new("users")
            .where_("name", CondType::Eq, vec![Value::String("Ada".into())])
            .or_where("age", CondType::Gt, vec![Value::Int32(30)])
            .sort("age", false)
            .limit(10)
            .offset(2)
            .req_total();
        assert_eq!(q.entries.len(), 2);
        assert_eq!(q.entries[1].op, OpType::Or);
        assert_eq!(q.limit, Some(10));
        assert!(q.with_total);
    }

    #[test]
    fn fingerprint_ignores_deadline() {
        let a = Query::new("users").where_("age", CondType::Gt, vec![Value::Int32(1)]);
        let b = a.clone().with_deadline(Instant::now());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_queries() {
        let a = Query::new("users").where_("age", CondType::Gt, vec![Value::Int32(1)]);
        let b = Query::new("users").where_("age", CondType::Ge, vec![Value::Int32(1)]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
