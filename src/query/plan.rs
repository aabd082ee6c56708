use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::debug;

use crate::cache::JoinCacheKey;
use crate::core::collate::CollateOpts;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::value::RowId;
use crate::index::{IdSet, IndexStore, KeySelect};
use crate::ns::namespace::Namespace;
use crate::payload::PayloadValue;
use crate::query::aggregator::Aggregator;
use crate::query::comparator::Comparator;
use crate::query::query::{CondType, JoinType, JoinedQuery, OpType, Query, QueryEntry, SortEntry};
use crate::query::results::{render_json, JoinedRows, QueryResults};

/// Read-locked handles of every namespace a query joins against. The
/// caller locks them in lexicographic name order before execution.
#[derive(Default)]
pub struct JoinCtx<'a> {
    pub namespaces: HashMap<String, &'a Namespace>,
}

impl<'a> JoinCtx<'a> {
    pub fn empty() -> JoinCtx<'a> {
        JoinCtx::default()
    }
}

/// Cooperative deadline: cheap to poll every row, samples the clock only
/// every few dozen polls.
struct Deadline {
    at: Option<Instant>,
    tick: u32,
}

impl Deadline {
    fn new(at: Option<Instant>) -> Self {
        Deadline { at, tick: 0 }
    }

    fn check(&mut self) -> Result<()> {
        let at = match self.at {
            Some(at) => at,
            None => return Ok(()),
        };
        self.tick = self.tick.wrapping_add(1);
        if self.tick % 64 == 1 && Instant::now() > at {
            return Err(Error::new(ErrorKind::Timeout, "query deadline exceeded"));
        }
        Ok(())
    }

    fn check_now(&self) -> Result<()> {
        if let Some(at) = self.at {
            if Instant::now() > at {
                return Err(Error::new(ErrorKind::Timeout, "query deadline exceeded"));
            }
        }
        Ok(())
    }
}

/// Residual predicate: evaluated per candidate row, against the payload
/// or against a raw index column.
enum Residual {
    Payload(Comparator),
    Column { index_pos: usize, cmp: Comparator },
}

impl Residual {
    fn matches(&self, ns: &Namespace, row: RowId) -> bool {
        match self {
            Residual::Payload(cmp) => {
                cmp.compare_row(&ns.payload_type, &ns.items[row as usize])
            }
            Residual::Column { index_pos, cmp } => {
                match &ns.indexes[*index_pos].store {
                    IndexStore::Column(col) => match col.value(row) {
                        Some(v) => cmp.compare_value(v),
                        None => false,
                    },
                    _ => false,
                }
            }
        }
    }
}

/// One predicate resolved against the namespace.
enum PredPath {
    Indexed {
        sets: Vec<IdSet>,
        ranks: Option<HashMap<RowId, f32>>,
        /// Sets arrive in key order and may feed a pre-sorted driver.
        key_ordered: bool,
        is_array: bool,
    },
    Residual(Residual),
}

/// An AND-group: one predicate, or an OR-bracket of several.
struct Group {
    negated: bool,
    preds: Vec<QueryEntry>,
}

/// A group ready for execution.
struct Planned {
    negated: bool,
    eval: GroupEval,
    ranks: Option<HashMap<RowId, f32>>,
    /// Set when the whole group is one key-ordered index result over this
    /// field.
    key_order_field: Option<(String, Vec<IdSet>)>,
}

enum GroupEval {
    Ids(IdSet),
    /// Row matches if any id-set holds it or any residual accepts it.
    Mixed {
        sets: Vec<IdSet>,
        residuals: Vec<Residual>,
    },
}

enum DriverRows {
    /// Ascending rowId stream.
    Ids(IdSet),
    /// Key-ordered stream; may repeat rows for array fields.
    KeyOrdered(Vec<IdSet>),
    /// Relevance order, best first.
    Ranked(Vec<RowId>),
    /// All live rows ascending.
    FullScan,
    /// All live rows in a sort index's order.
    SortScan(Vec<RowId>),
}

/// Plan and execute one select against a read-locked namespace.
pub(crate) fn run_select(ns: &Namespace, q: &Query, joined: &JoinCtx<'_>) -> Result<QueryResults> {
    let mut deadline = Deadline::new(q.deadline);
    deadline.check_now()?;

    let groups = normalize(&q.entries)?;
    let mut planned = Vec::with_capacity(groups.len());
    for g in groups {
        planned.push(plan_group(ns, g)?);
    }
    deadline.check_now()?;

    // The cheapest fully-indexed positive group drives the scan
    let driver_pos = planned
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.negated && matches!(p.eval, GroupEval::Ids(_)))
        .min_by_key(|(_, p)| match &p.eval {
            GroupEval::Ids(ids) => ids.len(),
            _ => usize::MAX,
        })
        .map(|(i, _)| i);

    let mut pre_sorted = q.sort.is_empty();
    let driver = match driver_pos {
        Some(pos) => {
            let p = planned.remove(pos);
            let cardinality = match &p.eval {
                GroupEval::Ids(ids) => ids.len(),
                _ => 0,
            };
            debug!(namespace = %ns.name, cardinality, "index driver chosen");
            match p {
                Planned {
                    key_order_field: Some((field, sets)),
                    ..
                } if sort_matches(&q.sort, &field) => {
                    pre_sorted = true;
                    let mut sets = sets;
                    if q.sort[0].desc {
                        sets.reverse();
                    }
                    DriverRows::KeyOrdered(sets)
                }
                Planned {
                    ranks: Some(ranks),
                    eval: GroupEval::Ids(ids),
                    ..
                } if q.sort.is_empty() => {
                    // Full-text matches come back in relevance order
                    let mut rows: Vec<RowId> = ids.iter().collect();
                    rows.sort_by(|a, b| {
                        let ra = ranks.get(a).copied().unwrap_or(0.0);
                        let rb = ranks.get(b).copied().unwrap_or(0.0);
                        rb.partial_cmp(&ra)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.cmp(b))
                    });
                    DriverRows::Ranked(rows)
                }
                Planned {
                    eval: GroupEval::Ids(ids),
                    ..
                } => DriverRows::Ids(ids),
                _ => unreachable!("driver group is fully indexed"),
            }
        }
        None => match sort_scan_rows(ns, &q.sort) {
            Some(rows) => {
                pre_sorted = true;
                DriverRows::SortScan(rows)
            }
            None => {
                debug!(namespace = %ns.name, "no usable index, scanning");
                DriverRows::FullScan
            }
        },
    };

    let needs_post_sort = !q.sort.is_empty() && !pre_sorted;
    let can_stop_early = q.limit.is_some()
        && !q.with_total
        && q.aggregations.is_empty()
        && q.joins.is_empty()
        && !needs_post_sort;
    let stop_at = q.limit.map(|l| q.offset + l).unwrap_or(usize::MAX);

    // Drive candidates through the remaining groups
    let mut survivors: Vec<RowId> = Vec::new();
    let mut joined_rows: HashMap<RowId, Vec<JoinedRows>> = HashMap::new();
    let mut seen: HashSet<RowId> = HashSet::new();
    let dedup = matches!(&driver, DriverRows::KeyOrdered(_));

    let mut visit = |row: RowId, ns: &Namespace, deadline: &mut Deadline| -> Result<bool> {
        deadline.check()?;
        if dedup && !seen.insert(row) {
            return Ok(true);
        }
        for p in &planned {
            if !group_hit(p, ns, row) {
                return Ok(true);
            }
        }
        if !q.joins.is_empty() {
            match run_joins(ns, joined, q, row, deadline)? {
                Some(rows) => {
                    joined_rows.insert(row, rows);
                }
                None => return Ok(true),
            }
        }
        survivors.push(row);
        Ok(!(can_stop_early && survivors.len() >= stop_at))
    };

    match &driver {
        DriverRows::Ids(ids) => {
            for row in ids.iter() {
                if !visit(row, ns, &mut deadline)? {
                    break;
                }
            }
        }
        DriverRows::KeyOrdered(sets) => {
            'outer: for set in sets {
                for row in set.iter() {
                    if !visit(row, ns, &mut deadline)? {
                        break 'outer;
                    }
                }
            }
        }
        DriverRows::Ranked(rows) | DriverRows::SortScan(rows) => {
            for &row in rows {
                if !visit(row, ns, &mut deadline)? {
                    break;
                }
            }
        }
        DriverRows::FullScan => {
            for row in 0..ns.items.len() as RowId {
                if ns.deleted.contains(row) {
                    continue;
                }
                if !visit(row, ns, &mut deadline)? {
                    break;
                }
            }
        }
    }
    drop(visit);
    deadline.check_now()?;

    if needs_post_sort {
        sort_rows(ns, &mut survivors, &q.sort)?;
    }

    let total_count = survivors.len();

    let mut aggregations = Vec::with_capacity(q.aggregations.len());
    for entry in &q.aggregations {
        let mut agg = Aggregator::new(entry, &ns.payload_type, ns.max_facet_buckets)?;
        for &row in &survivors {
            agg.accumulate(&ns.payload_type, &ns.items[row as usize]);
        }
        aggregations.push(agg.finish());
    }

    let window: Vec<RowId> = survivors
        .into_iter()
        .skip(q.offset)
        .take(q.limit.unwrap_or(usize::MAX))
        .collect();

    let items: Vec<(RowId, PayloadValue)> = window
        .iter()
        .map(|&row| (row, ns.items[row as usize].clone()))
        .collect();
    let joined_out: HashMap<RowId, Vec<JoinedRows>> = window
        .iter()
        .filter_map(|row| joined_rows.remove(row).map(|j| (*row, j)))
        .collect();

    Ok(QueryResults {
        payload_type: ns.payload_type.clone(),
        items,
        total_count,
        aggregations,
        joined: joined_out,
    })
}

/// Fold the flat predicate list into outer-AND groups of OR-brackets.
fn normalize(entries: &[QueryEntry]) -> Result<Vec<Group>> {
    let mut groups: Vec<Group> = Vec::new();
    for e in entries {
        match e.op {
            OpType::And => groups.push(Group {
                negated: false,
                preds: vec![e.clone()],
            }),
            OpType::Not => groups.push(Group {
                negated: true,
                preds: vec![e.clone()],
            }),
            OpType::Or => match groups.last_mut() {
                Some(g) if !g.negated => g.preds.push(e.clone()),
                Some(_) => {
                    return Err(Error::params("OR can't follow a negated predicate"))
                }
                // A leading OR opens the bracket like an AND would
                None => groups.push(Group {
                    negated: false,
                    preds: vec![e.clone()],
                }),
            },
        }
    }
    Ok(groups)
}

fn plan_group(ns: &Namespace, g: Group) -> Result<Planned> {
    let mut sets: Vec<IdSet> = Vec::new();
    let mut residuals: Vec<Residual> = Vec::new();
    let mut ranks: Option<HashMap<RowId, f32>> = None;
    let mut key_order_field = None;

    let single = g.preds.len() == 1;
    for e in &g.preds {
        match resolve_pred(ns, e)? {
            PredPath::Indexed {
                sets: pred_sets,
                ranks: pred_ranks,
                key_ordered,
                is_array,
            } => {
                if single && key_ordered && !is_array {
                    key_order_field = Some((e.field.clone(), pred_sets.clone()));
                }
                if let Some(r) = pred_ranks {
                    ranks.get_or_insert_with(HashMap::new).extend(r);
                }
                sets.extend(pred_sets);
            }
            PredPath::Residual(r) => residuals.push(r),
        }
    }

    let eval = if residuals.is_empty() {
        GroupEval::Ids(IdSet::union_many(&sets))
    } else {
        GroupEval::Mixed { sets, residuals }
    };
    Ok(Planned {
        negated: g.negated,
        eval,
        ranks,
        key_order_field,
    })
}

fn resolve_pred(ns: &Namespace, e: &QueryEntry) -> Result<PredPath> {
    if let Some(pos) = find_index(ns, &e.field) {
        let ix = &ns.indexes[pos];
        match ix.select(&e.values, e.cond)? {
            KeySelect::Ids(sets) => {
                let key_ordered = ix.is_ordered()
                    && matches!(
                        e.cond,
                        CondType::Eq
                            | CondType::Lt
                            | CondType::Le
                            | CondType::Gt
                            | CondType::Ge
                            | CondType::Range
                    );
                return Ok(PredPath::Indexed {
                    sets,
                    ranks: None,
                    key_ordered,
                    is_array: ix.def.opts.is_array,
                });
            }
            KeySelect::Ranked(ids, ranks) => {
                return Ok(PredPath::Indexed {
                    sets: vec![ids],
                    ranks: Some(ranks),
                    key_ordered: false,
                    is_array: false,
                });
            }
            KeySelect::Scan => {
                if matches!(ix.store, IndexStore::Column(_)) {
                    let cmp = field_comparator(ns, e)?;
                    return Ok(PredPath::Residual(Residual::Column {
                        index_pos: pos,
                        cmp,
                    }));
                }
                if ix.def.is_composite() {
                    return Ok(PredPath::Residual(Residual::Payload(
                        composite_comparator(ns, pos, e)?,
                    )));
                }
                // Ordered/hash index that can't serve this condition:
                // fall through to a payload comparator
            }
        }
    }
    Ok(PredPath::Residual(Residual::Payload(field_comparator(
        ns, e,
    )?)))
}

fn field_comparator(ns: &Namespace, e: &QueryEntry) -> Result<Comparator> {
    let field = ns.payload_type.field_by_name(&e.field)?;
    let f = ns.payload_type.field(field);
    Comparator::new(
        e.cond,
        field,
        f.field_type,
        f.is_array,
        &e.values,
        collate_for_field(ns, field),
    )
}

fn composite_comparator(ns: &Namespace, pos: usize, e: &QueryEntry) -> Result<Comparator> {
    let ix = &ns.indexes[pos];
    let arity = ix.fields.len();
    if arity == 0 || e.values.len() % arity != 0 {
        return Err(Error::params(format!(
            "composite condition values must come in groups of {}",
            arity
        )));
    }
    let mut rhs = Vec::new();
    for chunk in e.values.chunks(arity) {
        let mut pv = PayloadValue::new(&ns.payload_type);
        for (&field, v) in ix.fields.iter().zip(chunk) {
            pv.set(&ns.payload_type, field, std::slice::from_ref(v))?;
        }
        rhs.push(pv);
    }
    Comparator::new_composite(
        e.cond,
        ns.payload_type.clone(),
        ix.fields.clone(),
        rhs,
        ix.def.opts.collate.clone(),
    )
}

fn find_index(ns: &Namespace, field: &str) -> Option<usize> {
    ns.indexes.iter().position(|ix| {
        ix.def.name == field
            || (!ix.def.is_composite() && ix.def.json_paths.iter().any(|p| p == field))
    })
}

fn collate_for_field(ns: &Namespace, field: usize) -> CollateOpts {
    ns.indexes
        .iter()
        .find(|ix| !ix.def.is_composite() && ix.fields.first() == Some(&field))
        .map(|ix| ix.def.opts.collate.clone())
        .unwrap_or_default()
}

fn group_hit(p: &Planned, ns: &Namespace, row: RowId) -> bool {
    let hit = match &p.eval {
        GroupEval::Ids(set) => set.contains(row),
        GroupEval::Mixed { sets, residuals } => {
            sets.iter().any(|s| s.contains(row))
                || residuals.iter().any(|r| r.matches(ns, row))
        }
    };
    hit != p.negated
}

fn sort_matches(sort: &[SortEntry], field: &str) -> bool {
    sort.len() == 1 && sort[0].field == field
}

/// All live rows in the order of an ordered index over the first sort
/// field, when one exists.
fn sort_scan_rows(ns: &Namespace, sort: &[SortEntry]) -> Option<Vec<RowId>> {
    let first = match sort {
        [first] => first,
        _ => return None,
    };
    let pos = find_index(ns, &first.field)?;
    let ix = &ns.indexes[pos];
    if ix.def.opts.is_array {
        return None;
    }
    ix.sorted_rows(first.desc)
}

fn sort_rows(ns: &Namespace, rows: &mut [RowId], sort: &[SortEntry]) -> Result<()> {
    let mut specs = Vec::with_capacity(sort.len());
    for s in sort {
        let field = ns.payload_type.field_by_name(&s.field)?;
        specs.push((field, s.desc, collate_for_field(ns, field)));
    }
    rows.sort_by(|&a, &b| {
        for (field, desc, collate) in &specs {
            let pa = &ns.items[a as usize];
            let pb = &ns.items[b as usize];
            let ord = pa
                .get_one(&ns.payload_type, *field)
                .compare(&pb.get_one(&ns.payload_type, *field), collate)
                .unwrap_or(std::cmp::Ordering::Equal);
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        a.cmp(&b)
    });
    Ok(())
}

fn join_fingerprint(j: &JoinedQuery) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let _ = write!(
        out,
        "{:?} {} on {} {};",
        j.join_type,
        j.namespace,
        j.right_field,
        j.cond.name()
    );
    for e in &j.entries {
        let _ = write!(out, "{:?} {} {} {:?};", e.op, e.field, e.cond.name(), e.values);
    }
    out
}

/// Evaluate all join specs for one main row. `None` means an inner join
/// found nothing and the row drops out.
fn run_joins(
    ns: &Namespace,
    joined: &JoinCtx<'_>,
    q: &Query,
    row: RowId,
    deadline: &mut Deadline,
) -> Result<Option<Vec<JoinedRows>>> {
    let mut out = Vec::with_capacity(q.joins.len());
    for j in &q.joins {
        deadline.check()?;
        let jns = joined.namespaces.get(&j.namespace).ok_or_else(|| {
            Error::not_found(format!("joined namespace '{}' not found", j.namespace))
        })?;

        let left_field = ns.payload_type.field_by_name(&j.left_field)?;
        let bound = ns.items[row as usize]
            .get_one(&ns.payload_type, left_field)
            .to_value();
        if bound.is_null() {
            if j.join_type == JoinType::Inner {
                return Ok(None);
            }
            out.push(JoinedRows {
                namespace: j.namespace.clone(),
                rows: Vec::new(),
            });
            continue;
        }

        let key = JoinCacheKey {
            fingerprint: join_fingerprint(j),
            bound: bound.clone(),
            joined_version: jns.version,
        };
        let ids = match ns.join_cache.get(&key) {
            Some(hit) => hit,
            None => {
                let mut sub = Query::new(&j.namespace);
                sub.entries.push(QueryEntry {
                    op: OpType::And,
                    field: j.right_field.clone(),
                    cond: j.cond,
                    values: vec![bound],
                });
                sub.entries.extend(j.entries.iter().cloned());
                sub.deadline = q.deadline;
                let res = run_select(jns, &sub, &JoinCtx::empty())?;
                let ids = IdSet::from_vec(res.items.iter().map(|(r, _)| *r).collect());
                ns.join_cache.put(key, ids.clone());
                ids
            }
        };

        if ids.is_empty() && j.join_type == JoinType::Inner {
            return Ok(None);
        }
        out.push(JoinedRows {
            namespace: j.namespace.clone(),
            rows: ids
                .iter()
                .map(|r| render_json(&jns.payload_type, &jns.items[r as usize]))
                .collect(),
        });
    }
    Ok(Some(out))
}
