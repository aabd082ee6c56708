use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use crate::core::collate::{collate_compare, CollateOpts};
use crate::core::error::{Error, Result};
use crate::core::value::{KeyRef, KeyValueType, Value};
use crate::payload::{FieldsSet, PayloadType, PayloadValue};
use crate::query::query::CondType;

/// Scalar key that knows its hashable form; doubles hash by bit pattern.
pub trait ScalarKey: Copy + PartialOrd {
    type Hashed: Eq + Hash + std::fmt::Debug;
    fn hashed(self) -> Self::Hashed;
}

impl ScalarKey for i32 {
    type Hashed = i32;
    fn hashed(self) -> i32 {
        self
    }
}

impl ScalarKey for i64 {
    type Hashed = i64;
    fn hashed(self) -> i64 {
        self
    }
}

impl ScalarKey for f64 {
    type Hashed = u64;
    fn hashed(self) -> u64 {
        self.to_bits()
    }
}

/// One comparator monomorphised per scalar type. Configured once with the
/// condition's values, then probed per candidate.
#[derive(Debug, Default)]
struct ScalarComparator<T: ScalarKey> {
    values: Vec<T>,
    set: Option<HashSet<T::Hashed>>,
}

impl<T: ScalarKey> ScalarComparator<T> {
    fn set_values(&mut self, cond: CondType, values: impl Iterator<Item = T>) {
        if cond == CondType::Set {
            self.set = Some(values.map(|v| v.hashed()).collect());
        } else {
            self.values = values.collect();
        }
    }

    fn compare(&self, cond: CondType, lhs: T) -> bool {
        match cond {
            CondType::Eq => lhs == self.values[0],
            CondType::Lt => lhs < self.values[0],
            CondType::Le => lhs <= self.values[0],
            CondType::Gt => lhs > self.values[0],
            CondType::Ge => lhs >= self.values[0],
            CondType::Range => lhs >= self.values[0] && lhs <= self.values[1],
            CondType::Set => self
                .set
                .as_ref()
                .map(|s| s.contains(&lhs.hashed()))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// String comparator; all ordering goes through the collation routine.
/// Set membership hashes only under the default collation, because hashing
/// is not collation-defined.
#[derive(Debug, Default)]
struct StringComparator {
    values: Vec<String>,
    set: Option<HashSet<String>>,
}

impl StringComparator {
    fn set_values(&mut self, cond: CondType, collate: &CollateOpts, values: impl Iterator<Item = String>) {
        if cond == CondType::Set && collate.is_none() {
            self.set = Some(values.collect());
        } else {
            self.values = values.collect();
        }
    }

    fn compare(&self, cond: CondType, lhs: &str, collate: &CollateOpts) -> bool {
        use std::cmp::Ordering::*;
        match cond {
            CondType::Eq => collate_compare(lhs, &self.values[0], collate) == Equal,
            CondType::Lt => collate_compare(lhs, &self.values[0], collate) == Less,
            CondType::Le => collate_compare(lhs, &self.values[0], collate) != Greater,
            CondType::Gt => collate_compare(lhs, &self.values[0], collate) == Greater,
            CondType::Ge => collate_compare(lhs, &self.values[0], collate) != Less,
            CondType::Range => {
                collate_compare(lhs, &self.values[0], collate) != Less
                    && collate_compare(lhs, &self.values[1], collate) != Greater
            }
            CondType::Set => match &self.set {
                Some(set) => set.contains(lhs),
                None => self
                    .values
                    .iter()
                    .any(|v| collate_compare(lhs, v, collate) == Equal),
            },
            _ => false,
        }
    }
}

/// Composite comparator: delegates to field-set payload comparison.
#[derive(Debug)]
struct CompositeComparator {
    payload_type: Arc<PayloadType>,
    fields: FieldsSet,
    values: Vec<PayloadValue>,
}

impl CompositeComparator {
    fn compare(&self, cond: CondType, lhs: &PayloadValue, collate: &CollateOpts) -> bool {
        use std::cmp::Ordering::*;
        let cmp_to = |rhs: &PayloadValue| lhs.compare(rhs, &self.payload_type, &self.fields, collate);
        match cond {
            CondType::Eq => cmp_to(&self.values[0]) == Equal,
            CondType::Lt => cmp_to(&self.values[0]) == Less,
            CondType::Le => cmp_to(&self.values[0]) != Greater,
            CondType::Gt => cmp_to(&self.values[0]) == Greater,
            CondType::Ge => cmp_to(&self.values[0]) != Less,
            CondType::Range => {
                cmp_to(&self.values[0]) != Less && cmp_to(&self.values[1]) != Greater
            }
            CondType::Set => self.values.iter().any(|v| cmp_to(v) == Equal),
            _ => false,
        }
    }
}

/// Residual predicate evaluator. Built once per query predicate and called
/// for every candidate record the indexes could not rule out.
#[derive(Debug)]
pub struct Comparator {
    cond: CondType,
    field_type: KeyValueType,
    field: usize,
    is_array: bool,
    collate: CollateOpts,

    cmp_i32: ScalarComparator<i32>,
    cmp_i64: ScalarComparator<i64>,
    cmp_f64: ScalarComparator<f64>,
    cmp_str: StringComparator,
    cmp_composite: Option<CompositeComparator>,
}

impl Comparator {
    /// Comparator over one payload field. Non-convertible values fall back
    /// to the type's default rather than failing, so a mistyped literal
    /// simply never matches.
    pub fn new(
        cond: CondType,
        field: usize,
        field_type: KeyValueType,
        is_array: bool,
        values: &[Value],
        collate: CollateOpts,
    ) -> Result<Comparator> {
        if cond == CondType::Match {
            return Err(Error::params(
                "match condition needs a full-text index, it can't run as a scan",
            ));
        }
        let needed = match cond {
            CondType::Empty | CondType::Any => 0,
            CondType::Range => 2,
            CondType::Set => values.len(),
            _ => 1,
        };
        if values.len() < needed {
            return Err(Error::params(format!(
                "condition '{}' needs {} value(s), got {}",
                cond.name(),
                needed,
                values.len()
            )));
        }

        let mut cmp = Comparator {
            cond,
            field_type,
            field,
            is_array,
            collate,
            cmp_i32: ScalarComparator::default(),
            cmp_i64: ScalarComparator::default(),
            cmp_f64: ScalarComparator::default(),
            cmp_str: StringComparator::default(),
            cmp_composite: None,
        };

        match field_type {
            KeyValueType::Int32 => cmp.cmp_i32.set_values(
                cond,
                values.iter().map(|v| {
                    match v.convert_or_default(KeyValueType::Int32) {
                        Value::Int32(x) => x,
                        _ => 0,
                    }
                }),
            ),
            KeyValueType::Int64 => cmp.cmp_i64.set_values(
                cond,
                values.iter().map(|v| {
                    match v.convert_or_default(KeyValueType::Int64) {
                        Value::Int64(x) => x,
                        _ => 0,
                    }
                }),
            ),
            KeyValueType::Double => cmp.cmp_f64.set_values(
                cond,
                values.iter().map(|v| {
                    match v.convert_or_default(KeyValueType::Double) {
                        Value::Double(x) => x,
                        _ => 0.0,
                    }
                }),
            ),
            KeyValueType::String => {
                let collate = cmp.collate.clone();
                cmp.cmp_str.set_values(
                    cond,
                    &collate,
                    values.iter().map(|v| {
                        match v.convert_or_default(KeyValueType::String) {
                            Value::String(s) => s,
                            _ => String::new(),
                        }
                    }),
                )
            }
            other => {
                return Err(Error::params(format!(
                    "can't build a comparator over a {} field",
                    other.name()
                )))
            }
        }
        Ok(cmp)
    }

    /// Comparator over a composite field set.
    pub fn new_composite(
        cond: CondType,
        payload_type: Arc<PayloadType>,
        fields: FieldsSet,
        values: Vec<PayloadValue>,
        collate: CollateOpts,
    ) -> Result<Comparator> {
        if values.is_empty() && cond != CondType::Empty && cond != CondType::Any {
            return Err(Error::params("composite comparator needs values"));
        }
        if cond == CondType::Range && values.len() < 2 {
            return Err(Error::params("composite range needs two tuples"));
        }
        Ok(Comparator {
            cond,
            field_type: KeyValueType::Composite,
            field: usize::MAX,
            is_array: false,
            collate,
            cmp_i32: ScalarComparator::default(),
            cmp_i64: ScalarComparator::default(),
            cmp_f64: ScalarComparator::default(),
            cmp_str: StringComparator::default(),
            cmp_composite: Some(CompositeComparator {
                payload_type,
                fields,
                values,
            }),
        })
    }

    /// Evaluate against one record. For array fields any element may
    /// satisfy the condition; Empty and Any test the element count.
    pub fn compare_row(&self, t: &PayloadType, pv: &PayloadValue) -> bool {
        if let Some(composite) = &self.cmp_composite {
            return composite.compare(self.cond, pv, &self.collate);
        }

        if self.is_array {
            let len = pv.array_len(t, self.field);
            match self.cond {
                CondType::Empty => return len == 0,
                CondType::Any => return len > 0,
                _ => {}
            }
            return pv.get(t, self.field).iter().any(|r| self.compare_ref(r));
        }

        match self.cond {
            // A scalar field always holds a value
            CondType::Empty => false,
            CondType::Any => true,
            _ => self.compare_ref(&pv.get_one(t, self.field)),
        }
    }

    fn compare_ref(&self, r: &KeyRef<'_>) -> bool {
        match (self.field_type, r) {
            (KeyValueType::Int32, KeyRef::Int32(x)) => self.cmp_i32.compare(self.cond, *x),
            (KeyValueType::Int64, KeyRef::Int64(x)) => self.cmp_i64.compare(self.cond, *x),
            (KeyValueType::Double, KeyRef::Double(x)) => self.cmp_f64.compare(self.cond, *x),
            (KeyValueType::String, KeyRef::Str(s)) => {
                self.cmp_str.compare(self.cond, s, &self.collate)
            }
            _ => false,
        }
    }

    /// Evaluate against a raw column cell instead of the payload.
    pub fn compare_value(&self, v: &Value) -> bool {
        self.compare_ref(&v.as_key_ref())
    }
}
