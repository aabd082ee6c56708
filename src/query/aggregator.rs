use std::collections::BTreeMap;

use crate::core::error::Result;
use crate::core::value::{KeyRef, Value};
use crate::payload::{PayloadType, PayloadValue};
use crate::query::query::{AggEntry, AggType};
use crate::query::results::{AggResult, FacetBucket};

/// Single-pass accumulator for one aggregation request. Fed every row of
/// the filtered stream, drained once at the end.
#[derive(Debug)]
pub struct Aggregator {
    agg: AggType,
    field_name: String,
    field: usize,

    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    count: usize,
    /// Facet and distinct buckets, ordered by value. Bounded; overflow
    /// drops new buckets rather than growing without limit.
    buckets: BTreeMap<BucketKey, (Value, usize)>,
    bucket_cap: usize,
}

/// Orderable bucket key: numbers by value, strings lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum BucketKey {
    Num(u64),
    Str(String),
}

impl BucketKey {
    fn from_ref(r: &KeyRef<'_>) -> Option<(BucketKey, Value)> {
        match r {
            KeyRef::Int32(v) => Some((BucketKey::Num(ord_bits(*v as f64)), Value::Int32(*v))),
            KeyRef::Int64(v) => Some((BucketKey::Num(ord_bits(*v as f64)), Value::Int64(*v))),
            KeyRef::Double(v) => Some((BucketKey::Num(ord_bits(*v)), Value::Double(*v))),
            KeyRef::Str(s) => Some((BucketKey::Str(s.to_string()), Value::String(s.to_string()))),
            _ => None,
        }
    }
}

fn ord_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

impl Aggregator {
    pub fn new(entry: &AggEntry, t: &PayloadType, bucket_cap: usize) -> Result<Aggregator> {
        let field = t.field_by_name(&entry.field)?;
        Ok(Aggregator {
            agg: entry.agg,
            field_name: entry.field.clone(),
            field,
            min: None,
            max: None,
            sum: 0.0,
            count: 0,
            buckets: BTreeMap::new(),
            bucket_cap,
        })
    }

    pub fn accumulate(&mut self, t: &PayloadType, pv: &PayloadValue) {
        for r in pv.get(t, self.field) {
            match self.agg {
                AggType::Min | AggType::Max | AggType::Sum | AggType::Avg => {
                    let v = match r {
                        KeyRef::Int32(x) => x as f64,
                        KeyRef::Int64(x) => x as f64,
                        KeyRef::Double(x) => x,
                        _ => continue,
                    };
                    self.min = Some(self.min.map_or(v, |m| m.min(v)));
                    self.max = Some(self.max.map_or(v, |m| m.max(v)));
                    self.sum += v;
                    self.count += 1;
                }
                AggType::Facet | AggType::Distinct => {
                    if let Some((key, value)) = BucketKey::from_ref(&r) {
                        if self.buckets.len() < self.bucket_cap || self.buckets.contains_key(&key)
                        {
                            self.buckets.entry(key).or_insert((value, 0)).1 += 1;
                        }
                    }
                }
            }
        }
    }

    pub fn finish(self) -> AggResult {
        let value = match self.agg {
            AggType::Min => self.min,
            AggType::Max => self.max,
            AggType::Sum => Some(self.sum),
            AggType::Avg => {
                if self.count == 0 {
                    None
                } else {
                    Some(self.sum / self.count as f64)
                }
            }
            _ => None,
        };

        let mut facets = Vec::new();
        let mut distinct = Vec::new();
        if matches!(self.agg, AggType::Facet | AggType::Distinct) {
            for (value, count) in self.buckets.into_values() {
                if self.agg == AggType::Facet {
                    facets.push(FacetBucket { value, count });
                } else {
                    distinct.push(value);
                }
            }
        }

        AggResult {
            agg: self.agg,
            field: self.field_name,
            value,
            facets,
            distinct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::KeyValueType;
    use crate::payload::field_type::PayloadFieldType;
    use crate::query::query::AggEntry;

    fn setup() -> (PayloadType, Vec<PayloadValue>) {
        let mut t = PayloadType::new("t");
        t.add(PayloadFieldType::new("age", KeyValueType::Int32, "age", false))
            .unwrap();
        t.add(PayloadFieldType::new(
            "name",
            KeyValueType::String,
            "name",
            false,
        ))
        .unwrap();
        let rows = [(36, "ada"), (40, "bo"), (20, "ada")]
            .iter()
            .map(|&(age, name)| {
                let mut pv = PayloadValue::new(&t);
                pv.set(&t, 0, &[Value::Int32(age)]).unwrap();
                pv.set(&t, 1, &[Value::String(name.into())]).unwrap();
                pv
            })
            .collect();
        (t, rows)
    }

    fn run(agg: AggType, field: &str) -> AggResult {
        let (t, rows) = setup();
        let mut a = Aggregator::new(
            &AggEntry {
                agg,
                field: field.to_string(),
            },
            &t,
            100,
        )
        .unwrap();
        for pv in &rows {
            a.accumulate(&t, pv);
        }
        a.finish()
    }

    #[test]
    fn numeric_aggregates() {
        assert_eq!(run(AggType::Min, "age").value, Some(20.0));
        assert_eq!(run(AggType::Max, "age").value, Some(40.0));
        assert_eq!(run(AggType::Sum, "age").value, Some(96.0));
        assert_eq!(run(AggType::Avg, "age").value, Some(32.0));
    }

    #[test]
    fn facet_counts_values() {
        let r = run(AggType::Facet, "name");
        assert_eq!(r.facets.len(), 2);
        assert_eq!(r.facets[0].value, Value::String("ada".into()));
        assert_eq!(r.facets[0].count, 2);
        assert_eq!(r.facets[1].count, 1);
    }

    #[test]
    fn distinct_lists_each_value_once() {
        let r = run(AggType::Distinct, "name");
        assert_eq!(r.distinct.len(), 2);
    }

    #[test]
    fn empty_stream_yields_no_value() {
        let (t, _) = setup();
        let a = Aggregator::new(
            &AggEntry {
                agg: AggType::Avg,
                field: "age".to_string(),
            },
            &t,
            10,
        )
        .unwrap();
        assert_eq!(a.finish().value, None);
    }
}
