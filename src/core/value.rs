use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::core::collate::{collate_compare, CollateOpts};
use crate::core::error::{Error, ErrorKind, Result};
use crate::payload::payload_value::PayloadValue;

/// Dense integer identifier of an item within its namespace.
pub type RowId = u32;

/// Closed tag set for everything a field or index key can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyValueType {
    Int32,
    Int64,
    Double,
    String,
    Composite,
    Null,
    Undefined,
}

impl KeyValueType {
    pub fn name(&self) -> &'static str {
        match self {
            KeyValueType::Int32 => "int",
            KeyValueType::Int64 => "int64",
            KeyValueType::Double => "double",
            KeyValueType::String => "string",
            KeyValueType::Composite => "composite",
            KeyValueType::Null => "null",
            KeyValueType::Undefined => "undefined",
        }
    }

    /// Tag written into serialized payload types.
    pub fn tag(&self) -> u64 {
        match self {
            KeyValueType::Int32 => 0,
            KeyValueType::Int64 => 1,
            KeyValueType::Double => 2,
            KeyValueType::String => 3,
            KeyValueType::Composite => 4,
            KeyValueType::Null => 5,
            KeyValueType::Undefined => 6,
        }
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        Ok(match tag {
            0 => KeyValueType::Int32,
            1 => KeyValueType::Int64,
            2 => KeyValueType::Double,
            3 => KeyValueType::String,
            4 => KeyValueType::Composite,
            5 => KeyValueType::Null,
            6 => KeyValueType::Undefined,
            _ => {
                return Err(Error::new(
                    ErrorKind::ParseJson,
                    format!("unknown value type tag {}", tag),
                ))
            }
        })
    }

    /// Size in bytes of one element of this type inside a payload record.
    /// Strings occupy a 4-byte slot into the record's string table.
    pub fn elem_size(&self) -> usize {
        match self {
            KeyValueType::Int32 => 4,
            KeyValueType::Int64 => 8,
            KeyValueType::Double => 8,
            KeyValueType::String => 4,
            KeyValueType::Composite | KeyValueType::Null | KeyValueType::Undefined => 0,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            KeyValueType::Int32 | KeyValueType::Int64 | KeyValueType::Double
        )
    }
}

/// Owning tagged value. Strings and composites own their storage.
#[derive(Debug, Clone)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Composite(PayloadValue),
    Null,
}

impl Value {
    pub fn value_type(&self) -> KeyValueType {
        match self {
            Value::Int32(_) => KeyValueType::Int32,
            Value::Int64(_) => KeyValueType::Int64,
            Value::Double(_) => KeyValueType::Double,
            Value::String(_) => KeyValueType::String,
            Value::Composite(_) => KeyValueType::Composite,
            Value::Null => KeyValueType::Null,
        }
    }

    pub fn as_key_ref(&self) -> KeyRef<'_> {
        match self {
            Value::Int32(v) => KeyRef::Int32(*v),
            Value::Int64(v) => KeyRef::Int64(*v),
            Value::Double(v) => KeyRef::Double(*v),
            Value::String(s) => KeyRef::Str(s),
            Value::Composite(p) => KeyRef::Composite(p),
            Value::Null => KeyRef::Null,
        }
    }

    /// Strict conversion. Numeric widening and numeric strings are allowed,
    /// anything else is a parameter error.
    pub fn convert(&self, to: KeyValueType) -> Result<Value> {
        if self.value_type() == to {
            return Ok(self.clone());
        }
        match (self, to) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Int32(v), KeyValueType::Int64) => Ok(Value::Int64(*v as i64)),
            (Value::Int32(v), KeyValueType::Double) => Ok(Value::Double(*v as f64)),
            (Value::Int64(v), KeyValueType::Int32) => Ok(Value::Int32(*v as i32)),
            (Value::Int64(v), KeyValueType::Double) => Ok(Value::Double(*v as f64)),
            (Value::Double(v), KeyValueType::Int32) => Ok(Value::Int32(*v as i32)),
            (Value::Double(v), KeyValueType::Int64) => Ok(Value::Int64(*v as i64)),
            (Value::Int32(v), KeyValueType::String) => Ok(Value::String(v.to_string())),
            (Value::Int64(v), KeyValueType::String) => Ok(Value::String(v.to_string())),
            (Value::Double(v), KeyValueType::String) => Ok(Value::String(v.to_string())),
            (Value::String(s), t) if t.is_numeric() => {
                let trimmed = s.trim();
                let parsed = match t {
                    KeyValueType::Int32 => trimmed.parse::<i32>().ok().map(Value::Int32),
                    KeyValueType::Int64 => trimmed.parse::<i64>().ok().map(Value::Int64),
                    _ => trimmed.parse::<f64>().ok().map(Value::Double),
                };
                parsed.ok_or_else(|| {
                    Error::params(format!("can't convert '{}' to {}", s, t.name()))
                })
            }
            _ => Err(Error::params(format!(
                "can't convert {} to {}",
                self.value_type().name(),
                to.name()
            ))),
        }
    }

    /// Lenient conversion used when configuring comparators: a non-numeric
    /// string becomes the target type's default instead of failing.
    pub fn convert_or_default(&self, to: KeyValueType) -> Value {
        self.convert(to).unwrap_or_else(|_| match to {
            KeyValueType::Int32 => Value::Int32(0),
            KeyValueType::Int64 => Value::Int64(0),
            KeyValueType::Double => Value::Double(0.0),
            KeyValueType::String => Value::String(String::new()),
            _ => Value::Null,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Null, Value::Null) => true,
            // Composite equality needs the payload type; it goes through the
            // composite index helpers, never through here.
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Composite(_) | Value::Null => {}
        }
    }
}

/// Non-owning view of a value: inline scalar, borrowed string slice, or a
/// borrowed payload handle for composites.
#[derive(Debug, Clone, Copy)]
pub enum KeyRef<'a> {
    Int32(i32),
    Int64(i64),
    Double(f64),
    Str(&'a str),
    Composite(&'a PayloadValue),
    Null,
}

impl<'a> KeyRef<'a> {
    pub fn value_type(&self) -> KeyValueType {
        match self {
            KeyRef::Int32(_) => KeyValueType::Int32,
            KeyRef::Int64(_) => KeyValueType::Int64,
            KeyRef::Double(_) => KeyValueType::Double,
            KeyRef::Str(_) => KeyValueType::String,
            KeyRef::Composite(_) => KeyValueType::Composite,
            KeyRef::Null => KeyValueType::Null,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeyRef::Int32(v) => Value::Int32(*v),
            KeyRef::Int64(v) => Value::Int64(*v),
            KeyRef::Double(v) => Value::Double(*v),
            KeyRef::Str(s) => Value::String((*s).to_string()),
            KeyRef::Composite(p) => Value::Composite((*p).clone()),
            KeyRef::Null => Value::Null,
        }
    }

    /// Order two refs of compatible types. Mixed numerics compare as f64,
    /// strings go through the collation routine. `None` for incomparable
    /// type pairs.
    pub fn compare(&self, other: &KeyRef<'_>, collate: &CollateOpts) -> Option<Ordering> {
        match (self, other) {
            (KeyRef::Str(a), KeyRef::Str(b)) => Some(collate_compare(a, b, collate)),
            (KeyRef::Null, KeyRef::Null) => Some(Ordering::Equal),
            (KeyRef::Null, _) => Some(Ordering::Less),
            (_, KeyRef::Null) => Some(Ordering::Greater),
            (a, b) => {
                let x = a.as_f64()?;
                let y = b.as_f64()?;
                x.partial_cmp(&y)
            }
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            KeyRef::Int32(v) => Some(*v as f64),
            KeyRef::Int64(v) => Some(*v as f64),
            KeyRef::Double(v) => Some(*v),
            _ => None,
        }
    }
}
