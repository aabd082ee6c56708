use std::cmp::Ordering;
use std::sync::Arc;

use crate::core::collate::CollateOpts;
use crate::core::error::{Error, Result};
use crate::core::value::{KeyRef, KeyValueType, Value};
use crate::payload::payload_type::PayloadType;
use crate::payload::FieldsSet;

const EMPTY_STR: &str = "";

/// Backing storage of one record: the fixed region addressed by field
/// offsets, the string table (cells hold 1-based ids into it, 0 = empty
/// string), and the array arena where array elements live back to back.
#[derive(Debug, Clone, Default)]
struct PayloadData {
    fixed: Vec<u8>,
    strings: Vec<Arc<str>>,
    arrays: Vec<u8>,
}

/// Reference-counted, clone-on-write record conforming to a [`PayloadType`].
/// Clones share storage; the first mutation of a shared record copies it.
#[derive(Debug, Clone, Default)]
pub struct PayloadValue {
    data: Arc<PayloadData>,
}

impl PayloadValue {
    /// Zeroed record sized for the given schema: numeric fields read 0,
    /// string fields read "", arrays are empty.
    pub fn new(t: &PayloadType) -> Self {
        PayloadValue {
            data: Arc::new(PayloadData {
                fixed: vec![0; t.total_size()],
                strings: Vec::new(),
                arrays: Vec::new(),
            }),
        }
    }

    /// A record that holds nothing; used for freed row slots.
    pub fn empty() -> Self {
        PayloadValue::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.fixed.is_empty()
    }

    /// True when this record's storage is shared with another handle.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    pub fn heap_size(&self) -> usize {
        self.data.fixed.len()
            + self.data.arrays.len()
            + self
                .data
                .strings
                .iter()
                .map(|s| s.len() + std::mem::size_of::<Arc<str>>())
                .sum::<usize>()
    }

    /// Read field values. Scalars yield exactly one ref; arrays yield one
    /// per element.
    pub fn get<'a>(&'a self, t: &PayloadType, field: usize) -> Vec<KeyRef<'a>> {
        let f = t.field(field);
        if !f.is_array {
            return vec![self.get_cell(f.field_type, f.offset)];
        }
        let (start, count) = self.array_bounds(f.offset);
        let elem = f.elem_sizeof();
        (0..count)
            .map(|i| self.get_arena_cell(f.field_type, start + i * elem))
            .collect()
    }

    /// First value of a field; the scalar itself for non-arrays, Null for
    /// an empty array.
    pub fn get_one<'a>(&'a self, t: &PayloadType, field: usize) -> KeyRef<'a> {
        let f = t.field(field);
        if !f.is_array {
            return self.get_cell(f.field_type, f.offset);
        }
        let (start, count) = self.array_bounds(f.offset);
        if count == 0 {
            KeyRef::Null
        } else {
            self.get_arena_cell(f.field_type, start)
        }
    }

    pub fn array_len(&self, t: &PayloadType, field: usize) -> usize {
        let f = t.field(field);
        if !f.is_array {
            return 1;
        }
        self.array_bounds(f.offset).1
    }

    /// Write field values, converting each to the field's type. Cloning
    /// happens here if the record is shared.
    pub fn set(&mut self, t: &PayloadType, field: usize, values: &[Value]) -> Result<()> {
        let f = t.field(field).clone();
        let converted: Vec<Value> = values
            .iter()
            .map(|v| v.convert(f.field_type))
            .collect::<Result<_>>()?;

        if !f.is_array {
            let v = match converted.as_slice() {
                [one] => one.clone(),
                [] => Value::Null,
                _ => {
                    return Err(Error::params(format!(
                        "field '{}' is not an array, got {} values",
                        f.name,
                        converted.len()
                    )))
                }
            };
            let data = Arc::make_mut(&mut self.data);
            Self::put_cell(data, f.field_type, f.offset, &v);
            return Ok(());
        }

        // Null elements carry nothing and are dropped from arrays
        let converted: Vec<Value> = converted.into_iter().filter(|v| !v.is_null()).collect();
        let data = Arc::make_mut(&mut self.data);
        let elem = f.elem_sizeof();
        let start = data.arrays.len();
        data.arrays.resize(start + converted.len() * elem, 0);
        for (i, v) in converted.iter().enumerate() {
            Self::put_arena_cell(data, f.field_type, start + i * elem, v);
        }
        data.fixed[f.offset..f.offset + 4].copy_from_slice(&(start as u32).to_le_bytes());
        data.fixed[f.offset + 4..f.offset + 8]
            .copy_from_slice(&(converted.len() as u32).to_le_bytes());
        Ok(())
    }

    /// Lexicographic comparison over the listed fields, in order.
    pub fn compare(
        &self,
        other: &PayloadValue,
        t: &PayloadType,
        fields: &FieldsSet,
        collate: &CollateOpts,
    ) -> Ordering {
        for &field in fields {
            let a = self.get_one(t, field);
            let b = other.get_one(t, field);
            let ord = a
                .compare(&b, collate)
                .expect("payload fields of one schema are comparable");
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn array_bounds(&self, offset: usize) -> (usize, usize) {
        let start = self.read_u32(offset) as usize;
        let count = self.read_u32(offset + 4) as usize;
        (start, count)
    }

    fn get_cell<'a>(&'a self, ft: KeyValueType, offset: usize) -> KeyRef<'a> {
        match ft {
            KeyValueType::Int32 => KeyRef::Int32(self.read_u32(offset) as i32),
            KeyValueType::Int64 => KeyRef::Int64(self.read_u64(offset) as i64),
            KeyValueType::Double => KeyRef::Double(f64::from_bits(self.read_u64(offset))),
            KeyValueType::String => {
                let id = self.read_u32(offset);
                if id == 0 {
                    KeyRef::Str(EMPTY_STR)
                } else {
                    KeyRef::Str(&self.data.strings[id as usize - 1])
                }
            }
            _ => KeyRef::Null,
        }
    }

    fn get_arena_cell<'a>(&'a self, ft: KeyValueType, pos: usize) -> KeyRef<'a> {
        match ft {
            KeyValueType::Int32 => {
                KeyRef::Int32(u32::from_le_bytes(self.arena4(pos)) as i32)
            }
            KeyValueType::Int64 => KeyRef::Int64(u64::from_le_bytes(self.arena8(pos)) as i64),
            KeyValueType::Double => {
                KeyRef::Double(f64::from_bits(u64::from_le_bytes(self.arena8(pos))))
            }
            KeyValueType::String => {
                let id = u32::from_le_bytes(self.arena4(pos));
                if id == 0 {
                    KeyRef::Str(EMPTY_STR)
                } else {
                    KeyRef::Str(&self.data.strings[id as usize - 1])
                }
            }
            _ => KeyRef::Null,
        }
    }

    fn put_cell(data: &mut PayloadData, ft: KeyValueType, offset: usize, v: &Value) {
        match (ft, v) {
            (KeyValueType::Int32, Value::Int32(x)) => {
                data.fixed[offset..offset + 4].copy_from_slice(&(*x as u32).to_le_bytes())
            }
            (KeyValueType::Int64, Value::Int64(x)) => {
                data.fixed[offset..offset + 8].copy_from_slice(&(*x as u64).to_le_bytes())
            }
            (KeyValueType::Double, Value::Double(x)) => {
                data.fixed[offset..offset + 8].copy_from_slice(&x.to_bits().to_le_bytes())
            }
            (KeyValueType::String, Value::String(s)) => {
                let existing = u32::from_le_bytes(
                    data.fixed[offset..offset + 4].try_into().expect("4-byte cell"),
                );
                let id = if existing != 0 {
                    // Reuse the table slot: the old string's refcount drops
                    // with the overwritten Arc.
                    data.strings[existing as usize - 1] = Arc::from(s.as_str());
                    existing
                } else {
                    data.strings.push(Arc::from(s.as_str()));
                    data.strings.len() as u32
                };
                data.fixed[offset..offset + 4].copy_from_slice(&id.to_le_bytes());
            }
            (_, Value::Null) => {
                let size = ft.elem_size();
                data.fixed[offset..offset + size].fill(0);
            }
            _ => unreachable!("value converted to the field type before write"),
        }
    }

    fn put_arena_cell(data: &mut PayloadData, ft: KeyValueType, pos: usize, v: &Value) {
        match (ft, v) {
            (KeyValueType::Int32, Value::Int32(x)) => {
                data.arrays[pos..pos + 4].copy_from_slice(&(*x as u32).to_le_bytes())
            }
            (KeyValueType::Int64, Value::Int64(x)) => {
                data.arrays[pos..pos + 8].copy_from_slice(&(*x as u64).to_le_bytes())
            }
            (KeyValueType::Double, Value::Double(x)) => {
                data.arrays[pos..pos + 8].copy_from_slice(&x.to_bits().to_le_bytes())
            }
            (KeyValueType::String, Value::String(s)) => {
                data.strings.push(Arc::from(s.as_str()));
                let id = data.strings.len() as u32;
                data.arrays[pos..pos + 4].copy_from_slice(&id.to_le_bytes());
            }
            _ => unreachable!("value converted to the field type before write"),
        }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(
            self.data.fixed[offset..offset + 4]
                .try_into()
                .expect("4-byte cell"),
        )
    }

    fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(
            self.data.fixed[offset..offset + 8]
                .try_into()
                .expect("8-byte cell"),
        )
    }

    fn arena4(&self, pos: usize) -> [u8; 4] {
        self.data.arrays[pos..pos + 4]
            .try_into()
            .expect("4-byte element")
    }

    fn arena8(&self, pos: usize) -> [u8; 8] {
        self.data.arrays[pos..pos + 8]
            .try_into()
            .expect("8-byte element")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::field_type::PayloadFieldType;

    fn schema() -> PayloadType {
        let mut pt = PayloadType::new("t");
        pt.add(PayloadFieldType::new("id", KeyValueType::Int32, "id", false))
            .unwrap();
        pt.add(PayloadFieldType::new(
            "name",
            KeyValueType::String,
            "name",
            false,
        ))
        .unwrap();
        pt.add(PayloadFieldType::new(
            "score",
            KeyValueType::Double,
            "score",
            false,
        ))
        .unwrap();
        pt.add(PayloadFieldType::new(
            "tags",
            KeyValueType::String,
            "tags",
            true,
        ))
        .unwrap();
        pt
    }

    #[test]
    fn scalar_set_get_round_trip() {
        let t = schema();
        let mut v = PayloadValue::new(&t);
        v.set(&t, 0, &[Value::Int32(7)]).unwrap();
        v.set(&t, 1, &[Value::String("ada".into())]).unwrap();
        v.set(&t, 2, &[Value::Double(0.5)]).unwrap();

        assert!(matches!(v.get_one(&t, 0), KeyRef::Int32(7)));
        assert!(matches!(v.get_one(&t, 1), KeyRef::Str("ada")));
        assert!(matches!(v.get_one(&t, 2), KeyRef::Double(x) if x == 0.5));
    }

    #[test]
    fn unset_fields_read_defaults() {
        let t = schema();
        let v = PayloadValue::new(&t);
        assert!(matches!(v.get_one(&t, 0), KeyRef::Int32(0)));
        assert!(matches!(v.get_one(&t, 1), KeyRef::Str("")));
        assert_eq!(v.array_len(&t, 3), 0);
    }

    #[test]
    fn array_set_get_round_trip() {
        let t = schema();
        let mut v = PayloadValue::new(&t);
        v.set(
            &t,
            3,
            &[Value::String("x".into()), Value::String("y".into())],
        )
        .unwrap();
        let refs = v.get(&t, 3);
        assert_eq!(refs.len(), 2);
        assert!(matches!(refs[0], KeyRef::Str("x")));
        assert!(matches!(refs[1], KeyRef::Str("y")));
    }

    #[test]
    fn clone_is_copy_on_write() {
        let t = schema();
        let mut a = PayloadValue::new(&t);
        a.set(&t, 0, &[Value::Int32(1)]).unwrap();

        let b = a.clone();
        assert!(a.is_shared());

        a.set(&t, 0, &[Value::Int32(2)]).unwrap();
        assert!(matches!(a.get_one(&t, 0), KeyRef::Int32(2)));
        assert!(matches!(b.get_one(&t, 0), KeyRef::Int32(1)));
    }

    #[test]
    fn type_mismatch_is_params_error() {
        let t = schema();
        let mut v = PayloadValue::new(&t);
        let err = v.set(&t, 0, &[Value::String("ada".into())]).unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Params);
        // Numeric strings convert fine
        v.set(&t, 0, &[Value::String("42".into())]).unwrap();
        assert!(matches!(v.get_one(&t, 0), KeyRef::Int32(42)));
    }

    #[test]
    fn compare_orders_fields_lexicographically() {
        let t = schema();
        let collate = CollateOpts::default();
        let mut a = PayloadValue::new(&t);
        let mut b = PayloadValue::new(&t);
        a.set(&t, 1, &[Value::String("ada".into())]).unwrap();
        b.set(&t, 1, &[Value::String("bo".into())]).unwrap();
        a.set(&t, 0, &[Value::Int32(9)]).unwrap();
        b.set(&t, 0, &[Value::Int32(9)]).unwrap();

        assert_eq!(a.compare(&b, &t, &vec![0, 1], &collate), Ordering::Less);
        assert_eq!(a.compare(&b, &t, &vec![0], &collate), Ordering::Equal);
    }
}
