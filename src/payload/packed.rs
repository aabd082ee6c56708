use crate::core::error::{Error, ErrorKind, Result};
use crate::core::value::{KeyRef, KeyValueType, Value};
use crate::payload::payload_type::PayloadType;
use crate::payload::payload_value::PayloadValue;
use crate::payload::serializer::{Decoder, Encoder};

/// Compact binary encoding of one record, used for persisted item rows.
/// Fields are written in schema order; arrays carry a leading count.
pub fn pack(t: &PayloadType, v: &PayloadValue) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.put_varuint(t.num_fields() as u64);
    for field in 0..t.num_fields() {
        let f = t.field(field);
        let refs = v.get(t, field);
        if f.is_array {
            enc.put_varuint(refs.len() as u64);
        }
        for r in &refs {
            pack_ref(&mut enc, f.field_type, r);
        }
    }
    enc.into_bytes()
}

pub fn unpack(t: &PayloadType, bytes: &[u8]) -> Result<PayloadValue> {
    let mut dec = Decoder::new(bytes);
    let count = dec.get_varuint()? as usize;
    if count != t.num_fields() {
        return Err(Error::new(
            ErrorKind::StateInvalidated,
            format!(
                "stored record has {} fields, namespace '{}' has {}",
                count,
                t.name,
                t.num_fields()
            ),
        ));
    }

    let mut v = PayloadValue::new(t);
    for field in 0..t.num_fields() {
        let f = t.field(field);
        let n = if f.is_array {
            dec.get_varuint()? as usize
        } else {
            1
        };
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(unpack_value(&mut dec, f.field_type)?);
        }
        v.set(t, field, &values)?;
    }
    Ok(v)
}

fn pack_ref(enc: &mut Encoder, ft: KeyValueType, r: &KeyRef<'_>) {
    match (ft, r) {
        (KeyValueType::Int32, KeyRef::Int32(x)) => enc.put_i64(*x as i64),
        (KeyValueType::Int64, KeyRef::Int64(x)) => enc.put_i64(*x),
        (KeyValueType::Double, KeyRef::Double(x)) => enc.put_f64(*x),
        (KeyValueType::String, KeyRef::Str(s)) => enc.put_vstring(s),
        // A scalar cell never disagrees with its schema type; Null only
        // appears for empty arrays, which never reach here.
        _ => enc.put_i64(0),
    }
}

fn unpack_value(dec: &mut Decoder, ft: KeyValueType) -> Result<Value> {
    Ok(match ft {
        KeyValueType::Int32 => Value::Int32(dec.get_i64()? as i32),
        KeyValueType::Int64 => Value::Int64(dec.get_i64()?),
        KeyValueType::Double => Value::Double(dec.get_f64()?),
        KeyValueType::String => Value::String(dec.get_vstring()?.to_string()),
        _ => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::field_type::PayloadFieldType;

    #[test]
    fn pack_unpack_preserves_fields() {
        let mut t = PayloadType::new("t");
        t.add(PayloadFieldType::new("id", KeyValueType::Int64, "id", false))
            .unwrap();
        t.add(PayloadFieldType::new(
            "name",
            KeyValueType::String,
            "name",
            false,
        ))
        .unwrap();
        t.add(PayloadFieldType::new(
            "scores",
            KeyValueType::Double,
            "scores",
            true,
        ))
        .unwrap();

        let mut v = PayloadValue::new(&t);
        v.set(&t, 0, &[Value::Int64(-5)]).unwrap();
        v.set(&t, 1, &[Value::String("ada".into())]).unwrap();
        v.set(&t, 2, &[Value::Double(1.5), Value::Double(-2.0)])
            .unwrap();

        let bytes = pack(&t, &v);
        let back = unpack(&t, &bytes).unwrap();

        assert!(matches!(back.get_one(&t, 0), KeyRef::Int64(-5)));
        assert!(matches!(back.get_one(&t, 1), KeyRef::Str("ada")));
        let scores = back.get(&t, 2);
        assert!(matches!(scores[0], KeyRef::Double(x) if x == 1.5));
        assert!(matches!(scores[1], KeyRef::Double(x) if x == -2.0));
    }

    #[test]
    fn field_count_mismatch_is_invalidated() {
        let mut t = PayloadType::new("t");
        t.add(PayloadFieldType::new("id", KeyValueType::Int32, "id", false))
            .unwrap();
        let v = PayloadValue::new(&t);
        let bytes = pack(&t, &v);

        t.add(PayloadFieldType::new(
            "extra",
            KeyValueType::Int32,
            "extra",
            false,
        ))
        .unwrap();
        let err = unpack(&t, &bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateInvalidated);
    }
}
