use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::value::KeyValueType;
use crate::payload::field_type::PayloadFieldType;
use crate::payload::serializer::{Decoder, Encoder};

/// Magic leading the serialized form. Kept for backward-compatible field
/// header layout; reserializers must write it back unchanged.
pub const HEADER_OFFSET_MAGIC: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddFieldResult {
    Added,
    UpgradedToArray,
}

/// Ordered field schema of a namespace. Field cells are laid out back to
/// back: `offset(i+1) == offset(i) + sizeof(i)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadType {
    pub name: String,
    fields: Vec<PayloadFieldType>,
    by_name: HashMap<String, usize>,
    by_json_path: HashMap<String, usize>,
    /// Indices of string-typed fields, kept aside so record drop can walk
    /// string cells without scanning the whole schema.
    str_fields: Vec<usize>,
}

impl PayloadType {
    pub fn new(name: &str) -> Self {
        PayloadType {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, idx: usize) -> &PayloadFieldType {
        &self.fields[idx]
    }

    pub fn fields(&self) -> &[PayloadFieldType] {
        &self.fields
    }

    pub fn str_fields(&self) -> &[usize] {
        &self.str_fields
    }

    /// Byte length of the fixed region of one record.
    pub fn total_size(&self) -> usize {
        match self.fields.last() {
            Some(f) => f.offset + f.sizeof(),
            None => 0,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn field_by_name(&self, name: &str) -> Result<usize> {
        self.by_name.get(name).copied().ok_or_else(|| {
            Error::logic(format!(
                "field '{}' not found in namespace '{}'",
                name, self.name
            ))
        })
    }

    /// Unlike [`field_by_name`], a miss here is not an error.
    pub fn field_by_json_path(&self, path: &str) -> Option<usize> {
        self.by_json_path.get(path).copied()
    }

    /// Add a field. A second add under an existing name with the same type
    /// upgrades the field to an array and merges its JSON paths; a type
    /// mismatch is a schema error.
    pub fn add(&mut self, f: PayloadFieldType) -> Result<AddFieldResult> {
        if let Some(&idx) = self.by_name.get(&f.name) {
            let old_type = self.fields[idx].field_type;
            if old_type != f.field_type {
                return Err(Error::logic(format!(
                    "can't add field '{}' with type '{}' to namespace '{}': it already exists with type '{}'",
                    f.name,
                    f.field_type.name(),
                    self.name,
                    old_type.name()
                )));
            }
            for jp in &f.json_paths {
                if jp.is_empty() {
                    continue;
                }
                if let Some(&other) = self.by_json_path.get(jp) {
                    if other != idx {
                        return Err(Error::logic(format!(
                            "can't add field '{}' to namespace '{}': json path '{}' already used by field '{}'",
                            f.name, self.name, jp, self.fields[other].name
                        )));
                    }
                } else {
                    self.by_json_path.insert(jp.clone(), idx);
                }
                self.fields[idx].add_json_path(jp);
            }
            self.fields[idx].set_array();
            self.update_offsets(idx + 1);
            self.assert_offsets();
            return Ok(AddFieldResult::UpgradedToArray);
        }

        let idx = self.fields.len();
        for jp in &f.json_paths {
            if jp.is_empty() {
                continue;
            }
            if let Some(&other) = self.by_json_path.get(jp) {
                if other != idx {
                    return Err(Error::logic(format!(
                        "can't add field '{}' to namespace '{}': json path '{}' already used by field '{}'",
                        f.name, self.name, jp, self.fields[other].name
                    )));
                }
            }
        }

        let mut f = f;
        f.offset = self.total_size();
        for jp in &f.json_paths {
            if !jp.is_empty() {
                self.by_json_path.insert(jp.clone(), idx);
            }
        }
        self.by_name.insert(f.name.clone(), idx);
        if f.field_type == KeyValueType::String {
            self.str_fields.push(idx);
        }
        self.fields.push(f);
        self.assert_offsets();
        Ok(AddFieldResult::Added)
    }

    /// Remove a field by name, renumbering everything behind it. Returns
    /// false if no such field exists.
    pub fn drop(&mut self, name: &str) -> bool {
        let idx = match self.by_name.get(name) {
            Some(&i) => i,
            None => return false,
        };

        for v in self.by_name.values_mut() {
            if *v > idx {
                *v -= 1;
            }
        }
        for v in self.by_json_path.values_mut() {
            if *v > idx {
                *v -= 1;
            }
        }

        let field_type = self.fields[idx].field_type;
        self.str_fields.retain(|&s| !(s == idx && field_type == KeyValueType::String));
        for s in self.str_fields.iter_mut() {
            if *s > idx {
                *s -= 1;
            }
        }

        let dropped = self.fields.remove(idx);
        self.by_name.remove(name);
        for jp in &dropped.json_paths {
            self.by_json_path.remove(jp);
        }

        self.update_offsets(idx);
        self.assert_offsets();
        true
    }

    /// Change a field's element type in place, keeping its position.
    /// Offsets behind it shift with the new cell size.
    pub fn retype(&mut self, name: &str, t: KeyValueType) -> Result<()> {
        let idx = self.field_by_name(name)?;
        let was_string = self.fields[idx].field_type == KeyValueType::String;
        self.fields[idx].field_type = t;

        if was_string && t != KeyValueType::String {
            self.str_fields.retain(|&s| s != idx);
        } else if !was_string && t == KeyValueType::String {
            self.str_fields.push(idx);
            self.str_fields.sort_unstable();
        }

        self.update_offsets(idx + 1);
        self.assert_offsets();
        Ok(())
    }

    fn update_offsets(&mut self, from: usize) {
        if from == 0 {
            if let Some(first) = self.fields.first_mut() {
                first.offset = 0;
            }
        }
        for i in from.max(1)..self.fields.len() {
            let off = self.fields[i - 1].offset + self.fields[i - 1].sizeof();
            self.fields[i].offset = off;
        }
    }

    /// Offsets are load-bearing for every index scan; a gap here means the
    /// schema is corrupt and continuing would corrupt data.
    fn assert_offsets(&self) {
        let mut expect = 0usize;
        for f in &self.fields {
            assert_eq!(
                f.offset, expect,
                "corrupt field offsets in namespace '{}'",
                self.name
            );
            expect += f.sizeof();
        }
    }

    pub fn serialize(&self, enc: &mut Encoder) {
        enc.put_varuint(HEADER_OFFSET_MAGIC);
        enc.put_varuint(self.fields.len() as u64);
        for f in &self.fields {
            enc.put_varuint(f.field_type.tag());
            enc.put_vstring(&f.name);
            enc.put_varuint(f.offset as u64);
            enc.put_varuint(f.elem_sizeof() as u64);
            enc.put_varuint(f.is_array as u64);
        }
    }

    pub fn deserialize(name: &str, dec: &mut Decoder) -> Result<Self> {
        let mut pt = PayloadType::new(name);

        // Header offset magic: read and discard, preserved on reserialize.
        dec.get_varuint()?;

        let count = dec.get_varuint()? as usize;
        for i in 0..count {
            let field_type = KeyValueType::from_tag(dec.get_varuint()?)?;
            let fname = dec.get_vstring()?.to_string();
            let offset = dec.get_varuint()? as usize;
            // elemSize is written for compatibility but recomputed from the
            // type on this side.
            let _elem_size = dec.get_varuint()?;
            let is_array = dec.get_varuint()? != 0;

            let mut f = PayloadFieldType::new(&fname, field_type, &fname, is_array);
            f.offset = offset;
            pt.by_name.insert(fname.clone(), i);
            pt.by_json_path.insert(fname, i);
            if field_type == KeyValueType::String {
                pt.str_fields.push(i);
            }
            pt.fields.push(f);
        }
        pt.assert_offsets();
        Ok(pt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_type() -> PayloadType {
        let mut pt = PayloadType::new("users");
        pt.add(PayloadFieldType::new("id", KeyValueType::Int32, "id", false))
            .unwrap();
        pt.add(PayloadFieldType::new(
            "name",
            KeyValueType::String,
            "name",
            false,
        ))
        .unwrap();
        pt.add(PayloadFieldType::new("age", KeyValueType::Int32, "age", false))
            .unwrap();
        pt
    }

    #[test]
    fn offsets_are_contiguous() {
        let pt = users_type();
        assert_eq!(pt.field(0).offset, 0);
        assert_eq!(pt.field(1).offset, 4);
        assert_eq!(pt.field(2).offset, 8);
        assert_eq!(pt.total_size(), 12);
    }

    #[test]
    fn duplicate_name_same_type_upgrades_to_array() {
        let mut pt = users_type();
        let r = pt
            .add(PayloadFieldType::new(
                "age",
                KeyValueType::Int32,
                "years",
                false,
            ))
            .unwrap();
        assert_eq!(r, AddFieldResult::UpgradedToArray);
        assert!(pt.field(2).is_array);
        assert_eq!(pt.field(2).json_paths, vec!["age", "years"]);
        // Array cell is 8 bytes now
        assert_eq!(pt.total_size(), 16);
        assert_eq!(pt.field_by_json_path("years"), Some(2));
    }

    #[test]
    fn duplicate_name_mismatched_type_is_rejected() {
        let mut pt = users_type();
        let err = pt
            .add(PayloadFieldType::new(
                "age",
                KeyValueType::String,
                "age",
                false,
            ))
            .unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Logic);
    }

    #[test]
    fn duplicate_json_path_is_rejected() {
        let mut pt = users_type();
        let err = pt
            .add(PayloadFieldType::new(
                "alias",
                KeyValueType::String,
                "name",
                false,
            ))
            .unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Logic);
    }

    #[test]
    fn drop_renumbers_offsets_and_lookup() {
        let mut pt = users_type();
        assert!(pt.drop("name"));
        assert!(!pt.drop("name"));
        assert_eq!(pt.num_fields(), 2);
        assert_eq!(pt.field_by_name("age").unwrap(), 1);
        assert_eq!(pt.field(1).offset, 4);
        assert!(pt.str_fields().is_empty());
    }

    #[test]
    fn serialize_round_trip_preserves_fields() {
        let mut pt = users_type();
        pt.add(PayloadFieldType::new(
            "tags",
            KeyValueType::String,
            "tags",
            true,
        ))
        .unwrap();

        let mut enc = Encoder::new();
        pt.serialize(&mut enc);
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        let back = PayloadType::deserialize("users", &mut dec).unwrap();

        assert_eq!(back.num_fields(), pt.num_fields());
        for i in 0..pt.num_fields() {
            assert_eq!(back.field(i).name, pt.field(i).name);
            assert_eq!(back.field(i).field_type, pt.field(i).field_type);
            assert_eq!(back.field(i).offset, pt.field(i).offset);
            assert_eq!(back.field(i).is_array, pt.field(i).is_array);
        }
    }

    #[test]
    fn reserialized_bytes_are_identical() {
        let pt = users_type();
        let mut enc = Encoder::new();
        pt.serialize(&mut enc);
        let first = enc.into_bytes();

        let mut dec = Decoder::new(&first);
        let back = PayloadType::deserialize("users", &mut dec).unwrap();
        let mut enc2 = Encoder::new();
        back.serialize(&mut enc2);
        assert_eq!(first, enc2.into_bytes());
    }
}
