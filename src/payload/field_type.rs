use serde::{Deserialize, Serialize};

use crate::core::value::KeyValueType;

/// One field descriptor of a payload schema: name, element type, array flag,
/// the JSON paths the ingest layer maps onto it, and the byte offset of its
/// cell inside the fixed part of a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadFieldType {
    pub name: String,
    pub field_type: KeyValueType,
    pub is_array: bool,
    pub json_paths: Vec<String>,
    pub offset: usize,
}

impl PayloadFieldType {
    pub fn new(name: &str, field_type: KeyValueType, json_path: &str, is_array: bool) -> Self {
        PayloadFieldType {
            name: name.to_string(),
            field_type,
            is_array,
            json_paths: if json_path.is_empty() {
                Vec::new()
            } else {
                vec![json_path.to_string()]
            },
            offset: 0,
        }
    }

    /// Byte size of this field's cell in the fixed record region. Array
    /// fields hold an (offset, len) pair into the array arena.
    pub fn sizeof(&self) -> usize {
        if self.is_array {
            8
        } else {
            self.field_type.elem_size()
        }
    }

    /// Size of one element, independent of the array flag.
    pub fn elem_sizeof(&self) -> usize {
        self.field_type.elem_size()
    }

    pub fn add_json_path(&mut self, path: &str) {
        if !path.is_empty() && !self.json_paths.iter().any(|p| p == path) {
            self.json_paths.push(path.to_string());
        }
    }

    pub fn set_array(&mut self) {
        self.is_array = true;
    }
}
