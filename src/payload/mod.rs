pub mod field_type;
pub mod packed;
pub mod payload_type;
pub mod payload_value;
pub mod serializer;

/// Ordered list of field indices, as used by composite indexes and
/// multi-field comparisons.
pub type FieldsSet = Vec<usize>;

pub use field_type::PayloadFieldType;
pub use payload_type::{AddFieldResult, PayloadType};
pub use payload_value::PayloadValue;
