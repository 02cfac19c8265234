//! Rewriting of slots, captured fields and class names in inlined code.

mod field;
mod local_var;
mod type_remapper;

pub use field::{has_placeholders, FieldRemapper, FieldRemapperKind};
pub use local_var::{LocalVarRemapper, RemapInfo, RemapStatus};
pub use type_remapper::TypeRemapper;
