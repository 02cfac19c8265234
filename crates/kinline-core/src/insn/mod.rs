//! In-memory class file model: types, instruction lists, methods, classes.

pub mod analysis;
pub mod class;
pub mod list;
pub mod markers;
pub mod method;
pub mod opcodes;
pub mod stack_value;
pub mod types;

pub use class::{ClassNode, FieldNode, InnerClassNode, KotlinMetadata, MetadataKind, OuterClass};
pub use list::{Constant, Insn, InsnId, InsnList, LabelId};
pub use method::{LocalVariable, MethodId, MethodNode, TryCatchBlock};
pub use stack_value::StackValue;
pub use types::AsmType;
