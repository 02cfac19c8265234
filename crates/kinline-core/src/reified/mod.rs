//! Reified type parameters.
//!
//! The body of an inline function with reified type parameters carries
//! markers `ICONST kind; LDC "T"; INVOKESTATIC Intrinsics.reifiedOperationMarker`
//! in front of every operation that needs the concrete type. Once the call
//! site supplies the type argument, [`ReifiedTypeInliner`] rewrites the
//! operation and drops the marker.

mod inliner;
mod intrinsics;
mod types;

pub use inliner::ReifiedTypeInliner;
pub use intrinsics::{generate_as_cast, generate_is_check, DefaultIntrinsics, IntrinsicsSupport};
pub use types::{
    ReifiedType, ReifiedTypeKind, ReifiedTypeParametersUsages, TypeParameterMapping,
    TypeParameterMappings,
};

use crate::insn::opcodes::*;
use crate::insn::{Constant, Insn, InsnId, InsnList};
use std::fmt;

pub const INTRINSICS_CLASS_NAME: &str = "kotlin/jvm/internal/Intrinsics";
pub const REIFIED_OPERATION_MARKER_METHOD_NAME: &str = "reifiedOperationMarker";
pub const NEED_CLASS_REIFICATION_MARKER_METHOD_NAME: &str = "needClassReification";

pub const PLUGIN_INTRINSICS_MARKER_OWNER: &str = "kotlin/jvm/internal/MagicApiIntrinsics";
pub const PLUGIN_INTRINSICS_MARKER_METHOD: &str = "voidMagicApiCall";
pub const PLUGIN_INTRINSICS_MARKER_SIGNATURE: &str = "(Ljava/lang/Object;)V";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    NewArray,
    As,
    SafeAs,
    Is,
    JavaClass,
    EnumReified,
    TypeOf,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::NewArray,
        OperationKind::As,
        OperationKind::SafeAs,
        OperationKind::Is,
        OperationKind::JavaClass,
        OperationKind::EnumReified,
        OperationKind::TypeOf,
    ];

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        usize::try_from(id).ok().and_then(|id| Self::ALL.get(id).copied())
    }
}

/// `T`, `T?` or `[[T` as written in the marker's string constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReificationArgument {
    pub parameter_name: String,
    pub nullable: bool,
    pub array_depth: usize,
}

impl ReificationArgument {
    pub fn new(parameter_name: impl Into<String>, nullable: bool, array_depth: usize) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            nullable,
            array_depth,
        }
    }

    pub fn parse(raw: &str) -> Self {
        let array_depth = raw.chars().take_while(|c| *c == '[').count();
        let rest = &raw[array_depth..];
        let nullable = rest.ends_with('?');
        let parameter_name = rest.strip_suffix('?').unwrap_or(rest);
        Self::new(parameter_name, nullable, array_depth)
    }

    pub fn as_string(&self) -> String {
        format!(
            "{}{}{}",
            "[".repeat(self.array_depth),
            self.parameter_name,
            if self.nullable { "?" } else { "" }
        )
    }

    /// The argument that results from substituting `replacement` for this
    /// argument's parameter. Nullability of the replacement only survives
    /// when this argument is not an array.
    pub fn combine(&self, replacement: &ReificationArgument) -> ReificationArgument {
        ReificationArgument::new(
            replacement.parameter_name.clone(),
            self.nullable || (replacement.nullable && self.array_depth == 0),
            self.array_depth + replacement.array_depth,
        )
    }
}

impl fmt::Display for ReificationArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

fn is_reified_marker(insn: &Insn, name: &str) -> bool {
    matches!(
        insn,
        Insn::Method { opcode: INVOKESTATIC, owner, name: n, .. }
            if owner == INTRINSICS_CLASS_NAME && n == name
    )
}

pub fn is_operation_reified_marker(insn: &Insn) -> bool {
    is_reified_marker(insn, REIFIED_OPERATION_MARKER_METHOD_NAME)
}

pub fn is_need_class_reification_marker(insn: &Insn) -> bool {
    is_reified_marker(insn, NEED_CLASS_REIFICATION_MARKER_METHOD_NAME)
}

pub fn put_need_class_reification_marker(out: &mut Vec<Insn>) {
    out.push(Insn::method(
        INVOKESTATIC,
        INTRINSICS_CLASS_NAME,
        NEED_CLASS_REIFICATION_MARKER_METHOD_NAME,
        "()V",
    ));
}

pub fn put_reified_operation_marker(
    kind: OperationKind,
    argument: &ReificationArgument,
    out: &mut Vec<Insn>,
) {
    out.push(Insn::int_const(kind.id()));
    out.push(Insn::ldc_string(argument.as_string()));
    out.push(Insn::method(
        INVOKESTATIC,
        INTRINSICS_CLASS_NAME,
        REIFIED_OPERATION_MARKER_METHOD_NAME,
        "(ILjava/lang/String;)V",
    ));
}

/// Argument of the marker at `marker`, read from the `LDC` before it.
pub fn reification_argument(list: &InsnList, marker: InsnId) -> Option<ReificationArgument> {
    let prev = list.prev(marker)?;
    match list.get(prev) {
        Insn::Ldc(Constant::String(raw)) => Some(ReificationArgument::parse(raw)),
        _ => None,
    }
}

/// Operation of the marker at `marker`, read from the int constant two
/// instructions before it.
pub fn operation_kind(list: &InsnList, marker: InsnId) -> Option<OperationKind> {
    let id = list.prev(list.prev(marker)?)?;
    list.get(id).int_value().and_then(OperationKind::from_id)
}
