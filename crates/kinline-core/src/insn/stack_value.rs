use crate::insn::list::{Constant, Insn};
use crate::insn::opcodes::*;
use crate::insn::types::{AsmType, OBJECT_NAME};
use serde::{Deserialize, Serialize};

/// A value that is already available somewhere and can be pushed on demand:
/// a local slot, a field read or a constant.
///
/// Remap values are expressed in the frame of whoever consumes the inlined
/// code, so their loads are emitted as is and never remapped again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StackValue {
    Local {
        index: usize,
        ty: AsmType,
    },
    Field {
        ty: AsmType,
        owner: String,
        name: String,
        is_static: bool,
        /// Receiver for instance fields; `None` means local 0.
        receiver: Option<Box<StackValue>>,
    },
    Constant(Constant),
    Null(AsmType),
}

impl StackValue {
    pub fn local(index: usize, ty: AsmType) -> Self {
        StackValue::Local { index, ty }
    }

    /// Instance field read through local 0.
    pub fn field(ty: AsmType, owner: impl Into<String>, name: impl Into<String>) -> Self {
        StackValue::Field {
            ty,
            owner: owner.into(),
            name: name.into(),
            is_static: false,
            receiver: None,
        }
    }

    pub fn static_field(ty: AsmType, owner: impl Into<String>, name: impl Into<String>) -> Self {
        StackValue::Field {
            ty,
            owner: owner.into(),
            name: name.into(),
            is_static: true,
            receiver: None,
        }
    }

    pub fn ty(&self) -> AsmType {
        match self {
            StackValue::Local { ty, .. } | StackValue::Field { ty, .. } | StackValue::Null(ty) => {
                ty.clone()
            }
            StackValue::Constant(constant) => constant.ty(),
        }
    }

    /// Pushes the value and coerces it to `target`.
    pub fn put(&self, target: &AsmType, out: &mut Vec<Insn>) {
        self.push_raw(out);
        coerce(&self.ty(), target, out);
    }

    fn push_raw(&self, out: &mut Vec<Insn>) {
        match self {
            StackValue::Local { index, ty } => out.push(Insn::var(ty.opcode(ILOAD), *index)),
            StackValue::Field {
                ty,
                owner,
                name,
                is_static,
                receiver,
            } => {
                if *is_static {
                    out.push(Insn::field(GETSTATIC, owner, name, ty.descriptor()));
                } else {
                    match receiver {
                        Some(receiver) => receiver.push_raw(out),
                        None => out.push(Insn::var(ALOAD, 0)),
                    }
                    out.push(Insn::field(GETFIELD, owner, name, ty.descriptor()));
                }
            }
            StackValue::Constant(Constant::Int(value)) => out.push(Insn::int_const(*value)),
            StackValue::Constant(constant) => out.push(Insn::Ldc(constant.clone())),
            StackValue::Null(_) => out.push(Insn::Simple(ACONST_NULL)),
        }
    }
}

/// Emits the conversion of a value of type `from` on top of the stack into
/// type `to`.
pub fn coerce(from: &AsmType, to: &AsmType, out: &mut Vec<Insn>) {
    if from == to {
        return;
    }
    match (from, to) {
        (_, AsmType::Void) => match from.size() {
            0 => {}
            1 => out.push(Insn::Simple(POP)),
            _ => out.push(Insn::Simple(POP2)),
        },
        (AsmType::Void, _) if to.is_reference() => {
            out.push(Insn::field(GETSTATIC, "kotlin/Unit", "INSTANCE", "Lkotlin/Unit;"));
            coerce(&AsmType::object("kotlin/Unit"), to, out);
        }
        (AsmType::Void, _) => push_default(to, out),
        (_, _) if from.is_reference() && to.is_reference() => {
            if !matches!(to, AsmType::Object(name) if name == OBJECT_NAME) {
                out.push(Insn::type_insn(CHECKCAST, to.internal_name()));
            }
        }
        (_, _) if from.is_primitive() && to.is_primitive() => primitive_conversion(from, to, out),
        (_, _) if from.is_primitive() => {
            let boxed = from.boxed();
            out.push(Insn::method(
                INVOKESTATIC,
                boxed.internal_name(),
                "valueOf",
                AsmType::method_descriptor(std::slice::from_ref(from), &boxed),
            ));
            let widened = matches!(to, AsmType::Object(name)
                if name == OBJECT_NAME || name == "java/lang/Number" || *to == boxed);
            if !widened {
                out.push(Insn::type_insn(CHECKCAST, to.internal_name()));
            }
        }
        _ => unbox(to, out),
    }
}

fn unbox(to: &AsmType, out: &mut Vec<Insn>) {
    let (owner, method) = match to {
        AsmType::Boolean => ("java/lang/Boolean", "booleanValue"),
        AsmType::Char => ("java/lang/Character", "charValue"),
        AsmType::Byte => ("java/lang/Number", "byteValue"),
        AsmType::Short => ("java/lang/Number", "shortValue"),
        AsmType::Long => ("java/lang/Number", "longValue"),
        AsmType::Float => ("java/lang/Number", "floatValue"),
        AsmType::Double => ("java/lang/Number", "doubleValue"),
        _ => ("java/lang/Number", "intValue"),
    };
    out.push(Insn::type_insn(CHECKCAST, owner));
    out.push(Insn::method(
        INVOKEVIRTUAL,
        owner,
        method,
        AsmType::method_descriptor(&[], to),
    ));
}

fn push_default(ty: &AsmType, out: &mut Vec<Insn>) {
    out.push(match ty {
        AsmType::Long => Insn::Simple(LCONST_0),
        AsmType::Float => Insn::Simple(FCONST_0),
        AsmType::Double => Insn::Simple(DCONST_0),
        _ => Insn::Simple(ICONST_0),
    });
}

#[derive(Clone, Copy, PartialEq)]
enum NumericKind {
    Int,
    Long,
    Float,
    Double,
}

fn numeric_kind(ty: &AsmType) -> NumericKind {
    match ty {
        AsmType::Long => NumericKind::Long,
        AsmType::Float => NumericKind::Float,
        AsmType::Double => NumericKind::Double,
        _ => NumericKind::Int,
    }
}

fn primitive_conversion(from: &AsmType, to: &AsmType, out: &mut Vec<Insn>) {
    use NumericKind::*;
    let op = match (numeric_kind(from), numeric_kind(to)) {
        (Int, Long) => Some(I2L),
        (Int, Float) => Some(I2F),
        (Int, Double) => Some(I2D),
        (Long, Int) => Some(L2I),
        (Long, Float) => Some(L2F),
        (Long, Double) => Some(L2D),
        (Float, Int) => Some(F2I),
        (Float, Long) => Some(F2L),
        (Float, Double) => Some(F2D),
        (Double, Int) => Some(D2I),
        (Double, Long) => Some(D2L),
        (Double, Float) => Some(D2F),
        _ => None,
    };
    if let Some(op) = op {
        out.push(Insn::Simple(op));
    }
    if numeric_kind(to) == Int {
        match to {
            AsmType::Byte if *from != AsmType::Boolean => out.push(Insn::Simple(I2B)),
            AsmType::Char => out.push(Insn::Simple(I2C)),
            AsmType::Short if *from != AsmType::Byte => out.push(Insn::Simple(I2S)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_put_without_coercion() {
        let mut out = Vec::new();
        StackValue::local(3, AsmType::Long).put(&AsmType::Long, &mut out);
        assert_eq!(out, vec![Insn::var(LLOAD, 3)]);
    }

    #[test]
    fn test_field_put_loads_receiver() {
        let mut out = Vec::new();
        StackValue::field(AsmType::object("java/lang/String"), "a/B$1", "$s")
            .put(&AsmType::java_object(), &mut out);
        assert_eq!(
            out,
            vec![
                Insn::var(ALOAD, 0),
                Insn::field(GETFIELD, "a/B$1", "$s", "Ljava/lang/String;"),
            ]
        );
    }

    #[test]
    fn test_reference_downcast() {
        let mut out = Vec::new();
        coerce(&AsmType::java_object(), &AsmType::object("java/lang/String"), &mut out);
        assert_eq!(out, vec![Insn::type_insn(CHECKCAST, "java/lang/String")]);
    }

    #[test]
    fn test_boxing_and_unboxing() {
        let mut out = Vec::new();
        coerce(&AsmType::Int, &AsmType::java_object(), &mut out);
        assert_eq!(
            out,
            vec![Insn::method(
                INVOKESTATIC,
                "java/lang/Integer",
                "valueOf",
                "(I)Ljava/lang/Integer;"
            )]
        );

        out.clear();
        coerce(&AsmType::java_object(), &AsmType::Boolean, &mut out);
        assert_eq!(out[0], Insn::type_insn(CHECKCAST, "java/lang/Boolean"));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_primitive_widening_and_pop() {
        let mut out = Vec::new();
        coerce(&AsmType::Int, &AsmType::Long, &mut out);
        assert_eq!(out, vec![Insn::Simple(I2L)]);

        out.clear();
        coerce(&AsmType::Double, &AsmType::Void, &mut out);
        assert_eq!(out, vec![Insn::Simple(POP2)]);
    }
}
