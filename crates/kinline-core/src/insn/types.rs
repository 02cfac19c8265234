use crate::errors::{InlineError, Result};
use crate::insn::opcodes::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A JVM type as it appears in descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AsmType {
    Void,
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Float,
    Long,
    Double,
    /// Class or interface, by internal name (`java/lang/String`).
    Object(String),
    Array(Box<AsmType>),
}

pub const OBJECT_NAME: &str = "java/lang/Object";

impl AsmType {
    pub fn object(internal_name: impl Into<String>) -> Self {
        AsmType::Object(internal_name.into())
    }

    pub fn java_object() -> Self {
        AsmType::Object(OBJECT_NAME.to_string())
    }

    pub fn array_of(element: AsmType) -> Self {
        AsmType::Array(Box::new(element))
    }

    /// Accepts either an internal name or an array descriptor, as found in
    /// the operand of `NEW`/`CHECKCAST`/`ANEWARRAY`.
    pub fn from_internal_name(name: &str) -> Result<Self> {
        if name.starts_with('[') {
            AsmType::from_descriptor(name)
        } else {
            Ok(AsmType::Object(name.to_string()))
        }
    }

    pub fn from_descriptor(desc: &str) -> Result<Self> {
        let (ty, rest) = parse_one(desc)?;
        if !rest.is_empty() {
            return Err(malformed(desc));
        }
        Ok(ty)
    }

    /// Argument types of a method descriptor.
    pub fn argument_types(method_desc: &str) -> Result<Vec<AsmType>> {
        Ok(parse_method_descriptor(method_desc)?.0)
    }

    pub fn return_type(method_desc: &str) -> Result<AsmType> {
        Ok(parse_method_descriptor(method_desc)?.1)
    }

    pub fn method_descriptor(args: &[AsmType], ret: &AsmType) -> String {
        let mut desc = String::from("(");
        for arg in args {
            desc.push_str(&arg.descriptor());
        }
        desc.push(')');
        desc.push_str(&ret.descriptor());
        desc
    }

    pub fn descriptor(&self) -> String {
        match self {
            AsmType::Void => "V".into(),
            AsmType::Boolean => "Z".into(),
            AsmType::Char => "C".into(),
            AsmType::Byte => "B".into(),
            AsmType::Short => "S".into(),
            AsmType::Int => "I".into(),
            AsmType::Float => "F".into(),
            AsmType::Long => "J".into(),
            AsmType::Double => "D".into(),
            AsmType::Object(name) => format!("L{name};"),
            AsmType::Array(element) => format!("[{}", element.descriptor()),
        }
    }

    /// Internal name for objects, the descriptor for arrays and primitives.
    pub fn internal_name(&self) -> String {
        match self {
            AsmType::Object(name) => name.clone(),
            other => other.descriptor(),
        }
    }

    /// Number of local/stack slots a value of this type occupies.
    pub fn size(&self) -> usize {
        match self {
            AsmType::Void => 0,
            AsmType::Long | AsmType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, AsmType::Object(_) | AsmType::Array(_) | AsmType::Void)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, AsmType::Object(_) | AsmType::Array(_))
    }

    pub fn dimensions(&self) -> usize {
        match self {
            AsmType::Array(element) => 1 + element.dimensions(),
            _ => 0,
        }
    }

    /// The innermost non-array component.
    pub fn element_type(&self) -> &AsmType {
        match self {
            AsmType::Array(element) => element.element_type(),
            other => other,
        }
    }

    /// Wrapper class for primitives, the type itself otherwise.
    pub fn boxed(&self) -> AsmType {
        let name = match self {
            AsmType::Boolean => "java/lang/Boolean",
            AsmType::Char => "java/lang/Character",
            AsmType::Byte => "java/lang/Byte",
            AsmType::Short => "java/lang/Short",
            AsmType::Int => "java/lang/Integer",
            AsmType::Float => "java/lang/Float",
            AsmType::Long => "java/lang/Long",
            AsmType::Double => "java/lang/Double",
            AsmType::Void => "kotlin/Unit",
            other => return other.clone(),
        };
        AsmType::object(name)
    }

    /// Typed variant of a load, store, return, array or arithmetic opcode,
    /// given its `int` form.
    pub fn opcode(&self, int_opcode: u8) -> u8 {
        match int_opcode {
            IALOAD | IASTORE => {
                int_opcode
                    + match self {
                        AsmType::Boolean | AsmType::Byte => 5,
                        AsmType::Char => 6,
                        AsmType::Short => 7,
                        AsmType::Long => 1,
                        AsmType::Float => 2,
                        AsmType::Double => 3,
                        AsmType::Object(_) | AsmType::Array(_) => 4,
                        _ => 0,
                    }
            }
            IRETURN => {
                int_opcode
                    + match self {
                        AsmType::Void => 5,
                        AsmType::Long => 1,
                        AsmType::Float => 2,
                        AsmType::Double => 3,
                        AsmType::Object(_) | AsmType::Array(_) => 4,
                        _ => 0,
                    }
            }
            ILOAD | ISTORE => {
                int_opcode
                    + match self {
                        AsmType::Long => 1,
                        AsmType::Float => 2,
                        AsmType::Double => 3,
                        AsmType::Object(_) | AsmType::Array(_) => 4,
                        _ => 0,
                    }
            }
            // arithmetic: IADD, ISUB, ... are laid out int, long, float, double
            _ => {
                int_opcode
                    + match self {
                        AsmType::Long => 1,
                        AsmType::Float => 2,
                        AsmType::Double => 3,
                        _ => 0,
                    }
            }
        }
    }

    /// Type loaded or stored by a typed var instruction.
    pub fn for_var_opcode(opcode: u8) -> AsmType {
        let base = if is_store(opcode) { ISTORE } else { ILOAD };
        match opcode - base {
            1 => AsmType::Long,
            2 => AsmType::Float,
            3 => AsmType::Double,
            4 => AsmType::java_object(),
            _ => AsmType::Int,
        }
    }
}

impl fmt::Display for AsmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor())
    }
}

/// Splits a method descriptor into argument and return types.
pub fn parse_method_descriptor(desc: &str) -> Result<(Vec<AsmType>, AsmType)> {
    let body = desc.strip_prefix('(').ok_or_else(|| malformed(desc))?;
    let close = body.find(')').ok_or_else(|| malformed(desc))?;
    let mut args_text = &body[..close];
    let mut args = Vec::new();
    while !args_text.is_empty() {
        let (ty, rest) = parse_one(args_text)?;
        args.push(ty);
        args_text = rest;
    }
    let ret = AsmType::from_descriptor(&body[close + 1..])?;
    Ok((args, ret))
}

/// Total slot width of a method's arguments, excluding `this`.
pub fn arguments_size(desc: &str) -> Result<usize> {
    Ok(AsmType::argument_types(desc)?.iter().map(AsmType::size).sum())
}

fn parse_one(desc: &str) -> Result<(AsmType, &str)> {
    let first = desc.chars().next().ok_or_else(|| malformed(desc))?;
    let rest = &desc[first.len_utf8()..];
    let ty = match first {
        'V' => AsmType::Void,
        'Z' => AsmType::Boolean,
        'C' => AsmType::Char,
        'B' => AsmType::Byte,
        'S' => AsmType::Short,
        'I' => AsmType::Int,
        'F' => AsmType::Float,
        'J' => AsmType::Long,
        'D' => AsmType::Double,
        'L' => {
            let end = rest.find(';').ok_or_else(|| malformed(desc))?;
            return Ok((AsmType::Object(rest[..end].to_string()), &rest[end + 1..]));
        }
        '[' => {
            let (element, rest) = parse_one(rest)?;
            return Ok((AsmType::array_of(element), rest));
        }
        _ => return Err(malformed(desc)),
    };
    Ok((ty, rest))
}

fn malformed(desc: &str) -> InlineError {
    InlineError::internal(format!("Malformed type descriptor: '{desc}'"))
}
