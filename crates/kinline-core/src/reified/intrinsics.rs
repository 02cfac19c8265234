use super::{ReifiedType, ReifiedTypeKind};
use crate::insn::opcodes::*;
use crate::insn::{AsmType, Constant, Insn, LabelId};

const TYPE_INTRINSICS: &str = "kotlin/jvm/internal/TypeIntrinsics";
const REFLECTION: &str = "kotlin/jvm/internal/Reflection";
const KCLASS: &str = "Lkotlin/reflect/KClass;";
const KTYPE: &str = "Lkotlin/reflect/KType;";
const KTYPE_PROJECTION: &str = "kotlin/reflect/KTypeProjection";
const KTYPE_PROJECTION_COMPANION: &str = "kotlin/reflect/KTypeProjection$Companion";

/// Code generation the rewriter cannot do on its own because it depends on
/// how the front end maps types.
pub trait IntrinsicsSupport {
    /// JVM type of a fully known type, `None` when it cannot be mapped.
    fn map_type(&self, ty: &ReifiedType) -> Option<AsmType> {
        default_map_type(ty)
    }

    fn put_class_instance(&self, asm_type: &AsmType, out: &mut Vec<Insn>) {
        out.push(Insn::Ldc(Constant::Type(asm_type.boxed())));
    }

    fn is_mutable_collection_type(&self, ty: &ReifiedType) -> bool {
        ty.mutable_collection_suffix().is_some()
    }

    /// Code leaving a `KType` for `ty` on the stack. Returns false when the
    /// type cannot be represented yet.
    fn generate_type_of(&self, ty: &ReifiedType, out: &mut Vec<Insn>) -> bool {
        generate_type_of(self, ty, out)
    }

    /// Hook for compiler plugins that put their own operation after a
    /// reified marker. `reified_insn` is the instruction right after the
    /// marker; returns true when `out` replaces it.
    fn rewrite_plugin_defined_operation_marker(
        &self,
        _reified_insn: &Insn,
        _ty: &ReifiedType,
        _out: &mut Vec<Insn>,
    ) -> bool {
        false
    }
}

/// Intrinsics with the standard type mapping and no plugins.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIntrinsics;

impl IntrinsicsSupport for DefaultIntrinsics {}

fn default_map_type(ty: &ReifiedType) -> Option<AsmType> {
    match &ty.kind {
        ReifiedTypeKind::Class { name, .. } => {
            let mapped = match name.as_str() {
                "kotlin/Any" => "java/lang/Object",
                "kotlin/String" => "java/lang/String",
                "kotlin/CharSequence" => "java/lang/CharSequence",
                "kotlin/Throwable" => "java/lang/Throwable",
                "kotlin/Number" => "java/lang/Number",
                "kotlin/Comparable" => "java/lang/Comparable",
                "kotlin/Enum" => "java/lang/Enum",
                "kotlin/Int" => "java/lang/Integer",
                "kotlin/Long" => "java/lang/Long",
                "kotlin/Short" => "java/lang/Short",
                "kotlin/Byte" => "java/lang/Byte",
                "kotlin/Char" => "java/lang/Character",
                "kotlin/Boolean" => "java/lang/Boolean",
                "kotlin/Float" => "java/lang/Float",
                "kotlin/Double" => "java/lang/Double",
                "kotlin/collections/Iterable" | "kotlin/collections/MutableIterable" => "java/lang/Iterable",
                "kotlin/collections/Iterator" | "kotlin/collections/MutableIterator" => "java/util/Iterator",
                "kotlin/collections/Collection" | "kotlin/collections/MutableCollection" => "java/util/Collection",
                "kotlin/collections/List" | "kotlin/collections/MutableList" => "java/util/List",
                "kotlin/collections/ListIterator" | "kotlin/collections/MutableListIterator" => {
                    "java/util/ListIterator"
                }
                "kotlin/collections/Set" | "kotlin/collections/MutableSet" => "java/util/Set",
                "kotlin/collections/Map" | "kotlin/collections/MutableMap" => "java/util/Map",
                "kotlin/collections/Map.Entry" | "kotlin/collections/MutableMap.MutableEntry" => {
                    "java/util/Map$Entry"
                }
                other => match other.strip_prefix("kotlin/Function") {
                    Some(arity) if arity.parse::<usize>().is_ok() => {
                        return Some(AsmType::object(format!("kotlin/jvm/functions/Function{arity}")))
                    }
                    _ => other,
                },
            };
            Some(AsmType::object(mapped))
        }
        ReifiedTypeKind::Array(element) => Some(AsmType::array_of(default_map_type(element)?)),
        ReifiedTypeKind::TypeParameter { .. } => None,
    }
}

fn type_intrinsic(name: &str, desc: &str) -> Insn {
    Insn::method(INVOKESTATIC, TYPE_INTRINSICS, name, desc)
}

/// `value instanceof ty`, through `TypeIntrinsics` for function arities and
/// mutable collections.
fn instance_of<I: IntrinsicsSupport + ?Sized>(
    support: &I,
    ty: &ReifiedType,
    asm_type: &AsmType,
    out: &mut Vec<Insn>,
) {
    if let Some(arity) = ty.function_arity() {
        out.push(Insn::int_const(arity as i32));
        out.push(type_intrinsic("isFunctionOfArity", "(Ljava/lang/Object;I)Z"));
    } else if support.is_mutable_collection_type(ty) {
        let suffix = ty.mutable_collection_suffix().unwrap_or("MutableCollection");
        out.push(type_intrinsic(&format!("is{suffix}"), "(Ljava/lang/Object;)Z"));
    } else {
        out.push(Insn::type_insn(INSTANCEOF, asm_type.boxed().internal_name()));
    }
}

fn checkcast<I: IntrinsicsSupport + ?Sized>(
    support: &I,
    ty: &ReifiedType,
    asm_type: &AsmType,
    safe: bool,
    out: &mut Vec<Insn>,
) {
    let target = asm_type.boxed();
    if !safe {
        if let Some(arity) = ty.function_arity() {
            out.push(Insn::int_const(arity as i32));
            out.push(type_intrinsic(
                "beforeCheckcastToFunctionOfArity",
                "(Ljava/lang/Object;I)Ljava/lang/Object;",
            ));
        } else if support.is_mutable_collection_type(ty) {
            let suffix = ty.mutable_collection_suffix().unwrap_or("MutableCollection");
            let desc = format!("(Ljava/lang/Object;){}", target.descriptor());
            out.push(type_intrinsic(&format!("as{suffix}"), &desc));
            return;
        }
    }
    out.push(Insn::type_insn(CHECKCAST, target.internal_name()));
}

/// `value as ty` / `value as? ty` on the value at the top of the stack.
pub fn generate_as_cast<I: IntrinsicsSupport + ?Sized>(
    support: &I,
    ty: &ReifiedType,
    asm_type: &AsmType,
    safe: bool,
    unified_null_checks: bool,
    out: &mut Vec<Insn>,
) {
    if !safe {
        if !ty.nullable {
            let non_null = LabelId::fresh();
            let exception = if unified_null_checks {
                "java/lang/NullPointerException"
            } else {
                "kotlin/TypeCastException"
            };
            out.extend([
                Insn::Simple(DUP),
                Insn::jump(IFNONNULL, non_null),
                Insn::type_insn(NEW, exception),
                Insn::Simple(DUP),
                Insn::ldc_string(format!("null cannot be cast to non-null type {ty}")),
                Insn::method(INVOKESPECIAL, exception, "<init>", "(Ljava/lang/String;)V"),
                Insn::Simple(ATHROW),
                Insn::Label(non_null),
            ]);
        }
    } else {
        let ok = LabelId::fresh();
        out.push(Insn::Simple(DUP));
        instance_of(support, ty, asm_type, out);
        out.extend([
            Insn::jump(IFNE, ok),
            Insn::Simple(POP),
            Insn::Simple(ACONST_NULL),
            Insn::Label(ok),
        ]);
    }
    checkcast(support, ty, asm_type, safe, out);
}

/// `value is ty`; a nullable `ty` accepts `null`.
pub fn generate_is_check<I: IntrinsicsSupport + ?Sized>(
    support: &I,
    ty: &ReifiedType,
    asm_type: &AsmType,
    out: &mut Vec<Insn>,
) {
    if ty.nullable {
        let nope = LabelId::fresh();
        let end = LabelId::fresh();
        out.push(Insn::Simple(DUP));
        out.push(Insn::jump(IFNULL, nope));
        instance_of(support, ty, asm_type, out);
        out.extend([
            Insn::jump(GOTO, end),
            Insn::Label(nope),
            Insn::Simple(POP),
            Insn::Simple(ICONST_1),
            Insn::Label(end),
        ]);
    } else {
        instance_of(support, ty, asm_type, out);
    }
}

fn generate_type_of<I: IntrinsicsSupport + ?Sized>(
    support: &I,
    ty: &ReifiedType,
    out: &mut Vec<Insn>,
) -> bool {
    let Some(asm_type) = support.map_type(ty) else {
        return false;
    };
    let arguments: Vec<&ReifiedType> = match &ty.kind {
        ReifiedTypeKind::Class { arguments, .. } => arguments.iter().collect(),
        ReifiedTypeKind::Array(element) if !asm_type.element_type().is_primitive() => {
            vec![element.as_ref()]
        }
        ReifiedTypeKind::Array(_) => Vec::new(),
        ReifiedTypeKind::TypeParameter { .. } => return false,
    };

    let mut code = Vec::new();
    support.put_class_instance(&asm_type, &mut code);
    code.push(Insn::method(
        INVOKESTATIC,
        REFLECTION,
        "getOrCreateKotlinClass",
        format!("(Ljava/lang/Class;){KCLASS}"),
    ));

    let projection = |argument: &ReifiedType, code: &mut Vec<Insn>| -> bool {
        code.push(Insn::field(
            GETSTATIC,
            KTYPE_PROJECTION,
            "Companion",
            format!("L{KTYPE_PROJECTION_COMPANION};"),
        ));
        if !support.generate_type_of(argument, code) {
            return false;
        }
        code.push(Insn::method(
            INVOKEVIRTUAL,
            KTYPE_PROJECTION_COMPANION,
            "invariant",
            format!("({KTYPE})L{KTYPE_PROJECTION};"),
        ));
        true
    };

    let projections = match arguments.len() {
        0 => String::new(),
        n @ (1 | 2) => {
            for argument in &arguments {
                if !projection(argument, &mut code) {
                    return false;
                }
            }
            format!("L{KTYPE_PROJECTION};").repeat(n)
        }
        n => {
            code.push(Insn::int_const(n as i32));
            code.push(Insn::type_insn(ANEWARRAY, KTYPE_PROJECTION));
            for (i, argument) in arguments.iter().enumerate() {
                code.push(Insn::Simple(DUP));
                code.push(Insn::int_const(i as i32));
                if !projection(argument, &mut code) {
                    return false;
                }
                code.push(Insn::Simple(AASTORE));
            }
            format!("[L{KTYPE_PROJECTION};")
        }
    };
    let name = if ty.nullable { "nullableTypeOf" } else { "typeOf" };
    code.push(Insn::method(
        INVOKESTATIC,
        REFLECTION,
        name,
        format!("({KCLASS}{projections}){KTYPE}"),
    ));
    out.extend(code);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_safe_cast_checks_null() {
        let ty = ReifiedType::class("kotlin/String");
        let mut out = Vec::new();
        generate_as_cast(&DefaultIntrinsics, &ty, &AsmType::object("java/lang/String"), false, true, &mut out);
        assert_eq!(out[0], Insn::Simple(DUP));
        assert!(out.contains(&Insn::type_insn(NEW, "java/lang/NullPointerException")));
        assert_eq!(out.last(), Some(&Insn::type_insn(CHECKCAST, "java/lang/String")));
    }

    #[test]
    fn test_nullable_cast_has_no_null_check() {
        let ty = ReifiedType::class("kotlin/String").make_nullable();
        let mut out = Vec::new();
        generate_as_cast(&DefaultIntrinsics, &ty, &AsmType::object("java/lang/String"), false, false, &mut out);
        assert_eq!(out, vec![Insn::type_insn(CHECKCAST, "java/lang/String")]);
    }

    #[test]
    fn test_mutable_collection_cast() {
        let ty = ReifiedType::class("kotlin/collections/MutableList").make_nullable();
        let mut out = Vec::new();
        generate_as_cast(&DefaultIntrinsics, &ty, &AsmType::object("java/util/List"), false, true, &mut out);
        assert_eq!(
            out,
            vec![type_intrinsic("asMutableList", "(Ljava/lang/Object;)Ljava/util/List;")]
        );
    }

    #[test]
    fn test_function_is_check() {
        let ty = ReifiedType::class("kotlin/Function1");
        let mut out = Vec::new();
        generate_is_check(&DefaultIntrinsics, &ty, &AsmType::object("kotlin/jvm/functions/Function1"), &mut out);
        assert_eq!(
            out,
            vec![
                Insn::Simple(ICONST_1),
                type_intrinsic("isFunctionOfArity", "(Ljava/lang/Object;I)Z")
            ]
        );
    }

    #[test]
    fn test_type_of_with_argument() {
        let ty = ReifiedType::generic("kotlin/collections/List", vec![ReifiedType::class("kotlin/String")]);
        let mut out = Vec::new();
        assert!(DefaultIntrinsics.generate_type_of(&ty, &mut out));
        assert_eq!(out[0], Insn::Ldc(Constant::Type(AsmType::object("java/util/List"))));
        assert_eq!(
            out.last(),
            Some(&Insn::method(
                INVOKESTATIC,
                REFLECTION,
                "typeOf",
                "(Lkotlin/reflect/KClass;Lkotlin/reflect/KTypeProjection;)Lkotlin/reflect/KType;"
            ))
        );
        assert!(!DefaultIntrinsics.generate_type_of(&ReifiedType::type_parameter("T", false), &mut out));
    }
}
