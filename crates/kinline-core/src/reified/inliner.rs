use super::intrinsics::{generate_as_cast, generate_is_check};
use super::{
    is_operation_reified_marker, operation_kind, reification_argument, IntrinsicsSupport,
    OperationKind, ReifiedType, ReifiedTypeParametersUsages, TypeParameterMappings,
    PLUGIN_INTRINSICS_MARKER_METHOD, PLUGIN_INTRINSICS_MARKER_OWNER,
    PLUGIN_INTRINSICS_MARKER_SIGNATURE,
};
use crate::insn::analysis::compute_max_stack;
use crate::insn::opcodes::*;
use crate::insn::{AsmType, Constant, Insn, InsnId, InsnList, MethodNode};
use tracing::{trace, warn};

/// Rewrites reified operation markers of a body using the type arguments
/// of one call.
pub struct ReifiedTypeInliner<'a> {
    mappings: Option<&'a TypeParameterMappings>,
    intrinsics: &'a dyn IntrinsicsSupport,
    unified_null_checks: bool,
    max_stack_size: usize,
}

impl<'a> ReifiedTypeInliner<'a> {
    pub fn new(
        mappings: Option<&'a TypeParameterMappings>,
        intrinsics: &'a dyn IntrinsicsSupport,
        unified_null_checks: bool,
    ) -> Self {
        Self {
            mappings,
            intrinsics,
            unified_null_checks,
            max_stack_size: 0,
        }
    }

    fn has_reified_parameters(&self) -> bool {
        self.mappings
            .is_some_and(TypeParameterMappings::has_reified_parameters)
    }

    /// Rewrites every marker whose parameter the mappings resolve, and
    /// returns the names of reified parameters of the caller that the body
    /// now refers to.
    pub fn reify_instructions(&mut self, node: &mut MethodNode) -> ReifiedTypeParametersUsages {
        let mut result = ReifiedTypeParametersUsages::default();
        if !self.has_reified_parameters() {
            return result;
        }
        self.max_stack_size = 0;
        for id in node.instructions.ids() {
            if !node.instructions.contains(id) || !is_operation_reified_marker(node.instructions.get(id)) {
                continue;
            }
            if let Some(usages) = self.process_reify_marker(id, &mut node.instructions) {
                result.merge_all(&usages);
            }
        }
        node.max_stack += self.max_stack_size;
        result
    }

    fn process_reify_marker(
        &mut self,
        marker: InsnId,
        list: &mut InsnList,
    ) -> Option<ReifiedTypeParametersUsages> {
        let kind = operation_kind(list, marker)?;
        let argument = reification_argument(list, marker)?;
        let mapping = self.mappings?.get(&argument.parameter_name)?;

        let asm_type = reify_asm_type(&mapping.asm_type, argument.array_depth);
        let ty = mapping.ty.reify(&argument);

        // Known types are rewritten in place; a type argument that is itself
        // a reified parameter of the caller keeps the marker with the
        // combined argument. `typeOf` is partially reified either way.
        if mapping.reification_argument.is_none() || kind == OperationKind::TypeOf {
            let processed = (self.is_plugin_next(list, marker) && self.process_plugin(marker, list, &ty))
                || match kind {
                    OperationKind::NewArray => process_next_type_insn(list, marker, &asm_type, ANEWARRAY),
                    OperationKind::As => self.process_as(marker, list, &ty, &asm_type, false),
                    OperationKind::SafeAs => self.process_as(marker, list, &ty, &asm_type, true),
                    OperationKind::Is => self.process_is(marker, list, &ty, &asm_type),
                    OperationKind::JavaClass => process_java_class(list, marker, &asm_type),
                    OperationKind::EnumReified => process_special_enum_function(list, marker, &asm_type),
                    OperationKind::TypeOf => self.process_type_of(marker, list, &ty),
                };
            if processed {
                trace!(?kind, argument = %argument, "reified marker rewritten");
                remove_marker(list, marker);
            } else {
                warn!(?kind, argument = %argument, "reified operation marker left in place");
            }
        } else if let Some(replacement) = &mapping.reification_argument {
            let combined = argument.combine(replacement);
            if let Some(ldc) = list.prev(marker) {
                list.set(ldc, Insn::ldc_string(combined.as_string()));
            }
        }
        Some(mapping.reified_type_parameters_usages.clone())
    }

    fn process_as(
        &mut self,
        marker: InsnId,
        list: &mut InsnList,
        ty: &ReifiedType,
        asm_type: &AsmType,
        safe: bool,
    ) -> bool {
        let Some(stub) = next_with_opcode(list, marker, CHECKCAST) else {
            return false;
        };
        let mut code = Vec::new();
        generate_as_cast(self.intrinsics, ty, asm_type, safe, self.unified_null_checks, &mut code);
        insert_after(list, marker, code);
        // A stub cast to anything but Object keeps the verifier happy on
        // merged branches.
        if matches!(list.get(stub), Insn::Type { desc, .. } if desc == crate::insn::types::OBJECT_NAME) {
            list.remove(stub);
        }
        self.max_stack_size = self.max_stack_size.max(4);
        true
    }

    fn process_is(
        &mut self,
        marker: InsnId,
        list: &mut InsnList,
        ty: &ReifiedType,
        asm_type: &AsmType,
    ) -> bool {
        let Some(stub) = next_with_opcode(list, marker, INSTANCEOF) else {
            return false;
        };
        let mut code = Vec::new();
        generate_is_check(self.intrinsics, ty, asm_type, &mut code);
        insert_after(list, marker, code);
        list.remove(stub);
        self.max_stack_size = self.max_stack_size.max(2);
        true
    }

    fn process_type_of(&mut self, marker: InsnId, list: &mut InsnList, ty: &ReifiedType) -> bool {
        let Some(stub) = next_with_opcode(list, marker, ACONST_NULL) else {
            return false;
        };
        let mut code = Vec::new();
        if !self.intrinsics.generate_type_of(ty, &mut code) {
            return false;
        }
        self.max_stack_size = self.max_stack_size.max(snippet_max_stack(&code));
        insert_after(list, marker, code);
        list.remove(stub);
        true
    }

    /// Marker, operation, `LDC`, `INVOKESTATIC MagicApiIntrinsics.voidMagicApiCall`.
    fn is_plugin_next(&self, list: &InsnList, marker: InsnId) -> bool {
        let Some(magic) = list
            .next(marker)
            .and_then(|id| list.next(id))
            .and_then(|id| list.next(id))
        else {
            return false;
        };
        let is_magic_call = matches!(
            list.get(magic),
            Insn::Method { opcode: INVOKESTATIC, owner, name, desc, .. }
                if owner == PLUGIN_INTRINSICS_MARKER_OWNER
                    && name == PLUGIN_INTRINSICS_MARKER_METHOD
                    && desc == PLUGIN_INTRINSICS_MARKER_SIGNATURE
        );
        is_magic_call && list.prev(magic).is_some_and(|id| matches!(list.get(id), Insn::Ldc(_)))
    }

    fn process_plugin(&mut self, marker: InsnId, list: &mut InsnList, ty: &ReifiedType) -> bool {
        let Some(reified_insn) = list.next(marker) else {
            return false;
        };
        let mut code = Vec::new();
        if !self
            .intrinsics
            .rewrite_plugin_defined_operation_marker(list.get(reified_insn), ty, &mut code)
        {
            return false;
        }
        self.max_stack_size = self.max_stack_size.max(snippet_max_stack(&code));
        insert_after(list, marker, code);
        true
    }
}

fn reify_asm_type(ty: &AsmType, array_depth: usize) -> AsmType {
    (0..array_depth).fold(ty.clone(), |ty, _| AsmType::array_of(ty))
}

fn next_with_opcode(list: &InsnList, marker: InsnId, opcode: u8) -> Option<InsnId> {
    list.next(marker)
        .filter(|id| list.get(*id).opcode() == Some(opcode))
}

fn insert_after(list: &mut InsnList, anchor: InsnId, code: Vec<Insn>) {
    list.insert_list_after(Some(anchor), InsnList::from(code));
}

/// Drops `ICONST kind; LDC arg; INVOKESTATIC marker`.
fn remove_marker(list: &mut InsnList, marker: InsnId) {
    if let Some(ldc) = list.prev(marker) {
        if let Some(kind) = list.prev(ldc) {
            list.remove(kind);
        }
        list.remove(ldc);
    }
    list.remove(marker);
}

fn process_next_type_insn(list: &mut InsnList, marker: InsnId, ty: &AsmType, opcode: u8) -> bool {
    let Some(next) = next_with_opcode(list, marker, opcode) else {
        return false;
    };
    list.set(next, Insn::type_insn(opcode, ty.internal_name()));
    true
}

fn process_java_class(list: &mut InsnList, marker: InsnId, ty: &AsmType) -> bool {
    match list.next(marker) {
        Some(next) if matches!(list.get(next), Insn::Ldc(_)) => {
            list.set(next, Insn::Ldc(Constant::Type(ty.clone())));
            true
        }
        _ => false,
    }
}

/// `enumValueOf<T>(name)` is compiled as `ACONST_NULL; ALOAD name;
/// INVOKESTATIC Enum.valueOf`, `enumValues<T>()` as `ICONST_0; ANEWARRAY`.
fn process_special_enum_function(list: &mut InsnList, marker: InsnId, ty: &AsmType) -> bool {
    let Some(next1) = list.next(marker) else {
        return false;
    };
    let Some(next2) = list.next(next1) else {
        return false;
    };
    let owner = ty.internal_name();
    match (list.get(next1).opcode(), list.get(next2).opcode()) {
        (Some(ACONST_NULL), Some(ALOAD)) => {
            let Some(next3) = list.next(next2) else {
                return false;
            };
            if !matches!(list.get(next3), Insn::Method { name, .. } if name == "valueOf") {
                return false;
            }
            list.remove(next1);
            list.set(
                next3,
                Insn::method(
                    INVOKESTATIC,
                    owner,
                    "valueOf",
                    format!("(Ljava/lang/String;){}", ty.descriptor()),
                ),
            );
            true
        }
        (Some(ICONST_0), Some(ANEWARRAY)) => {
            list.remove(next1);
            list.remove(next2);
            list.insert_after(
                marker,
                Insn::method(INVOKESTATIC, owner, "values", format!("()[{}", ty.descriptor())),
            );
            true
        }
        _ => false,
    }
}

fn snippet_max_stack(code: &[Insn]) -> usize {
    let mut snippet = MethodNode::new(ACC_STATIC, "snippet", "()V");
    snippet.instructions = code.iter().cloned().collect();
    compute_max_stack(&snippet).unwrap_or(code.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reified::{
        put_reified_operation_marker, DefaultIntrinsics, ReificationArgument, TypeParameterMapping,
    };

    fn mappings(ty: ReifiedType, asm_type: AsmType) -> TypeParameterMappings {
        let mut mappings = TypeParameterMappings::new();
        mappings.add("T", TypeParameterMapping::new(ty, asm_type, "", true));
        mappings
    }

    fn method_with(kind: OperationKind, argument: &str, operation: Vec<Insn>) -> MethodNode {
        let mut code = Vec::new();
        put_reified_operation_marker(kind, &ReificationArgument::parse(argument), &mut code);
        code.extend(operation);
        code.push(Insn::Simple(ARETURN));
        let mut method = MethodNode::new(ACC_STATIC, "f", "()Ljava/lang/Object;");
        method.instructions = code.into_iter().collect();
        method
    }

    #[test]
    fn test_java_class_and_new_array() {
        let mappings = mappings(ReifiedType::class("kotlin/String"), AsmType::object("java/lang/String"));
        let mut inliner = ReifiedTypeInliner::new(Some(&mappings), &DefaultIntrinsics, true);

        let mut method = method_with(
            OperationKind::JavaClass,
            "T",
            vec![Insn::Ldc(Constant::Type(AsmType::java_object()))],
        );
        let usages = inliner.reify_instructions(&mut method);
        assert!(!usages.were_used_reified_parameters());
        assert_eq!(
            method.instructions.to_vec(),
            vec![
                Insn::Ldc(Constant::Type(AsmType::object("java/lang/String"))),
                Insn::Simple(ARETURN)
            ]
        );

        let mut method = method_with(
            OperationKind::NewArray,
            "[T",
            vec![Insn::type_insn(ANEWARRAY, "java/lang/Object")],
        );
        inliner.reify_instructions(&mut method);
        assert_eq!(
            method.instructions.to_vec()[0],
            Insn::type_insn(ANEWARRAY, "[Ljava/lang/String;")
        );
    }

    #[test]
    fn test_is_check_replaces_stub() {
        let mappings = mappings(ReifiedType::class("kotlin/String"), AsmType::object("java/lang/String"));
        let mut inliner = ReifiedTypeInliner::new(Some(&mappings), &DefaultIntrinsics, true);
        let mut method = method_with(
            OperationKind::Is,
            "T",
            vec![Insn::type_insn(INSTANCEOF, "java/lang/Object")],
        );
        method.max_stack = 1;
        inliner.reify_instructions(&mut method);
        assert_eq!(
            method.instructions.to_vec(),
            vec![Insn::type_insn(INSTANCEOF, "java/lang/String"), Insn::Simple(ARETURN)]
        );
        assert_eq!(method.max_stack, 3);
    }

    #[test]
    fn test_caller_reified_parameter_keeps_marker() {
        let mut mappings = TypeParameterMappings::new();
        mappings.add(
            "T",
            TypeParameterMapping::new(
                ReifiedType::array_of(ReifiedType::type_parameter("R", true)),
                AsmType::array_of(AsmType::java_object()),
                "",
                true,
            ),
        );
        let mut inliner = ReifiedTypeInliner::new(Some(&mappings), &DefaultIntrinsics, true);
        let mut method = method_with(
            OperationKind::As,
            "T?",
            vec![Insn::type_insn(CHECKCAST, "java/lang/Object")],
        );
        let usages = inliner.reify_instructions(&mut method);
        assert!(usages.contains("R"));
        let code = method.instructions.to_vec();
        assert_eq!(code[1], Insn::ldc_string("[R?"));
        assert!(is_operation_reified_marker(&code[2]));
    }

    #[test]
    fn test_no_reified_parameters_is_noop() {
        let mut mappings = TypeParameterMappings::new();
        mappings.add(
            "T",
            TypeParameterMapping::new(ReifiedType::class("kotlin/String"), AsmType::object("java/lang/String"), "", false),
        );
        let mut inliner = ReifiedTypeInliner::new(Some(&mappings), &DefaultIntrinsics, true);
        let mut method = method_with(OperationKind::Is, "T", vec![Insn::type_insn(INSTANCEOF, "java/lang/Object")]);
        let before = method.instructions.to_vec();
        inliner.reify_instructions(&mut method);
        assert_eq!(method.instructions.to_vec(), before);
    }

    #[test]
    fn test_enum_values() {
        let mappings = mappings(ReifiedType::class("a/Color"), AsmType::object("a/Color"));
        let mut inliner = ReifiedTypeInliner::new(Some(&mappings), &DefaultIntrinsics, true);
        let mut method = method_with(
            OperationKind::EnumReified,
            "T",
            vec![Insn::Simple(ICONST_0), Insn::type_insn(ANEWARRAY, "java/lang/Enum")],
        );
        inliner.reify_instructions(&mut method);
        assert_eq!(
            method.instructions.to_vec(),
            vec![
                Insn::method(INVOKESTATIC, "a/Color", "values", "()[La/Color;"),
                Insn::Simple(ARETURN)
            ]
        );
    }
}
