use kinline_core::inliner::{CallArgument, InlineCall};
use kinline_core::insn::markers::{is_inline_marker, AFTER_INLINE_CALL, BEFORE_INLINE_CALL};
use kinline_core::insn::opcodes::*;
use kinline_core::insn::{AsmType, Insn, MethodId};
use kinline_core::reified::{ReifiedType, TypeParameterMapping, TypeParameterMappings};
use kinline_core::smap::{SourceInfo, SourceMapper};
use kinline_core::{DiagnosticHandler, InlineError};
use kinline_test_helpers::fixtures::{self, call_site, caller, lib_class, lib_method, no_smap, LIB};
use kinline_test_helpers::harness::code;
use kinline_test_helpers::{InlineHarness, MockSourceCompiler};

fn main_mapper() -> SourceMapper {
    SourceMapper::new(Some(SourceInfo::new("Main.kt", fixtures::MAIN, 10)))
}

#[test]
fn test_simple_function_is_inlined() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("twice");
    let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]);
    let mut mapper = main_mapper();

    let result = harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut mapper)
        .unwrap();

    assert!(result.regenerated_classes.is_empty());
    assert!(!harness.diagnostics.has_errors());
    let insns = code(&main);
    assert!(!insns.iter().any(|insn| insn.is_method_call(LIB, "twice")));
    assert_eq!(insns[0], Insn::var(ILOAD, 0));
    assert_eq!(insns[1], Insn::var(ISTORE, 1));
    assert_eq!(insns.iter().filter(|insn| **insn == Insn::var(ILOAD, 1)).count(), 2);
    assert_eq!(insns.last(), Some(&Insn::Simple(IRETURN)));
    assert!(main.local_variables.iter().any(|local| local.name == "$i$f$twice"));
    assert!(main.max_locals >= 3);
}

#[test]
fn test_inlined_lines_are_mapped_after_the_file() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("twice");
    let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]);
    let mut mapper = main_mapper();
    harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut mapper)
        .unwrap();

    let lines: Vec<i32> = main
        .instructions
        .iter()
        .filter_map(|(_, insn)| match insn {
            Insn::LineNumber { line, .. } => Some(*line),
            _ => None,
        })
        .collect();
    // caller line, the callee's line 3 of Lib.kt, back on the caller line
    assert_eq!(lines, vec![5, 11, 5]);
    assert_eq!(mapper.max_used(), 11);
    assert!(mapper
        .result_mappings()
        .iter()
        .any(|mapping| mapping.name == "Lib.kt" && mapping.path == LIB));
}

#[test]
fn test_loop_body_is_wrapped_in_stack_markers() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("countDown");
    let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]);
    let mut mapper = main_mapper();
    harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut mapper)
        .unwrap();

    let insns = code(&main);
    let before = insns
        .iter()
        .position(|insn| is_inline_marker(insn, BEFORE_INLINE_CALL))
        .unwrap();
    let after = insns
        .iter()
        .position(|insn| is_inline_marker(insn, AFTER_INLINE_CALL))
        .unwrap();
    assert!(before < after);
    assert!(insns[before..after].contains(&Insn::Iinc { var: 1, incr: -1 }));
    assert!(main.local_variables.iter().any(|local| local.name == "sum$iv"));
}

#[test]
fn test_straight_line_body_needs_no_stack_markers() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("twice");
    let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]);
    harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut main_mapper())
        .unwrap();
    assert!(!code(&main)
        .iter()
        .any(|insn| is_inline_marker(insn, BEFORE_INLINE_CALL)));
}

#[test]
fn test_reified_check_uses_the_type_argument() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("isA");
    let mut main = caller(
        "(Ljava/lang/Object;)Z",
        vec![Insn::var(ALOAD, 0)],
        &callee,
        vec![Insn::Simple(IRETURN)],
    );
    let mut mappings = TypeParameterMappings::new();
    mappings.add(
        "T",
        TypeParameterMapping::new(ReifiedType::class("kotlin/String"), AsmType::object("java/lang/String"), "", true),
    );
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]).with_type_mappings(mappings);
    let result = harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut main_mapper())
        .unwrap();

    let insns = code(&main);
    assert!(insns.contains(&Insn::type_insn(INSTANCEOF, "java/lang/String")));
    assert!(!insns
        .iter()
        .any(|insn| insn.is_method_call("kotlin/jvm/internal/Intrinsics", "reifiedOperationMarker")));
    assert!(!result.reified_type_parameters_usages.were_used_reified_parameters());
}

#[test]
fn test_default_arguments_are_resolved_by_mask() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("scaled$default");
    let mut main = caller(
        "(I)I",
        vec![
            Insn::var(ILOAD, 0),
            Insn::int_const(0),
            Insn::int_const(2),
            Insn::Simple(ACONST_NULL),
        ],
        &callee,
        vec![Insn::Simple(IRETURN)],
    );
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value, CallArgument::Default])
        .with_default_masks(vec![2]);
    harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut main_mapper())
        .unwrap();

    let insns = code(&main);
    assert!(insns.contains(&Insn::int_const(10)));
    assert!(insns.contains(&Insn::Simple(IMUL)));
    assert!(!insns.contains(&Insn::Simple(IAND)));
    assert!(!insns.contains(&Insn::Simple(ATHROW)));
    assert!(main.local_variables.iter().any(|local| local.name == "$i$f$scaled"));
}

#[test]
fn test_body_compiled_from_source_wins() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("twice");
    let mut source_body = fixtures::twice();
    source_body.instructions = vec![
        Insn::var(ILOAD, 0),
        Insn::int_const(2),
        Insn::Simple(IMUL),
        Insn::Simple(IRETURN),
    ]
    .into();
    let compiler = MockSourceCompiler::new().with_function(callee.clone(), no_smap(source_body));
    let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]);
    harness.inline(&compiler, &mut main, &request, &mut main_mapper()).unwrap();

    assert!(code(&main).contains(&Insn::Simple(IMUL)));
    assert_eq!(harness.classes.reads(), 0);
}

#[test]
fn test_compiled_bodies_are_cached() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("twice");
    for _ in 0..3 {
        let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
        let request = InlineCall::new(callee.clone(), call_site(5), vec![CallArgument::Value]);
        harness
            .inline(&MockSourceCompiler::new(), &mut main, &request, &mut main_mapper())
            .unwrap();
    }
    assert_eq!(harness.classes.reads(), 1);
    assert!(harness.cache.contains_method_node(&callee));
}

#[test]
fn test_missing_method_is_reported_at_call_site() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = MethodId::new(LIB, "gone", "(I)I");
    let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]);
    let err = harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut main_mapper())
        .unwrap_err();
    match err {
        InlineError::CallSite { location, source } => {
            assert_eq!(location, "Main.kt:5");
            assert!(matches!(*source, InlineError::MethodNotFound { ref name, .. } if name == "gone"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_argument_count_mismatch_is_internal() {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let callee = lib_method("twice");
    let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), Vec::new());
    let err = harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut main_mapper())
        .unwrap_err();
    assert!(err.is_internal());
}
