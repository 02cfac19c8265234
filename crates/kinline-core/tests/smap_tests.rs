use indoc::indoc;
use kinline_core::inliner::{attach_source_map, CallArgument, InlineCall};
use kinline_core::insn::opcodes::*;
use kinline_core::insn::{ClassNode, Insn};
use kinline_core::smap::{SmapParser, SourceInfo, SourceMapper};
use kinline_core::InlineConfig;
use kinline_test_helpers::fixtures::{call_site, caller, lib_class, lib_method, MAIN};
use kinline_test_helpers::{InlineHarness, MockSourceCompiler};

/// `Main.kt` (10 lines) with `twice` inlined on line 5.
fn inline_twice(config: InlineConfig) -> ClassNode {
    let harness = InlineHarness::with_config(config, [lib_class()]).unwrap();
    let callee = lib_method("twice");
    let mut main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]);
    let mut mapper = SourceMapper::new(Some(SourceInfo::new("Main.kt", MAIN, 10)));
    harness
        .inline(&MockSourceCompiler::new(), &mut main, &request, &mut mapper)
        .unwrap();

    let mut class = ClassNode::new(ACC_PUBLIC | ACC_FINAL | ACC_SUPER, MAIN, "java/lang/Object");
    class.source_file = Some("Main.kt".into());
    class.methods.push(main);
    attach_source_map(&mut class, &mapper, &harness.config);
    class
}

#[test]
fn test_caller_smap_after_inlining() {
    let class = inline_twice(InlineConfig::default());
    let smap = class.source_debug.unwrap();
    insta::assert_snapshot!(smap, @r"
    SMAP
    Main.kt
    Kotlin
    *S Kotlin
    *F
    + 1 Main.kt
    a/MainKt
    + 2 Lib.kt
    a/LibKt
    *L
    1#1,10:1
    3#2:11
    *S KotlinDebug
    *F
    + 1 Main.kt
    a/MainKt
    *L
    5#1:11
    *E
    ");
}

#[test]
fn test_backwards_compatible_caller_smap() {
    let config = InlineConfig {
        correct_source_mapping_syntax: false,
        ..InlineConfig::default()
    };
    let smap = inline_twice(config).source_debug.unwrap();
    let expected = indoc! {"
        SMAP
        Main.kt
        Kotlin
        *S Kotlin
        *F
        + 1 Main.kt
        a/MainKt
        + 2 Lib.kt
        a/LibKt
        *L
        1#1,10:1
        3#2:11
        *E
        *S KotlinDebug
        *F
        + 1 Main.kt
        a/MainKt
        *L
        5#1:11
        *E
    "};
    assert_eq!(smap, expected);
}

#[test]
fn test_written_smap_is_read_back() {
    let class = inline_twice(InlineConfig::default());
    let smap = SmapParser::parse_or_none(class.source_debug.as_deref().unwrap()).unwrap();
    let (file, range) = smap.find_range(11).unwrap();
    assert_eq!(file.name, "Lib.kt");
    assert_eq!(range.map_dest_to_source(11), 3);
    let site = range.call_site.as_ref().unwrap();
    assert_eq!(site.line, 5);
    assert_eq!(site.file, "Main.kt");
}
