//! Test fixtures: compiled classes of a small inline library and the
//! lambdas and callers that use it.
//!
//! The library is `a/LibKt` from `Lib.kt`:
//!
//! ```kotlin
//! inline fun twice(x: Int) = x + x                       // line 3
//! inline fun applyTo(x: Int, block: (Int) -> Int) = block(x)  // line 6
//! inline fun countDown(n: Int): Int { ... }              // lines 9-12
//! inline fun wrap(crossinline block: () -> Unit) =
//!     object : Runnable { override fun run() = block() } // lines 15-16
//! inline fun <reified T> isA(x: Any) = x is T            // line 19
//! inline fun scaled(x: Int, factor: Int = 10) = x * factor  // line 22
//! ```

use kinline_core::context::InlineCallSiteInfo;
use kinline_core::insn::opcodes::*;
use kinline_core::insn::{
    AsmType, ClassNode, FieldNode, Insn, InsnList, LabelId, LocalVariable, MethodId, MethodNode,
    StackValue,
};
use kinline_core::lambda::{CapturedVar, LambdaInfo};
use kinline_core::params::CapturedParamDesc;
use kinline_core::reified::{put_reified_operation_marker, OperationKind, ReificationArgument};
use kinline_core::smap::{Smap, SmapAndMethodNode, SmapParser};

pub const LIB: &str = "a/LibKt";
pub const WRAP_OBJECT: &str = "a/LibKt$wrap$1";
pub const MAIN: &str = "a/MainKt";
pub const FUNCTION0: &str = "kotlin/jvm/functions/Function0";
pub const FUNCTION1: &str = "kotlin/jvm/functions/Function1";

/// Body with a line number at its start.
fn at_line(line: i32, code: Vec<Insn>) -> InsnList {
    let start = LabelId::fresh();
    let mut insns = vec![Insn::Label(start), Insn::LineNumber { line, start }];
    insns.extend(code);
    InsnList::from(insns)
}

fn method(access: u32, name: &str, desc: &str, max_locals: usize, code: InsnList) -> MethodNode {
    let mut node = MethodNode::new(access, name, desc);
    node.instructions = code;
    node.max_locals = max_locals;
    node
}

pub fn twice() -> MethodNode {
    method(
        ACC_PUBLIC | ACC_STATIC | ACC_FINAL,
        "twice",
        "(I)I",
        1,
        at_line(
            3,
            vec![
                Insn::var(ILOAD, 0),
                Insn::var(ILOAD, 0),
                Insn::Simple(IADD),
                Insn::Simple(IRETURN),
            ],
        ),
    )
}

pub fn apply_to() -> MethodNode {
    method(
        ACC_PUBLIC | ACC_STATIC | ACC_FINAL,
        "applyTo",
        &format!("(IL{FUNCTION1};)I"),
        2,
        at_line(
            6,
            vec![
                Insn::var(ALOAD, 1),
                Insn::var(ILOAD, 0),
                Insn::method(INVOKESTATIC, "java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"),
                Insn::Method {
                    opcode: INVOKEINTERFACE,
                    owner: FUNCTION1.into(),
                    name: "invoke".into(),
                    desc: "(Ljava/lang/Object;)Ljava/lang/Object;".into(),
                    itf: true,
                },
                Insn::type_insn(CHECKCAST, "java/lang/Number"),
                Insn::method(INVOKEVIRTUAL, "java/lang/Number", "intValue", "()I"),
                Insn::Simple(IRETURN),
            ],
        ),
    )
}

/// `var left = n; var sum = 0; while (left > 0) { left--; sum++ }; sum`
pub fn count_down() -> MethodNode {
    let (top, exit, start, end) = (LabelId::fresh(), LabelId::fresh(), LabelId::fresh(), LabelId::fresh());
    let mut node = method(
        ACC_PUBLIC | ACC_STATIC | ACC_FINAL,
        "countDown",
        "(I)I",
        2,
        at_line(
            9,
            vec![
                Insn::int_const(0),
                Insn::var(ISTORE, 1),
                Insn::Label(start),
                Insn::Label(top),
                Insn::var(ILOAD, 0),
                Insn::jump(IFLE, exit),
                Insn::Iinc { var: 0, incr: -1 },
                Insn::Iinc { var: 1, incr: 1 },
                Insn::jump(GOTO, top),
                Insn::Label(exit),
                Insn::var(ILOAD, 1),
                Insn::Simple(IRETURN),
                Insn::Label(end),
            ],
        ),
    );
    node.local_variables.push(LocalVariable::new("sum", "I", start, end, 1));
    node
}

pub fn wrap() -> MethodNode {
    method(
        ACC_PUBLIC | ACC_STATIC | ACC_FINAL,
        "wrap",
        &format!("(L{FUNCTION0};)Ljava/lang/Runnable;"),
        1,
        at_line(
            15,
            vec![
                Insn::type_insn(NEW, WRAP_OBJECT),
                Insn::Simple(DUP),
                Insn::var(ALOAD, 0),
                Insn::method(INVOKESPECIAL, WRAP_OBJECT, "<init>", &format!("(L{FUNCTION0};)V")),
                Insn::Simple(ARETURN),
            ],
        ),
    )
}

pub fn is_a() -> MethodNode {
    let mut code = vec![Insn::var(ALOAD, 0)];
    put_reified_operation_marker(OperationKind::Is, &ReificationArgument::parse("T"), &mut code);
    code.push(Insn::type_insn(INSTANCEOF, "java/lang/Object"));
    code.push(Insn::Simple(IRETURN));
    let mut node = method(
        ACC_PUBLIC | ACC_STATIC | ACC_FINAL,
        "isA",
        "(Ljava/lang/Object;)Z",
        1,
        at_line(19, code),
    );
    node.signature = Some("<T:Ljava/lang/Object;>(Ljava/lang/Object;)Z".into());
    node
}

/// The `$default` stub of `scaled`: one guard for `factor`, then the
/// method handle check.
pub fn scaled_default() -> MethodNode {
    let (guard_end, handle_end) = (LabelId::fresh(), LabelId::fresh());
    let exception = "java/lang/UnsupportedOperationException";
    method(
        ACC_PUBLIC | ACC_STATIC | ACC_SYNTHETIC,
        "scaled$default",
        "(IIILjava/lang/Object;)I",
        4,
        at_line(
            22,
            vec![
                Insn::var(ILOAD, 2),
                Insn::int_const(2),
                Insn::Simple(IAND),
                Insn::jump(IFEQ, guard_end),
                Insn::int_const(10),
                Insn::var(ISTORE, 1),
                Insn::Label(guard_end),
                Insn::var(ALOAD, 3),
                Insn::jump(IFNULL, handle_end),
                Insn::type_insn(NEW, exception),
                Insn::Simple(DUP),
                Insn::method(INVOKESPECIAL, exception, "<init>", "()V"),
                Insn::Simple(ATHROW),
                Insn::Label(handle_end),
                Insn::var(ILOAD, 0),
                Insn::var(ILOAD, 1),
                Insn::Simple(IMUL),
                Insn::Simple(IRETURN),
            ],
        ),
    )
}

pub fn lib_class() -> ClassNode {
    let mut class = ClassNode::new(ACC_PUBLIC | ACC_FINAL | ACC_SUPER, LIB, "java/lang/Object");
    class.source_file = Some("Lib.kt".into());
    class.methods = vec![twice(), apply_to(), count_down(), wrap(), is_a(), scaled_default()];
    class
}

/// The object `wrap` returns, capturing `block` in `$block`.
pub fn wrap_object_class() -> ClassNode {
    let mut class = ClassNode::new(ACC_PUBLIC | ACC_FINAL | ACC_SUPER, WRAP_OBJECT, "java/lang/Object");
    class.source_file = Some("Lib.kt".into());
    class.interfaces = vec!["java/lang/Runnable".into()];
    let block_desc = format!("L{FUNCTION0};");
    class
        .fields
        .push(FieldNode::new(ACC_FINAL | ACC_SYNTHETIC, "$block", &block_desc));

    let constructor = method(
        0,
        "<init>",
        &format!("({block_desc})V"),
        2,
        InsnList::from(vec![
            Insn::var(ALOAD, 0),
            Insn::var(ALOAD, 1),
            Insn::field(PUTFIELD, WRAP_OBJECT, "$block", &block_desc),
            Insn::var(ALOAD, 0),
            Insn::method(INVOKESPECIAL, "java/lang/Object", "<init>", "()V"),
            Insn::Simple(RETURN),
        ]),
    );
    let run = method(
        ACC_PUBLIC | ACC_FINAL,
        "run",
        "()V",
        1,
        at_line(
            16,
            vec![
                Insn::var(ALOAD, 0),
                Insn::field(GETFIELD, WRAP_OBJECT, "$block", &block_desc),
                Insn::Method {
                    opcode: INVOKEINTERFACE,
                    owner: FUNCTION0.into(),
                    name: "invoke".into(),
                    desc: "()Ljava/lang/Object;".into(),
                    itf: true,
                },
                Insn::Simple(POP),
                Insn::Simple(RETURN),
            ],
        ),
    );
    class.methods = vec![constructor, run];
    class
}

pub fn lib_method(name: &str) -> MethodId {
    let class = lib_class();
    let desc = class
        .methods
        .iter()
        .find(|m| m.name == name)
        .map(|m| m.desc.clone())
        .unwrap_or_else(|| panic!("no {name} in the library"));
    MethodId::new(LIB, name, desc)
}

/// `main` of `Main.kt`, calling `callee` on line 5 with `loads` pushed first.
pub fn caller(desc: &str, loads: Vec<Insn>, callee: &MethodId, tail: Vec<Insn>) -> MethodNode {
    let mut code = loads;
    code.push(Insn::method(INVOKESTATIC, &callee.owner, &callee.name, &callee.desc));
    code.extend(tail);
    let args = AsmType::argument_types(desc).map(|args| args.iter().map(AsmType::size).sum::<usize>()).unwrap_or(0);
    method(ACC_PUBLIC | ACC_STATIC | ACC_FINAL, "main", desc, args, at_line(5, code))
}

pub fn call_site(line: i32) -> InlineCallSiteInfo {
    InlineCallSiteInfo {
        file: Some("Main.kt".into()),
        line_number: line,
        ..InlineCallSiteInfo::new(MAIN, "main", "(I)I")
    }
}

fn lambda_body(invoke_desc: &str, max_locals: usize, code: Vec<Insn>) -> SmapAndMethodNode {
    let node = method(ACC_PUBLIC | ACC_FINAL, "invoke", invoke_desc, max_locals, at_line(5, code));
    let smap = SmapParser::parse_or_create_default(None, Some("Main.kt"), MAIN, 1, 10);
    SmapAndMethodNode::new(node, smap)
}

/// `{ it + 1 }`
pub fn increment_lambda() -> (LambdaInfo, SmapAndMethodNode) {
    let class = "a/MainKt$main$1";
    let body = lambda_body(
        "(I)I",
        2,
        vec![
            Insn::var(ILOAD, 1),
            Insn::int_const(1),
            Insn::Simple(IADD),
            Insn::Simple(IRETURN),
        ],
    );
    (LambdaInfo::new(class, "invoke", "(I)I"), body)
}

/// `{ it + y }`, with `y` in local 1 of the caller.
pub fn adding_lambda() -> (LambdaInfo, SmapAndMethodNode, Vec<CapturedVar>) {
    let class = "a/MainKt$main$2";
    let body = lambda_body(
        "(I)I",
        2,
        vec![
            Insn::var(ILOAD, 1),
            Insn::var(ALOAD, 0),
            Insn::field(GETFIELD, class, "$y", "I"),
            Insn::Simple(IADD),
            Insn::Simple(IRETURN),
        ],
    );
    let captured = vec![CapturedVar::new(
        CapturedParamDesc::new(class, "$y", AsmType::Int),
        Some(StackValue::local(1, AsmType::Int)),
    )];
    (LambdaInfo::new(class, "invoke", "(I)I"), body, captured)
}

/// `{ Log.hit() }`
pub fn logging_lambda() -> (LambdaInfo, SmapAndMethodNode) {
    let class = "a/MainKt$main$3";
    let body = lambda_body(
        "()V",
        1,
        vec![
            Insn::method(INVOKESTATIC, "a/Log", "hit", "()V"),
            Insn::Simple(RETURN),
        ],
    );
    (LambdaInfo::new(class, "invoke", "()V").crossinline(true), body)
}

/// Smap of a body compiled without debug information.
pub fn no_smap(node: MethodNode) -> SmapAndMethodNode {
    SmapAndMethodNode::new(node, Smap::new(Vec::new()))
}
