//! Marker calls and naming conventions shared between the front end and the
//! inliner.
//!
//! Markers are calls to methods that do not exist at runtime; each of them
//! must be consumed or stripped before a class is written.

use crate::insn::list::{Insn, InsnId, InsnList};
use crate::insn::method::MethodNode;
use crate::insn::opcodes::*;

pub const INLINE_MARKER_CLASS: &str = "kotlin/jvm/internal/InlineMarker";
pub const BEFORE_INLINE_CALL: &str = "beforeInlineCall";
pub const AFTER_INLINE_CALL: &str = "afterInlineCall";
pub const FINALLY_START: &str = "finallyStart";
pub const FINALLY_END: &str = "finallyEnd";
pub const SUSPEND_MARKER: &str = "mark";

pub const NON_LOCAL_RETURN: &str = "$$$$$NON_LOCAL_RETURN$$$$$";
pub const DEFAULT_LAMBDA_FAKE_CALL: &str = "$$$DEFAULT_LAMBDA_FAKE_CALL$$$";

pub const CAPTURED_FIELD_PREFIX: &str = "$";
pub const CAPTURED_FIELD_FOLD_PREFIX: &str = "$$$";
pub const CAPTURED_THIS_FIELD: &str = "this$0";
pub const CAPTURED_RECEIVER_FIELD: &str = "receiver$0";
pub const ASSERTIONS_DISABLED_FIELD: &str = "$assertionsDisabled";
pub const INLINE_FUN_THIS_0_SUFFIX: &str = "$inline_fun";
pub const INLINE_TRANSFORMATION_SUFFIX: &str = "$inlined";
pub const THIS: &str = "this";
/// Appended to locals of an inlined function body.
pub const INLINE_FUN_VAR_SUFFIX: &str = "$iv";
pub const LOCAL_FOR_INLINE_FUNCTION: &str = "$i$f$";
pub const LOCAL_FOR_INLINE_ARGUMENT: &str = "$i$a$";

pub const FUNCTION_PREFIX: &str = "kotlin/jvm/functions/Function";

pub fn is_captured_field_name(name: &str) -> bool {
    (name.starts_with(CAPTURED_FIELD_PREFIX)
        && !name.starts_with(CAPTURED_FIELD_FOLD_PREFIX)
        && name != ASSERTIONS_DISABLED_FIELD)
        || name == CAPTURED_THIS_FIELD
        || name == CAPTURED_RECEIVER_FIELD
}

pub fn is_this0(name: &str) -> bool {
    name == CAPTURED_THIS_FIELD
}

/// Placeholder name for a captured field that an enclosing inlining level
/// has to resolve.
/// Fake locals mark the extent of inlined code for debuggers.
pub fn is_fake_local_variable_for_inline(name: &str) -> bool {
    name.starts_with(LOCAL_FOR_INLINE_FUNCTION) || name.starts_with(LOCAL_FOR_INLINE_ARGUMENT)
}

pub fn fold_name(field_name: &str) -> String {
    format!("{CAPTURED_FIELD_FOLD_PREFIX}{field_name}")
}

pub fn unfold_name(name: &str) -> Option<&str> {
    name.strip_prefix(CAPTURED_FIELD_FOLD_PREFIX)
}

/// Lambdas and anonymous objects are named `Outer$<digits>`.
pub fn is_anonymous_class(internal_name: &str) -> bool {
    let short_name = internal_name.rsplit('/').next().unwrap_or(internal_name);
    match short_name.rfind('$') {
        Some(index) => {
            let suffix = &short_name[index + 1..];
            !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

pub fn is_anonymous_constructor_call(owner: &str, name: &str) -> bool {
    name == "<init>" && is_anonymous_class(owner)
}

pub fn is_anonymous_singleton_load(owner: &str, name: &str) -> bool {
    name == "INSTANCE" && is_anonymous_class(owner)
}

pub fn inline_marker(name: &str) -> Insn {
    Insn::method(INVOKESTATIC, INLINE_MARKER_CLASS, name, "()V")
}

pub fn is_inline_marker(insn: &Insn, name: &str) -> bool {
    matches!(insn, Insn::Method { opcode: INVOKESTATIC, owner, name: n, .. }
        if owner == INLINE_MARKER_CLASS && n == name)
}

pub fn is_before_inline_marker(insn: &Insn) -> bool {
    is_inline_marker(insn, BEFORE_INLINE_CALL)
}

pub fn is_after_inline_marker(insn: &Insn) -> bool {
    is_inline_marker(insn, AFTER_INLINE_CALL)
}

pub fn is_suspend_marker(insn: &Insn) -> bool {
    is_inline_marker(insn, SUSPEND_MARKER)
}

/// `ICONST depth; INVOKESTATIC InlineMarker.finallyStart(I)V`
pub fn finally_marker(start: bool, depth: i32) -> [Insn; 2] {
    let name = if start { FINALLY_START } else { FINALLY_END };
    [
        Insn::int_const(depth),
        Insn::method(INVOKESTATIC, INLINE_MARKER_CLASS, name, "(I)V"),
    ]
}

pub fn is_finally_start(insn: &Insn) -> bool {
    is_inline_marker(insn, FINALLY_START)
}

pub fn is_finally_end(insn: &Insn) -> bool {
    is_inline_marker(insn, FINALLY_END)
}

pub fn is_finally_marker(insn: &Insn) -> bool {
    is_finally_start(insn) || is_finally_end(insn)
}

/// Depth operand of the finally marker at `id`.
pub fn finally_marker_depth(list: &InsnList, id: InsnId) -> Option<i32> {
    list.prev(id).and_then(|prev| list.get(prev).int_value())
}

/// Strips every finally marker together with its depth constant.
pub fn remove_finally_markers(method: &mut MethodNode) {
    let list = &mut method.instructions;
    for id in list.ids() {
        if !list.contains(id) || !is_finally_marker(list.get(id)) {
            continue;
        }
        if let Some(prev) = list.prev(id) {
            if list.get(prev).int_value().is_some() {
                list.remove(prev);
            }
        }
        list.remove(id);
    }
}

/// `INVOKESTATIC $$$$$NON_LOCAL_RETURN$$$$$.<label>()V`, placed right before
/// a return that leaves the function named `label`.
pub fn non_local_return_marker(label: &str) -> Insn {
    Insn::method(INVOKESTATIC, NON_LOCAL_RETURN, label, "()V")
}

/// Target label of a non-local return marker.
pub fn non_local_return_label(insn: &Insn) -> Option<&str> {
    match insn {
        Insn::Method {
            opcode: INVOKESTATIC,
            owner,
            name,
            ..
        } if owner == NON_LOCAL_RETURN => Some(name),
        _ => None,
    }
}

/// Label of the function a return at `id` leaves, if the return is marked.
pub fn marked_return_label(list: &InsnList, id: InsnId) -> Option<String> {
    let prev = list.prev(id)?;
    non_local_return_label(list.get(prev)).map(str::to_string)
}

pub fn default_lambda_fake_call(offset: usize, desc: String) -> Insn {
    Insn::method(
        INVOKESTATIC,
        DEFAULT_LAMBDA_FAKE_CALL,
        format!("{DEFAULT_LAMBDA_FAKE_CALL}{offset}"),
        desc,
    )
}

/// Parameter offset a default lambda fake call stores into.
pub fn default_lambda_fake_call_offset(insn: &Insn) -> Option<usize> {
    match insn {
        Insn::Method { owner, name, .. } if owner == DEFAULT_LAMBDA_FAKE_CALL => name
            .strip_prefix(DEFAULT_LAMBDA_FAKE_CALL)
            .and_then(|offset| offset.parse().ok()),
        _ => None,
    }
}

/// `PUTFIELD`s storing constructor arguments into captured fields:
/// `ALOAD 0; xLOAD n; PUTFIELD owner.$name`.
pub fn find_captured_field_assignments(method: &MethodNode) -> Vec<InsnId> {
    let list = &method.instructions;
    list.iter()
        .filter(|(id, insn)| {
            let Insn::Field {
                opcode: PUTFIELD,
                name,
                ..
            } = insn
            else {
                return false;
            };
            if !is_captured_field_name(name) {
                return false;
            }
            let Some(value) = list.prev(*id) else {
                return false;
            };
            let Some(receiver) = list.prev(value) else {
                return false;
            };
            matches!(list.get(value), Insn::Var { .. })
                && matches!(list.get(receiver), Insn::Var { opcode: ALOAD, var: 0 })
        })
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_field_names() {
        assert!(is_captured_field_name("$x"));
        assert!(is_captured_field_name("this$0"));
        assert!(is_captured_field_name("receiver$0"));
        assert!(!is_captured_field_name("$assertionsDisabled"));
        assert!(!is_captured_field_name("$$$x"));
        assert!(!is_captured_field_name("value"));
    }

    #[test]
    fn test_anonymous_class_names() {
        assert!(is_anonymous_class("foo/Bar$1"));
        assert!(is_anonymous_class("foo/Bar$baz$12"));
        assert!(!is_anonymous_class("foo/Bar$Inner"));
        assert!(!is_anonymous_class("foo/Bar$"));
        assert!(!is_anonymous_class("foo/Bar"));
    }

    #[test]
    fn test_fake_call_offset() {
        let call = default_lambda_fake_call(5, "(I)V".into());
        assert_eq!(default_lambda_fake_call_offset(&call), Some(5));
        assert_eq!(
            default_lambda_fake_call_offset(&inline_marker(BEFORE_INLINE_CALL)),
            None
        );
    }

    #[test]
    fn test_remove_finally_markers() {
        let mut method = MethodNode::new(ACC_STATIC, "f", "()V");
        let [depth, start] = finally_marker(true, 1);
        let [end_depth, end] = finally_marker(false, 1);
        method.instructions = vec![
            depth,
            start,
            Insn::Simple(NOP),
            end_depth,
            end,
            Insn::Simple(RETURN),
        ]
        .into();
        remove_finally_markers(&mut method);
        assert_eq!(
            method.instructions.to_vec(),
            vec![Insn::Simple(NOP), Insn::Simple(RETURN)]
        );
    }

    #[test]
    fn test_marked_return() {
        let list: InsnList = vec![
            non_local_return_marker("outer"),
            Insn::Simple(RETURN),
        ]
        .into();
        let ret = list.last().unwrap();
        assert_eq!(marked_return_label(&list, ret).as_deref(), Some("outer"));
    }

    #[test]
    fn test_find_captured_field_assignments() {
        let mut ctor = MethodNode::new(0, "<init>", "(I)V");
        ctor.instructions = vec![
            Insn::var(ALOAD, 0),
            Insn::var(ILOAD, 1),
            Insn::field(PUTFIELD, "a/B$1", "$x", "I"),
            Insn::var(ALOAD, 0),
            Insn::var(ILOAD, 1),
            Insn::field(PUTFIELD, "a/B$1", "plain", "I"),
            Insn::Simple(RETURN),
        ]
        .into();
        assert_eq!(find_captured_field_assignments(&ctor).len(), 1);
    }
}
