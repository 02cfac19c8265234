use crate::insn::markers::{marked_return_label, non_local_return_label};
use crate::insn::opcodes::*;
use crate::insn::{AsmType, Insn, InsnId, LabelId, MethodNode};

/// A non-local return left in an inlined body. Finally sections enclosing
/// the call site are inserted before `before_insn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointForExternalFinallyBlocks {
    pub before_insn: InsnId,
    pub return_type: AsmType,
    /// Label right before the return; inserted finally code ends here.
    pub finally_interval_end: LabelId,
}

fn return_type(opcode: u8) -> AsmType {
    match opcode {
        IRETURN => AsmType::Int,
        LRETURN => AsmType::Long,
        FRETURN => AsmType::Float,
        DRETURN => AsmType::Double,
        ARETURN => AsmType::java_object(),
        _ => AsmType::Void,
    }
}

/// Turns the returns of an inlined body into jumps to `end_label`, leaving
/// the returned value on the stack.
///
/// A return is local unless it is marked with a label outside
/// `return_labels`; such non-local returns leave the enclosing function and
/// stay, and a point for external finally blocks is recorded for each.
pub fn process_returns(
    node: &mut MethodNode,
    return_labels: &[String],
    end_label: LabelId,
) -> Vec<PointForExternalFinallyBlocks> {
    let list = &mut node.instructions;
    let mut points = Vec::new();
    for id in list.ids() {
        let Insn::Simple(opcode) = *list.get(id) else {
            continue;
        };
        if !is_return(opcode) {
            continue;
        }
        let label = marked_return_label(list, id);
        let is_local = label
            .as_ref()
            .map_or(true, |label| return_labels.iter().any(|it| it == label));

        if is_local {
            if label.is_some() {
                if let Some(marker) = list.prev(id) {
                    list.remove(marker);
                }
            }
            list.set(id, Insn::jump(GOTO, end_label));
            continue;
        }

        let before_insn = list
            .prev(id)
            .filter(|prev| non_local_return_label(list.get(*prev)).is_some())
            .unwrap_or(id);
        let finally_interval_end = LabelId::fresh();
        list.insert_before(id, Insn::Label(finally_interval_end));
        points.push(PointForExternalFinallyBlocks {
            before_insn,
            return_type: return_type(opcode),
            finally_interval_end,
        });
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::markers::non_local_return_marker;
    use crate::insn::InsnList;

    #[test]
    fn test_local_returns_jump_to_end() {
        let end = LabelId::fresh();
        let mut node = MethodNode::new(ACC_STATIC, "f", "(I)I");
        node.instructions = InsnList::from(vec![
            Insn::var(ILOAD, 0),
            Insn::Simple(IRETURN),
            Insn::Label(end),
        ]);
        let points = process_returns(&mut node, &[], end);
        assert!(points.is_empty());
        assert_eq!(
            node.instructions.to_vec(),
            vec![Insn::var(ILOAD, 0), Insn::jump(GOTO, end), Insn::Label(end)]
        );
    }

    #[test]
    fn test_marked_return_of_own_label_is_local() {
        let end = LabelId::fresh();
        let mut node = MethodNode::new(ACC_STATIC, "invoke", "()V");
        node.instructions = InsnList::from(vec![
            non_local_return_marker("forEach"),
            Insn::Simple(RETURN),
            Insn::Label(end),
        ]);
        let points = process_returns(&mut node, &["forEach".to_string()], end);
        assert!(points.is_empty());
        assert_eq!(
            node.instructions.to_vec(),
            vec![Insn::jump(GOTO, end), Insn::Label(end)]
        );
    }

    #[test]
    fn test_non_local_return_is_kept() {
        let end = LabelId::fresh();
        let mut node = MethodNode::new(ACC_STATIC, "invoke", "()V");
        node.instructions = InsnList::from(vec![
            Insn::int_const(7),
            non_local_return_marker("caller"),
            Insn::Simple(IRETURN),
            Insn::Label(end),
        ]);
        let points = process_returns(&mut node, &["forEach".to_string()], end);
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.return_type, AsmType::Int);
        assert_eq!(
            non_local_return_label(node.instructions.get(point.before_insn)),
            Some("caller")
        );

        let insns = node.instructions.to_vec();
        assert_eq!(insns.len(), 5);
        assert_eq!(insns[2], Insn::Label(point.finally_interval_end));
        assert_eq!(insns[3], Insn::Simple(IRETURN));
    }
}
