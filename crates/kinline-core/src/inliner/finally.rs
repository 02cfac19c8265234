use super::returns::PointForExternalFinallyBlocks;
use super::SourceCompilerForInline;
use crate::errors::Result;
use crate::insn::markers::{finally_marker, finally_marker_depth, is_finally_start};
use crate::insn::{AsmType, Insn, LabelId, MethodNode};
use crate::intervals::{CoveringTryCatchNodeProcessor, SimpleInterval};
use tracing::debug;

/// What the caller's code generator needs to emit the finally sections
/// enclosing a call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinallyBlockRequest {
    /// Finally sections of the inlined body already entered at this point.
    pub depth: i32,
    /// Type of the value on the stack, which must survive the sections.
    pub return_type: AsmType,
    /// Where the inserted code ends.
    pub after_label: LabelId,
    /// Temporaries start here.
    pub first_free_local: usize,
}

/// Inserts the caller's finally sections before every non-local return in
/// `node`, and cuts the inserted code out of the try/catch blocks of the
/// inlined body that cover it.
pub fn generate_and_insert_finally_blocks(
    node: &mut MethodNode,
    points: &[PointForExternalFinallyBlocks],
    compiler: &dyn SourceCompilerForInline,
    offset_for_finally_local_var: usize,
) -> Result<()> {
    if points.is_empty() || !compiler.has_finally_blocks() {
        return Ok(());
    }
    let mut processor = CoveringTryCatchNodeProcessor::for_method(node, offset_for_finally_local_var)?;
    let mut finally_depth = 0;
    let mut cursor = node.instructions.first();
    while let Some(id) = cursor {
        processor.process_instruction(node.instructions.get(id), true)?;
        if is_finally_start(node.instructions.get(id)) {
            finally_depth = finally_marker_depth(&node.instructions, id).unwrap_or(finally_depth);
        }

        if let Some(point) = points.iter().find(|point| point.before_insn == id) {
            let first_free_local = processor
                .local_vars
                .current()
                .map(|local| local.node.index + AsmType::from_descriptor(&local.node.desc).map_or(1, |ty| ty.size()))
                .fold(
                    processor.next_free_local_index().max(offset_for_finally_local_var),
                    usize::max,
                );
            let request = FinallyBlockRequest {
                depth: finally_depth,
                return_type: point.return_type.clone(),
                after_label: point.finally_interval_end,
                first_free_local,
            };
            let code = compiler.generate_finally_blocks(&request)?;
            debug!(depth = finally_depth, insns = code.len(), "inserting finally blocks before non-local return");

            let start = LabelId::fresh();
            node.instructions.insert_before(id, Insn::Label(start));
            let marked = compiler.is_finally_marker_required();
            if marked {
                for insn in finally_marker(true, finally_depth) {
                    node.instructions.insert_before(id, insn);
                }
            }
            for insn in code {
                node.instructions.insert_before(id, insn);
            }
            if marked {
                for insn in finally_marker(false, finally_depth) {
                    node.instructions.insert_before(id, insn);
                }
            }

            let split_by = SimpleInterval::new(start, point.finally_interval_end);
            processor
                .try_blocks
                .split_and_remove_intervals_from_currents(&split_by, &node.instructions)?;
        }
        cursor = node.instructions.next(id);
    }
    processor.substitute_try_block_nodes(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inliner::{process_returns, InlineCodegen};
    use crate::insn::markers::non_local_return_marker;
    use crate::insn::opcodes::*;
    use crate::insn::{InsnList, MethodId, TryCatchBlock};
    use crate::lambda::{CapturedVar, LambdaInfo};
    use crate::smap::SmapAndMethodNode;

    struct PrintingFinally;

    impl SourceCompilerForInline for PrintingFinally {
        fn compile_inline_function(
            &self,
            _callee: &MethodId,
            _codegen: &mut InlineCodegen<'_>,
        ) -> anyhow::Result<Option<SmapAndMethodNode>> {
            Ok(None)
        }

        fn generate_lambda_body(
            &self,
            lambda: &LambdaInfo,
        ) -> anyhow::Result<(SmapAndMethodNode, Vec<CapturedVar>)> {
            anyhow::bail!("no body for {}", lambda.lambda_class)
        }

        fn has_finally_blocks(&self) -> bool {
            true
        }

        fn generate_finally_blocks(&self, request: &FinallyBlockRequest) -> anyhow::Result<Vec<Insn>> {
            Ok(vec![
                Insn::method(INVOKESTATIC, "a/Log", "done", "()V"),
                Insn::var(ISTORE, request.first_free_local),
            ])
        }
    }

    #[test]
    fn test_finally_code_is_cut_out_of_inner_try() {
        let (start, end, handler, done) = (
            LabelId::fresh(),
            LabelId::fresh(),
            LabelId::fresh(),
            LabelId::fresh(),
        );
        let mut node = MethodNode::new(ACC_STATIC, "f", "()V");
        node.instructions = InsnList::from(vec![
            Insn::Label(start),
            Insn::var(ILOAD, 3),
            Insn::var(ISTORE, 4),
            non_local_return_marker("caller"),
            Insn::Simple(RETURN),
            Insn::Label(end),
            Insn::Label(handler),
            Insn::Simple(ATHROW),
            Insn::Label(done),
        ]);
        node.try_catch_blocks
            .push(TryCatchBlock::new(start, end, handler, None));

        let points = process_returns(&mut node, &[], done);
        assert_eq!(points.len(), 1);
        generate_and_insert_finally_blocks(&mut node, &points, &PrintingFinally, 3).unwrap();

        let insns = node.instructions.to_vec();
        let call = insns
            .iter()
            .position(|insn| insn.is_method_call("a/Log", "done"))
            .unwrap();
        // temporaries go after every local seen so far
        assert_eq!(insns[call + 1], Insn::var(ISTORE, 5));

        assert_eq!(node.try_catch_blocks.len(), 2);
        let head = &node.try_catch_blocks[0];
        assert_eq!(head.start, start);
        let Insn::Label(cut) = insns[call - 1] else {
            panic!("expected the start label of the inserted code");
        };
        assert_eq!(head.end, cut);
        let tail = &node.try_catch_blocks[1];
        assert_eq!(tail.start, points[0].finally_interval_end);
        assert_eq!(tail.end, end);
    }

    #[test]
    fn test_nothing_without_finally_blocks() {
        struct NoFinally;
        impl SourceCompilerForInline for NoFinally {
            fn compile_inline_function(
                &self,
                _callee: &MethodId,
                _codegen: &mut InlineCodegen<'_>,
            ) -> anyhow::Result<Option<SmapAndMethodNode>> {
                Ok(None)
            }

            fn generate_lambda_body(
                &self,
                lambda: &LambdaInfo,
            ) -> anyhow::Result<(SmapAndMethodNode, Vec<CapturedVar>)> {
                anyhow::bail!("no body for {}", lambda.lambda_class)
            }
        }

        let end = LabelId::fresh();
        let mut node = MethodNode::new(ACC_STATIC, "f", "()V");
        node.instructions = InsnList::from(vec![
            non_local_return_marker("caller"),
            Insn::Simple(RETURN),
            Insn::Label(end),
        ]);
        let points = process_returns(&mut node, &[], end);
        let before = node.instructions.to_vec();
        generate_and_insert_finally_blocks(&mut node, &points, &NoFinally, 0).unwrap();
        assert_eq!(node.instructions.to_vec(), before);
    }
}
