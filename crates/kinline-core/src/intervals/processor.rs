use super::{label_index, IntervalMetaInfo, LocalVarNodeWrapper, TryCatchBlockNodeInfo};
use crate::errors::{InlineError, Result};
use crate::insn::{AsmType, Insn, InsnList, LabelId, MethodNode};

/// Walks a method body while keeping track of which try/catch blocks and
/// local variable ranges cover the current instruction, and of the first
/// local slot nothing seen so far uses.
#[derive(Debug, Clone)]
pub struct CoveringTryCatchNodeProcessor {
    pub try_blocks: IntervalMetaInfo<TryCatchBlockNodeInfo>,
    pub local_vars: IntervalMetaInfo<LocalVarNodeWrapper>,
    next_free_local_index: usize,
}

impl CoveringTryCatchNodeProcessor {
    pub fn new(parameter_size: usize) -> Self {
        Self {
            try_blocks: IntervalMetaInfo::new(),
            local_vars: IntervalMetaInfo::new(),
            next_free_local_index: parameter_size,
        }
    }

    /// Registers every try/catch block and local variable of `method`.
    pub fn for_method(method: &MethodNode, parameter_size: usize) -> Result<Self> {
        let mut processor = Self::new(parameter_size);
        for block in &method.try_catch_blocks {
            processor.try_blocks.add_new_interval(
                TryCatchBlockNodeInfo::new(block.clone(), false),
                &method.instructions,
            )?;
        }
        for local in &method.local_variables {
            processor
                .local_vars
                .add_new_interval(LocalVarNodeWrapper::new(local.clone()), &method.instructions)?;
        }
        Ok(processor)
    }

    pub fn next_free_local_index(&self) -> usize {
        self.next_free_local_index
    }

    pub fn process_instruction(&mut self, insn: &Insn, direct_order: bool) -> Result<()> {
        match insn {
            Insn::Var { opcode, var } => {
                let end = var + AsmType::for_var_opcode(*opcode).size();
                self.next_free_local_index = self.next_free_local_index.max(end);
            }
            Insn::Iinc { var, .. } => {
                self.next_free_local_index = self.next_free_local_index.max(var + 1);
            }
            Insn::Label(label) => {
                self.try_blocks.process_current(*label, direct_order)?;
                self.local_vars.process_current(*label, direct_order)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn start_nodes(&self, label: LabelId) -> Vec<&TryCatchBlockNodeInfo> {
        self.try_blocks
            .interval(label, true)
            .iter()
            .map(|id| self.try_blocks.get(*id))
            .collect()
    }

    pub fn end_nodes(&self, label: LabelId) -> Vec<&TryCatchBlockNodeInfo> {
        self.try_blocks
            .interval(label, false)
            .iter()
            .map(|id| self.try_blocks.get(*id))
            .collect()
    }

    /// Orders blocks by handler position, then by start position. Two
    /// distinct blocks sharing both are a multi-catch `finally`, which is
    /// not supported.
    pub fn sort_try_catch_blocks(
        list: &InsnList,
        mut blocks: Vec<TryCatchBlockNodeInfo>,
    ) -> Result<Vec<TryCatchBlockNodeInfo>> {
        let mut keyed = Vec::with_capacity(blocks.len());
        for (position, block) in blocks.drain(..).enumerate() {
            let handler = index_of(list, block.handler())?;
            let start = index_of(list, block.node.start)?;
            keyed.push(((handler, start), position, block));
        }
        keyed.sort_by_key(|(key, position, _)| (*key, *position));
        for pair in keyed.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(InlineError::internal(format!(
                    "Error: support multicatch finallies: {}, {}",
                    pair[0].2.handler(),
                    pair[1].2.handler()
                )));
            }
        }
        Ok(keyed.into_iter().map(|(_, _, block)| block).collect())
    }

    pub fn non_empty_try_catch_blocks(&self, list: &InsnList) -> Vec<&TryCatchBlockNodeInfo> {
        self.try_blocks.meaningful_intervals(list)
    }

    pub fn non_empty_local_vars(&self, list: &InsnList) -> Vec<&LocalVarNodeWrapper> {
        self.local_vars.meaningful_intervals(list)
    }

    /// Replaces the try/catch table of `method` with the sorted meaningful
    /// blocks known to this processor.
    pub fn substitute_try_block_nodes(&self, method: &mut MethodNode) -> Result<()> {
        let meaningful = self
            .non_empty_try_catch_blocks(&method.instructions)
            .into_iter()
            .cloned()
            .collect();
        let sorted = Self::sort_try_catch_blocks(&method.instructions, meaningful)?;
        method.try_catch_blocks = sorted.into_iter().map(|info| info.node).collect();
        Ok(())
    }

    pub fn substitute_local_var_table(&self, method: &mut MethodNode) {
        method.local_variables = self
            .non_empty_local_vars(&method.instructions)
            .into_iter()
            .map(|wrapper| wrapper.node.clone())
            .collect();
    }
}

fn index_of(list: &InsnList, label: LabelId) -> Result<usize> {
    label_index(list, label)
        .ok_or_else(|| InlineError::internal(format!("Label {label} is not in the method body")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::opcodes::*;
    use crate::insn::{LocalVariable, TryCatchBlock};

    fn labels<const N: usize>() -> [LabelId; N] {
        [(); N].map(|_| LabelId::fresh())
    }

    #[test]
    fn test_sort_by_handler_then_start() {
        let [s1, s2, e, h1, h2] = labels();
        let list = InsnList::from(vec![
            Insn::Label(s1),
            Insn::Simple(NOP),
            Insn::Label(s2),
            Insn::Simple(ICONST_0),
            Insn::Label(e),
            Insn::Label(h1),
            Insn::Label(h2),
        ]);
        let blocks = vec![
            TryCatchBlockNodeInfo::new(TryCatchBlock::new(s1, e, h2, None), false),
            TryCatchBlockNodeInfo::new(TryCatchBlock::new(s2, e, h1, None), false),
            TryCatchBlockNodeInfo::new(TryCatchBlock::new(s1, e, h1, None), false),
        ];
        let sorted = CoveringTryCatchNodeProcessor::sort_try_catch_blocks(&list, blocks).unwrap();
        let order: Vec<_> = sorted.iter().map(|b| (b.node.start, b.handler())).collect();
        assert_eq!(order, vec![(s1, h1), (s2, h1), (s1, h2)]);
    }

    #[test]
    fn test_multicatch_tie_is_internal_error() {
        let [s, e, e2, h] = labels();
        let list = InsnList::from(vec![
            Insn::Label(s),
            Insn::Simple(ICONST_0),
            Insn::Label(e),
            Insn::Simple(ICONST_1),
            Insn::Label(e2),
            Insn::Label(h),
        ]);
        let blocks = vec![
            TryCatchBlockNodeInfo::new(TryCatchBlock::new(s, e, h, None), false),
            TryCatchBlockNodeInfo::new(TryCatchBlock::new(s, e2, h, None), false),
        ];
        let err = CoveringTryCatchNodeProcessor::sort_try_catch_blocks(&list, blocks).unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("multicatch"));
    }

    #[test]
    fn test_next_free_local_index() {
        let mut processor = CoveringTryCatchNodeProcessor::new(2);
        processor
            .process_instruction(&Insn::var(LSTORE, 3), true)
            .unwrap();
        assert_eq!(processor.next_free_local_index(), 5);
        processor
            .process_instruction(&Insn::Iinc { var: 7, incr: 1 }, true)
            .unwrap();
        assert_eq!(processor.next_free_local_index(), 8);
        processor.process_instruction(&Insn::var(ILOAD, 0), true).unwrap();
        assert_eq!(processor.next_free_local_index(), 8);
    }

    #[test]
    fn test_substitute_tables_drop_meaningless() {
        let [s, m, e, h] = labels();
        let mut method = MethodNode::new(ACC_STATIC, "f", "()V");
        method.instructions = InsnList::from(vec![
            Insn::Label(s),
            Insn::Simple(NOP),
            Insn::Label(m),
            Insn::Simple(ICONST_0),
            Insn::Simple(POP),
            Insn::Label(e),
            Insn::Label(h),
            Insn::Simple(RETURN),
        ]);
        method.try_catch_blocks = vec![
            TryCatchBlock::new(s, m, h, None),
            TryCatchBlock::new(m, e, h, Some("java/lang/Exception".into())),
        ];
        method.local_variables = vec![
            LocalVariable::new("a", "I", s, m, 0),
            LocalVariable::new("b", "I", s, e, 1),
        ];
        let processor = CoveringTryCatchNodeProcessor::for_method(&method, 0).unwrap();
        processor.substitute_try_block_nodes(&mut method).unwrap();
        processor.substitute_local_var_table(&mut method);
        assert_eq!(method.try_catch_blocks.len(), 1);
        assert_eq!(method.try_catch_blocks[0].start, m);
        assert_eq!(method.local_variables.len(), 1);
        assert_eq!(method.local_variables[0].name, "b");
    }
}
