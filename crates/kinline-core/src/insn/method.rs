use crate::errors::Result;
use crate::insn::list::{Insn, InsnList, LabelId};
use crate::insn::opcodes::*;
use crate::insn::types::{parse_method_descriptor, AsmType};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryCatchBlock {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    /// Internal name of the caught exception, `None` for `finally` handlers.
    pub ty: Option<String>,
}

impl TryCatchBlock {
    pub fn new(start: LabelId, end: LabelId, handler: LabelId, ty: Option<String>) -> Self {
        Self {
            start,
            end,
            handler,
            ty,
        }
    }
}

/// Entry of the local variable debug table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVariable {
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    pub start: LabelId,
    pub end: LabelId,
    pub index: usize,
}

impl LocalVariable {
    pub fn new(
        name: impl Into<String>,
        desc: impl Into<String>,
        start: LabelId,
        end: LabelId,
        index: usize,
    ) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            signature: None,
            start,
            end,
            index,
        }
    }
}

/// Owner, name and descriptor of a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

impl MethodId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.desc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodNode {
    pub access: u32,
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    pub exceptions: Vec<String>,
    pub instructions: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    pub local_variables: Vec<LocalVariable>,
    pub max_stack: usize,
    pub max_locals: usize,
}

impl MethodNode {
    pub fn new(access: u32, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            signature: None,
            exceptions: Vec::new(),
            instructions: InsnList::new(),
            try_catch_blocks: Vec::new(),
            local_variables: Vec::new(),
            max_stack: 0,
            max_locals: 0,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    pub fn argument_types(&self) -> Result<Vec<AsmType>> {
        Ok(parse_method_descriptor(&self.desc)?.0)
    }

    pub fn return_type(&self) -> Result<AsmType> {
        Ok(parse_method_descriptor(&self.desc)?.1)
    }

    /// Slots taken by the receiver and the declared arguments.
    pub fn args_size(&self) -> Result<usize> {
        let receiver = if self.is_static() { 0 } else { 1 };
        Ok(receiver + self.argument_types()?.iter().map(AsmType::size).sum::<usize>())
    }

    /// Redirects every reference to `from` (instructions, try/catch blocks and
    /// local variable ranges) to `to`.
    pub fn chain_label(&mut self, from: LabelId, to: LabelId) {
        self.instructions.chain_label(from, to);
        let redirect = |label: &mut LabelId| {
            if *label == from {
                *label = to;
            }
        };
        for block in &mut self.try_catch_blocks {
            redirect(&mut block.start);
            redirect(&mut block.end);
            redirect(&mut block.handler);
        }
        for local in &mut self.local_variables {
            redirect(&mut local.start);
            redirect(&mut local.end);
        }
    }

    /// Gives every label of the method a fresh identity, so two copies of
    /// the same body never share labels.
    pub fn refresh_labels(&mut self) {
        let mut fresh: FxHashMap<LabelId, LabelId> = FxHashMap::default();
        let mut map = |label: LabelId| *fresh.entry(label).or_insert_with(LabelId::fresh);
        for id in self.instructions.ids() {
            self.instructions.get_mut(id).map_labels(&mut map);
        }
        for block in &mut self.try_catch_blocks {
            block.start = map(block.start);
            block.end = map(block.end);
            block.handler = map(block.handler);
        }
        for local in &mut self.local_variables {
            local.start = map(local.start);
            local.end = map(local.end);
        }
    }

    /// Highest local slot touched by the body (plus its width), never below
    /// the argument area.
    pub fn compute_max_locals(&self) -> Result<usize> {
        let mut max = self.args_size()?;
        for (_, insn) in self.instructions.iter() {
            let end = match insn {
                Insn::Var { opcode, var } => var + AsmType::for_var_opcode(*opcode).size(),
                Insn::Iinc { var, .. } => var + 1,
                _ => continue,
            };
            max = max.max(end);
        }
        Ok(max)
    }

    /// Line numbers present in the body, in order.
    pub fn line_numbers(&self) -> impl Iterator<Item = i32> + '_ {
        self.instructions.iter().filter_map(|(_, insn)| match insn {
            Insn::LineNumber { line, .. } => Some(*line),
            _ => None,
        })
    }

    /// Smallest and largest line number of the body.
    pub fn line_number_range(&self) -> Option<(i32, i32)> {
        let mut lines = self.line_numbers().filter(|line| *line > 0).peekable();
        lines.peek()?;
        let (min, max) = lines.fold((i32::MAX, i32::MIN), |(min, max), line| {
            (min.min(line), max.max(line))
        });
        Some((min, max))
    }

    /// Readable dump used in error messages.
    pub fn node_text(&self) -> String {
        let mut text = format!("{}{}\n", self.name, self.desc);
        for (_, insn) in self.instructions.iter() {
            text.push_str("    ");
            text.push_str(&insn.to_string());
            text.push('\n');
        }
        text
    }
}

/// Line range covered by several methods, `(0, 0)` when none has lines.
pub fn line_number_range<'a>(methods: impl IntoIterator<Item = &'a MethodNode>) -> (i32, i32) {
    methods
        .into_iter()
        .filter_map(MethodNode::line_number_range)
        .reduce(|(a_min, a_max), (b_min, b_max)| (a_min.min(b_min), a_max.max(b_max)))
        .unwrap_or((0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method_with_locals() -> MethodNode {
        let start = LabelId::fresh();
        let end = LabelId::fresh();
        let mut method = MethodNode::new(ACC_STATIC, "foo", "(IJ)V");
        method.instructions = vec![
            Insn::Label(start),
            Insn::LineNumber { line: 12, start },
            Insn::var(LLOAD, 1),
            Insn::var(LSTORE, 4),
            Insn::LineNumber { line: 14, start },
            Insn::Simple(RETURN),
            Insn::Label(end),
        ]
        .into();
        method
            .local_variables
            .push(LocalVariable::new("x", "J", start, end, 4));
        method
    }

    #[test]
    fn test_args_size_and_max_locals() {
        let method = method_with_locals();
        assert_eq!(method.args_size().unwrap(), 3);
        assert_eq!(method.compute_max_locals().unwrap(), 6);
    }

    #[test]
    fn test_line_number_range() {
        let method = method_with_locals();
        assert_eq!(method.line_number_range(), Some((12, 14)));
        assert_eq!(line_number_range([&method]), (12, 14));
        assert_eq!(line_number_range(std::iter::empty()), (0, 0));
    }

    #[test]
    fn test_refresh_labels_keeps_structure() {
        let mut method = method_with_locals();
        let old_start = method.local_variables[0].start;
        method.refresh_labels();
        let new_start = method.local_variables[0].start;
        assert_ne!(old_start, new_start);
        assert_eq!(method.instructions.to_vec()[0], Insn::Label(new_start));
        assert_eq!(
            method.instructions.to_vec()[1],
            Insn::LineNumber {
                line: 12,
                start: new_start
            }
        );
    }

    #[test]
    fn test_chain_label_updates_tables() {
        let mut method = method_with_locals();
        let start = method.local_variables[0].start;
        let target = LabelId::fresh();
        method.try_catch_blocks.push(TryCatchBlock::new(start, start, start, None));
        method.chain_label(start, target);
        assert_eq!(method.local_variables[0].start, target);
        assert_eq!(method.try_catch_blocks[0].handler, target);
    }
}
