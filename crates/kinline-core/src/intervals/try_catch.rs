use super::{Interval, SimpleInterval, SplittableInterval};
use crate::insn::{LabelId, LocalVariable, TryCatchBlock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlockNodeInfo {
    pub node: TryCatchBlock,
    /// Copied along with the code but never split.
    pub only_copy_not_process: bool,
}

impl TryCatchBlockNodeInfo {
    pub fn new(node: TryCatchBlock, only_copy_not_process: bool) -> Self {
        Self {
            node,
            only_copy_not_process,
        }
    }

    pub fn handler(&self) -> LabelId {
        self.node.handler
    }

    pub fn ty(&self) -> Option<&str> {
        self.node.ty.as_deref()
    }
}

impl Interval for TryCatchBlockNodeInfo {
    fn start_label(&self) -> LabelId {
        self.node.start
    }

    fn end_label(&self) -> LabelId {
        self.node.end
    }
}

impl SplittableInterval for TryCatchBlockNodeInfo {
    fn split(&mut self, split_by: &SimpleInterval, keep_start: bool) -> Self {
        let (start, end) = split_bounds(&mut self.node.start, &mut self.node.end, split_by, keep_start);
        TryCatchBlockNodeInfo::new(
            TryCatchBlock::new(start, end, self.node.handler, self.node.ty.clone()),
            self.only_copy_not_process,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVarNodeWrapper {
    pub node: LocalVariable,
}

impl LocalVarNodeWrapper {
    pub fn new(node: LocalVariable) -> Self {
        Self { node }
    }
}

impl Interval for LocalVarNodeWrapper {
    fn start_label(&self) -> LabelId {
        self.node.start
    }

    fn end_label(&self) -> LabelId {
        self.node.end
    }
}

impl SplittableInterval for LocalVarNodeWrapper {
    fn split(&mut self, split_by: &SimpleInterval, keep_start: bool) -> Self {
        let (start, end) = split_bounds(&mut self.node.start, &mut self.node.end, split_by, keep_start);
        LocalVarNodeWrapper::new(LocalVariable {
            start,
            end,
            ..self.node.clone()
        })
    }
}

/// Patches `start`/`end` in place and returns the bounds of the new part.
fn split_bounds(
    start: &mut LabelId,
    end: &mut LabelId,
    split_by: &SimpleInterval,
    keep_start: bool,
) -> (LabelId, LabelId) {
    if keep_start {
        let old_end = std::mem::replace(end, split_by.start);
        (split_by.end, old_end)
    } else {
        let old_start = std::mem::replace(start, split_by.end);
        (old_start, split_by.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keep_start() {
        let [s, e, s2, e2, h] = [(); 5].map(|_| LabelId::fresh());
        let mut info = TryCatchBlockNodeInfo::new(TryCatchBlock::new(s, e, h, None), false);
        let new = info.split(&SimpleInterval::new(s2, e2), true);
        assert_eq!((info.node.start, info.node.end), (s, s2));
        assert_eq!((new.node.start, new.node.end), (e2, e));
        assert_eq!(new.handler(), h);
    }

    #[test]
    fn test_split_keep_end() {
        let [s, e, s2, e2] = [(); 4].map(|_| LabelId::fresh());
        let mut local = LocalVarNodeWrapper::new(LocalVariable::new("x", "I", s, e, 3));
        let new = local.split(&SimpleInterval::new(s2, e2), false);
        assert_eq!((local.node.start, local.node.end), (e2, e));
        assert_eq!((new.node.start, new.node.end), (s, s2));
        assert_eq!(new.node.index, 3);
    }
}
