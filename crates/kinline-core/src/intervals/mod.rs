//! Regions of a method body (try/catch blocks, local variable ranges) and
//! the bookkeeping needed to split them around spliced code.

mod meta_info;
mod processor;
mod try_catch;

pub use meta_info::{IntervalId, IntervalMetaInfo};
pub use processor::CoveringTryCatchNodeProcessor;
pub use try_catch::{LocalVarNodeWrapper, TryCatchBlockNodeInfo};

use crate::errors::{InlineError, Result};
use crate::insn::{InsnList, LabelId};

/// A span between two labels.
pub trait Interval {
    fn start_label(&self) -> LabelId;
    fn end_label(&self) -> LabelId;

    fn is_empty(&self) -> bool {
        self.start_label() == self.end_label()
    }

    /// Start must not come after end.
    fn verify(&self, list: &InsnList) -> Result<()> {
        let start = label_index(list, self.start_label());
        let end = label_index(list, self.end_label());
        match (start, end) {
            (Some(start), Some(end)) if start <= end => Ok(()),
            _ => Err(InlineError::internal(format!(
                "Wrong interval structure: {}..{} ({start:?} > {end:?})",
                self.start_label(),
                self.end_label()
            ))),
        }
    }
}

/// An interval that can be cut around a nested one.
pub trait SplittableInterval: Interval + Sized {
    /// Cuts `split_by` out of `self`. With `keep_start` `self` keeps its
    /// start and ends where `split_by` starts, and the returned part covers
    /// the rest after `split_by`; otherwise the other way round.
    fn split(&mut self, split_by: &SimpleInterval, keep_start: bool) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleInterval {
    pub start: LabelId,
    pub end: LabelId,
}

impl SimpleInterval {
    pub fn new(start: LabelId, end: LabelId) -> Self {
        Self { start, end }
    }
}

impl Interval for SimpleInterval {
    fn start_label(&self) -> LabelId {
        self.start
    }

    fn end_label(&self) -> LabelId {
        self.end
    }
}

/// Result of [`IntervalMetaInfo::split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPair {
    pub patched_part: IntervalId,
    pub new_part: IntervalId,
}

/// Position of the definition of `label` in `list`.
pub fn label_index(list: &InsnList, label: LabelId) -> Option<usize> {
    list.find_label(label).map(|id| list.index_of(id))
}

/// True when nothing but labels, line numbers and `NOP`s lies between the
/// two labels, scanning back from `end`.
pub fn is_meaningless_interval(list: &InsnList, start: LabelId, end: LabelId) -> bool {
    let Some(mut cursor) = list.find_label(end) else {
        return false;
    };
    loop {
        let insn = list.get(cursor);
        if insn.as_label() == Some(start) {
            return true;
        }
        if insn.is_meaningful() {
            return false;
        }
        match list.prev(cursor) {
            Some(prev) => cursor = prev,
            None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::opcodes::*;
    use crate::insn::Insn;

    #[test]
    fn test_meaningless_interval() {
        let (a, b, c) = (LabelId::fresh(), LabelId::fresh(), LabelId::fresh());
        let list = InsnList::from(vec![
            Insn::Label(a),
            Insn::LineNumber { line: 3, start: a },
            Insn::Simple(NOP),
            Insn::Label(b),
            Insn::Simple(ICONST_0),
            Insn::Label(c),
        ]);
        assert!(is_meaningless_interval(&list, a, b));
        assert!(is_meaningless_interval(&list, a, a));
        assert!(!is_meaningless_interval(&list, a, c));
        assert!(!is_meaningless_interval(&list, b, c));
    }

    #[test]
    fn test_verify_order() {
        let (a, b) = (LabelId::fresh(), LabelId::fresh());
        let list = InsnList::from(vec![Insn::Label(a), Insn::Simple(NOP), Insn::Label(b)]);
        assert!(SimpleInterval::new(a, b).verify(&list).is_ok());
        assert!(SimpleInterval::new(b, a).verify(&list).is_err());
        assert!(SimpleInterval::new(a, LabelId::fresh()).verify(&list).is_err());
    }
}
