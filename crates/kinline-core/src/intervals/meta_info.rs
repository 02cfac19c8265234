use super::{is_meaningless_interval, SimpleInterval, SplitPair, SplittableInterval};
use crate::errors::{InlineError, Result};
use crate::insn::{InsnList, LabelId};
use indexmap::IndexSet;
use rustc_hash::FxHashMap;

/// Index into [`IntervalMetaInfo::all`].
pub type IntervalId = usize;

/// Every interval of one kind in a method, indexed by the labels that open
/// and close them, plus the set of intervals open at the scan position.
#[derive(Debug, Clone)]
pub struct IntervalMetaInfo<T> {
    starts: FxHashMap<LabelId, Vec<IntervalId>>,
    ends: FxHashMap<LabelId, Vec<IntervalId>>,
    all: Vec<T>,
    current: IndexSet<IntervalId>,
}

impl<T> Default for IntervalMetaInfo<T> {
    fn default() -> Self {
        Self {
            starts: FxHashMap::default(),
            ends: FxHashMap::default(),
            all: Vec::new(),
            current: IndexSet::new(),
        }
    }
}

impl<T: SplittableInterval> IntervalMetaInfo<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_new_interval(&mut self, info: T, list: &InsnList) -> Result<IntervalId> {
        info.verify(list)?;
        let id = self.all.len();
        self.starts.entry(info.start_label()).or_default().push(id);
        self.ends.entry(info.end_label()).or_default().push(id);
        self.all.push(info);
        Ok(id)
    }

    pub fn get(&self, id: IntervalId) -> &T {
        &self.all[id]
    }

    pub fn all(&self) -> &[T] {
        &self.all
    }

    pub fn into_all(self) -> Vec<T> {
        self.all
    }

    pub fn current(&self) -> impl Iterator<Item = &T> + '_ {
        self.current.iter().map(|id| &self.all[*id])
    }

    pub fn current_ids(&self) -> impl Iterator<Item = IntervalId> + '_ {
        self.current.iter().copied()
    }

    /// Intervals opened (`is_open`) or closed by `label`.
    pub fn interval(&self, label: LabelId, is_open: bool) -> &[IntervalId] {
        let map = if is_open { &self.starts } else { &self.ends };
        map.get(&label).map_or(&[], Vec::as_slice)
    }

    /// Updates the open set when the scan crosses `label`. In reverse order
    /// ends open intervals and starts close them.
    pub fn process_current(&mut self, label: LabelId, direct_order: bool) -> Result<()> {
        let opened = self.interval(label, direct_order).to_vec();
        for id in opened {
            if !self.current.insert(id) {
                return Err(InlineError::internal(format!(
                    "Wrong interval structure: {label} opens interval {id} twice"
                )));
            }
        }
        let closed = self.interval(label, !direct_order).to_vec();
        for id in closed {
            if !self.current.shift_remove(&id) {
                return Err(InlineError::internal(format!(
                    "Wrong interval structure: {label} closes interval {id} that is not open"
                )));
            }
        }
        Ok(())
    }

    pub fn split(
        &mut self,
        id: IntervalId,
        by: &SimpleInterval,
        keep_start: bool,
        list: &InsnList,
    ) -> Result<SplitPair> {
        let new_part = self.all[id].split(by, keep_start);
        if keep_start {
            let old_end = new_part.end_label();
            let patched_end = self.all[id].end_label();
            move_label(&mut self.ends, old_end, patched_end, id);
        } else {
            let old_start = new_part.start_label();
            let patched_start = self.all[id].start_label();
            move_label(&mut self.starts, old_start, patched_start, id);
        }
        self.all[id].verify(list)?;
        let new_id = self.add_new_interval(new_part, list)?;
        Ok(SplitPair {
            patched_part: id,
            new_part: new_id,
        })
    }

    pub fn split_current_intervals(
        &mut self,
        by: &SimpleInterval,
        keep_start: bool,
        list: &InsnList,
    ) -> Result<Vec<SplitPair>> {
        let current: Vec<_> = self.current.iter().copied().collect();
        current
            .into_iter()
            .map(|id| self.split(id, by, keep_start, list))
            .collect()
    }

    /// Cuts `by` out of every open interval. The heads end before `by` and
    /// are no longer open; the tails open after it.
    pub fn split_and_remove_intervals_from_currents(
        &mut self,
        by: &SimpleInterval,
        list: &InsnList,
    ) -> Result<()> {
        for pair in self.split_current_intervals(by, true, list)? {
            self.current.shift_remove(&pair.patched_part);
        }
        Ok(())
    }

    /// Intervals covering at least one meaningful instruction.
    pub fn meaningful_intervals(&self, list: &InsnList) -> Vec<&T> {
        self.all
            .iter()
            .filter(|it| !is_meaningless_interval(list, it.start_label(), it.end_label()))
            .collect()
    }

    pub fn meaningful_ids(&self, list: &InsnList) -> Vec<IntervalId> {
        (0..self.all.len())
            .filter(|id| {
                let it = &self.all[*id];
                !is_meaningless_interval(list, it.start_label(), it.end_label())
            })
            .collect()
    }
}

fn move_label(
    map: &mut FxHashMap<LabelId, Vec<IntervalId>>,
    old: LabelId,
    new: LabelId,
    id: IntervalId,
) {
    if let Some(ids) = map.get_mut(&old) {
        ids.retain(|it| *it != id);
    }
    map.entry(new).or_default().push(id);
}
