//! Source maps (JSR-045 SMAP) for inlined code.
//!
//! Every line number emitted into a class that received inlined code is an
//! index into that class's SMAP. The `Kotlin` stratum maps it back to a line
//! of the file the code came from; the `KotlinDebug` stratum records the
//! call site it was inlined at.

mod builder;
mod mapper;
mod parser;

pub use builder::SmapBuilder;
pub use mapper::{SourceInfo, SourceMapCopier, SourceMapper};
pub use parser::SmapParser;

use serde::{Deserialize, Serialize};

pub const KOTLIN_STRATA_NAME: &str = "Kotlin";
pub const KOTLIN_DEBUG_STRATA_NAME: &str = "KotlinDebug";

pub const FILE_SECTION: &str = "*F";
pub const LINE_SECTION: &str = "*L";
pub const STRATA_SECTION: &str = "*S";
pub const END: &str = "*E";

/// Line numbers reserved for synthetic markers; never remapped.
pub const SYNTHETIC_MARKER_LINES: std::ops::RangeInclusive<i32> = 65100..=65200;

/// A line in a particular source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: i32,
    pub file: String,
    pub path: String,
}

impl SourcePosition {
    pub fn new(line: i32, file: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            line,
            file: file.into(),
            path: path.into(),
        }
    }
}

/// `range` destination lines starting at `dest` map to source lines starting
/// at `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeMapping {
    pub source: i32,
    pub dest: i32,
    pub range: i32,
    pub call_site: Option<SourcePosition>,
}

impl RangeMapping {
    pub fn new(source: i32, dest: i32, range: i32, call_site: Option<SourcePosition>) -> Self {
        Self {
            source,
            dest,
            range,
            call_site,
        }
    }

    pub fn contains(&self, dest_line: i32) -> bool {
        self.dest <= dest_line && dest_line < self.dest + self.range
    }

    pub fn has_mapping_for_source(&self, source_line: i32) -> bool {
        self.source <= source_line && source_line < self.source + self.range
    }

    pub fn map_dest_to_source(&self, dest_line: i32) -> i32 {
        self.source + (dest_line - self.dest)
    }

    pub fn map_source_to_dest(&self, source_line: i32) -> i32 {
        self.dest + (source_line - self.source)
    }

    fn can_reuse_for(
        &self,
        new_source: i32,
        global_max_dest: i32,
        new_call_site: Option<&SourcePosition>,
    ) -> bool {
        let slack = if self.contains(global_max_dest) { 10 } else { 0 };
        let offset = new_source - self.source;
        self.call_site.as_ref() == new_call_site && offset >= 0 && offset < self.range + slack
    }
}

/// All ranges that map into one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    pub name: String,
    pub path: String,
    pub line_mappings: Vec<RangeMapping>,
}

impl FileMapping {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            line_mappings: Vec::new(),
        }
    }

    pub fn map_new_interval(
        &mut self,
        source: i32,
        dest: i32,
        range: i32,
        call_site: Option<SourcePosition>,
    ) -> &mut RangeMapping {
        self.line_mappings
            .push(RangeMapping::new(source, dest, range, call_site));
        let last = self.line_mappings.len() - 1;
        &mut self.line_mappings[last]
    }

    /// Maps `source` to a destination line, reusing (and if needed growing)
    /// the last or the first range when the call site matches, otherwise
    /// opening a new range right after `current_max`.
    pub fn map_new_line_number(
        &mut self,
        source: i32,
        current_max: i32,
        call_site: Option<&SourcePosition>,
    ) -> i32 {
        let reusable = match self.line_mappings.len() {
            0 => None,
            len if self.line_mappings[len - 1].can_reuse_for(source, current_max, call_site) => {
                Some(len - 1)
            }
            _ if self.line_mappings[0].can_reuse_for(source, current_max, call_site) => Some(0),
            _ => None,
        };
        let mapping = match reusable {
            Some(index) => &mut self.line_mappings[index],
            None => self.map_new_interval(source, current_max + 1, 1, call_site.cloned()),
        };
        mapping.range = mapping.range.max(source - mapping.source + 1);
        mapping.map_source_to_dest(source)
    }

    pub fn to_source_info(&self) -> SourceInfo {
        let lines = self
            .line_mappings
            .iter()
            .map(|m| m.source + m.range - 1)
            .max()
            .unwrap_or(0);
        SourceInfo::new(self.name.clone(), self.path.clone(), lines)
    }
}

/// A parsed source map with destination ranges indexed for lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smap {
    file_mappings: Vec<FileMapping>,
    /// (file index, range index), ordered by destination line.
    intervals: Vec<(usize, usize)>,
}

impl Smap {
    pub fn new(file_mappings: Vec<FileMapping>) -> Self {
        let mut intervals: Vec<(usize, usize)> = file_mappings
            .iter()
            .enumerate()
            .flat_map(|(f, file)| (0..file.line_mappings.len()).map(move |r| (f, r)))
            .collect();
        intervals.sort_by_key(|&(f, r)| file_mappings[f].line_mappings[r].dest);
        Self {
            file_mappings,
            intervals,
        }
    }

    pub fn file_mappings(&self) -> &[FileMapping] {
        &self.file_mappings
    }

    /// Range containing `dest_line` and the file it maps into. Destination
    /// ranges never overlap, so a binary search suffices.
    pub fn find_range(&self, dest_line: i32) -> Option<(&FileMapping, &RangeMapping)> {
        let index = self
            .intervals
            .binary_search_by(|&(f, r)| {
                let range = &self.file_mappings[f].line_mappings[r];
                if range.contains(dest_line) {
                    std::cmp::Ordering::Equal
                } else {
                    range.dest.cmp(&dest_line)
                }
            })
            .ok()?;
        let (f, r) = self.intervals[index];
        let file = &self.file_mappings[f];
        Some((file, &file.line_mappings[r]))
    }

    /// Original position of `dest_line`.
    pub fn source_position(&self, dest_line: i32) -> Option<SourcePosition> {
        let (file, range) = self.find_range(dest_line)?;
        Some(SourcePosition::new(
            range.map_dest_to_source(dest_line),
            file.name.clone(),
            file.path.clone(),
        ))
    }
}

/// A compiled body together with the source map its line numbers refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct SmapAndMethodNode {
    pub node: crate::insn::MethodNode,
    pub smap: Smap,
}

impl SmapAndMethodNode {
    pub fn new(node: crate::insn::MethodNode, smap: Smap) -> Self {
        Self { node, smap }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_mapping_bounds() {
        let range = RangeMapping::new(10, 1, 3, None);
        assert!(range.contains(1));
        assert!(range.contains(3));
        assert!(!range.contains(4));
        assert_eq!(range.map_dest_to_source(2), 11);
        assert_eq!(range.map_source_to_dest(12), 3);
        assert!(range.has_mapping_for_source(12));
    }

    #[test]
    fn test_new_line_number_reuses_last_range() {
        let mut file = FileMapping::new("A.kt", "a/A");
        assert_eq!(file.map_new_line_number(20, 30, None), 31);
        // the range ends at the current maximum, so it may grow by ten lines
        assert_eq!(file.map_new_line_number(25, 31, None), 36);
        assert_eq!(file.line_mappings.len(), 1);
        assert_eq!(file.line_mappings[0].range, 6);
    }

    #[test]
    fn test_call_site_mismatch_opens_new_range() {
        let site = SourcePosition::new(5, "B.kt", "b/B");
        let mut file = FileMapping::new("A.kt", "a/A");
        file.map_new_line_number(20, 30, None);
        assert_eq!(file.map_new_line_number(20, 31, Some(&site)), 32);
        assert_eq!(file.line_mappings.len(), 2);
        assert_eq!(file.line_mappings[1].call_site.as_ref(), Some(&site));
    }

    #[test]
    fn test_find_range_binary_search() {
        let mut a = FileMapping::new("A.kt", "a/A");
        a.map_new_interval(1, 1, 10, None);
        let mut b = FileMapping::new("B.kt", "b/B");
        b.map_new_interval(40, 11, 2, None);
        b.map_new_interval(7, 20, 1, None);
        let smap = Smap::new(vec![a, b]);

        let (file, range) = smap.find_range(12).unwrap();
        assert_eq!(file.name, "B.kt");
        assert_eq!(range.map_dest_to_source(12), 41);
        assert_eq!(smap.source_position(20).unwrap().line, 7);
        assert!(smap.find_range(15).is_none());
        assert!(smap.find_range(0).is_none());
    }
}
