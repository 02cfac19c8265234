use super::{FileMapping, RangeMapping, Smap, SourcePosition, SYNTHETIC_MARKER_LINES};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

const FAKE_FILE_NAME: &str = "fake.kt";
const FAKE_PATH: &str = "kotlin/jvm/internal/FakeKt";

/// The source file a class was compiled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub file_name: String,
    pub path: String,
    pub lines_in_file: i32,
}

impl SourceInfo {
    pub fn new(file_name: impl Into<String>, path: impl Into<String>, lines_in_file: i32) -> Self {
        Self {
            file_name: file_name.into(),
            path: path.into(),
            lines_in_file,
        }
    }
}

/// Accumulates the line mappings of one output class.
///
/// Lines of the class's own source file map onto themselves; everything
/// inlined from elsewhere is allocated after the last line of that file.
#[derive(Debug, Clone)]
pub struct SourceMapper {
    source_info: Option<SourceInfo>,
    max_used: i32,
    file_mappings: IndexMap<(String, String), FileMapping>,
}

impl SourceMapper {
    pub fn new(source_info: Option<SourceInfo>) -> Self {
        let mut mapper = Self {
            max_used: source_info.as_ref().map_or(0, |info| info.lines_in_file),
            source_info,
            file_mappings: IndexMap::new(),
        };
        if let Some(info) = mapper.source_info.clone() {
            mapper
                .file_mapping(&info.file_name, &info.path)
                .map_new_interval(1, 1, info.lines_in_file, None);
        }
        mapper
    }

    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.source_info.as_ref()
    }

    fn file_mapping(&mut self, name: &str, path: &str) -> &mut FileMapping {
        self.file_mappings
            .entry((name.to_string(), path.to_string()))
            .or_insert_with(|| FileMapping::new(name, path))
    }

    pub fn map_line_number(
        &mut self,
        position: &SourcePosition,
        call_site: Option<&SourcePosition>,
    ) -> i32 {
        let current_max = self.max_used;
        let mapped = self
            .file_mapping(&position.file, &position.path)
            .map_new_line_number(position.line, current_max, call_site);
        self.max_used = self.max_used.max(mapped);
        mapped
    }

    /// Maps a marker line that has no real source into a fake file.
    pub fn map_synthetic_line_number(&mut self, id: i32) -> i32 {
        self.map_line_number(&SourcePosition::new(id, FAKE_FILE_NAME, FAKE_PATH), None)
    }

    /// No line was mapped beyond the class's own source file.
    pub fn is_trivial(&self) -> bool {
        let lines = self.source_info.as_ref().map_or(0, |info| info.lines_in_file);
        self.max_used == 0 || self.max_used == lines
    }

    pub fn max_used(&self) -> i32 {
        self.max_used
    }

    pub fn result_mappings(&self) -> Vec<FileMapping> {
        self.file_mappings.values().cloned().collect()
    }
}

/// Copies the lines of one inlined body into a parent [`SourceMapper`].
#[derive(Debug, Clone)]
pub struct SourceMapCopier {
    smap: Smap,
    call_site: Option<SourcePosition>,
    visited: FxHashMap<i32, i32>,
    last_range: Option<(SourcePosition, RangeMapping)>,
}

impl SourceMapCopier {
    /// With `call_site` set every copied line records it; otherwise the call
    /// site already attached to the callee's range is kept.
    pub fn new(smap: Smap, call_site: Option<SourcePosition>) -> Self {
        Self {
            smap,
            call_site,
            visited: FxHashMap::default(),
            last_range: None,
        }
    }

    pub fn smap(&self) -> &Smap {
        &self.smap
    }

    pub fn call_site(&self) -> Option<&SourcePosition> {
        self.call_site.as_ref()
    }

    /// `-1` when the callee's SMAP has no range for `line`.
    pub fn map_line_number(&mut self, parent: &mut SourceMapper, line: i32) -> i32 {
        if SYNTHETIC_MARKER_LINES.contains(&line) {
            return line;
        }
        if let Some(&mapped) = self.visited.get(&line) {
            return mapped;
        }

        let reuse_last = self
            .last_range
            .as_ref()
            .is_some_and(|(_, range)| range.contains(line));
        if !reuse_last {
            let Some((file, range)) = self.smap.find_range(line) else {
                return -1;
            };
            // only the file identity of the position is used
            let file = SourcePosition::new(0, file.name.clone(), file.path.clone());
            self.last_range = Some((file, range.clone()));
        }
        let Some((file, range)) = self.last_range.as_ref() else {
            return -1;
        };

        let position = SourcePosition::new(
            range.map_dest_to_source(line),
            file.file.clone(),
            file.path.clone(),
        );
        let call_site = self.call_site.as_ref().or(range.call_site.as_ref());
        let mapped = parent.map_line_number(&position, call_site);
        self.visited.insert(line, mapped);
        mapped
    }
}
