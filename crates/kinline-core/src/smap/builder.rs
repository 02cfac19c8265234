use super::{
    FileMapping, RangeMapping, END, FILE_SECTION, KOTLIN_DEBUG_STRATA_NAME, KOTLIN_STRATA_NAME,
    LINE_SECTION, STRATA_SECTION,
};
use indexmap::IndexMap;

/// Writes the SMAP text for a class.
///
/// Older readers expect `*E` between strata and read `1#2,3:4` in the debug
/// stratum as "lines 4..6 map to line 1"; `backwards_compatible_syntax`
/// reproduces that format. The correct form of that entry is `1#2:4,3`.
pub struct SmapBuilder<'a> {
    source: &'a str,
    path: &'a str,
    file_mappings: &'a [FileMapping],
    backwards_compatible_syntax: bool,
}

impl<'a> SmapBuilder<'a> {
    pub fn new(
        source: &'a str,
        path: &'a str,
        file_mappings: &'a [FileMapping],
        backwards_compatible_syntax: bool,
    ) -> Self {
        Self {
            source,
            path,
            file_mappings,
            backwards_compatible_syntax,
        }
    }

    pub fn path(&self) -> &str {
        self.path
    }

    /// `None` when no file has any mapping.
    pub fn build(&self) -> Option<String> {
        let real: Vec<&FileMapping> = self
            .file_mappings
            .iter()
            .filter(|file| !file.line_mappings.is_empty())
            .collect();
        if real.is_empty() {
            return None;
        }

        let mut debug_mappings: IndexMap<(String, String), FileMapping> = IndexMap::new();
        for file in &real {
            for mapping in &file.line_mappings {
                if let Some(site) = &mapping.call_site {
                    debug_mappings
                        .entry((site.file.clone(), site.path.clone()))
                        .or_insert_with(|| FileMapping::new(&site.file, &site.path))
                        .map_new_interval(site.line, mapping.dest, mapping.range, None);
                }
            }
        }

        let header = format!("SMAP\n{}\n{KOTLIN_STRATA_NAME}", self.source);
        let default_strata = to_stratum(real.iter().copied(), KOTLIN_STRATA_NAME, false);
        let debug_strata = to_stratum(
            debug_mappings.values(),
            KOTLIN_DEBUG_STRATA_NAME,
            !self.backwards_compatible_syntax,
        );
        if self.backwards_compatible_syntax && !default_strata.is_empty() && !debug_strata.is_empty()
        {
            return Some(format!("{header}\n{default_strata}{END}\n{debug_strata}{END}\n"));
        }
        Some(format!("{header}\n{default_strata}{debug_strata}{END}\n"))
    }
}

fn to_stratum<'f>(
    files: impl ExactSizeIterator<Item = &'f FileMapping> + Clone,
    name: &str,
    map_to_first_line: bool,
) -> String {
    if files.len() == 0 {
        return String::new();
    }
    let mut out = format!("{STRATA_SECTION} {name}\n{FILE_SECTION}\n");
    // `+ <id> <name>` announces the path line that follows
    for (index, file) in files.clone().enumerate() {
        out.push_str(&format!("+ {} {}\n{}\n", index + 1, file.name, file.path));
    }
    out.push_str(LINE_SECTION);
    out.push('\n');
    for (index, file) in files.enumerate() {
        for mapping in &file.line_mappings {
            out.push_str(&range_entry(mapping, index + 1, map_to_first_line));
        }
    }
    out
}

fn range_entry(mapping: &RangeMapping, file_id: usize, one_line: bool) -> String {
    let RangeMapping {
        source,
        dest,
        range,
        ..
    } = mapping;
    if *range == 1 {
        format!("{source}#{file_id}:{dest}\n")
    } else if one_line {
        format!("{source}#{file_id}:{dest},{range}\n")
    } else {
        format!("{source}#{file_id},{range}:{dest}\n")
    }
}
