use super::{
    FileMapping, Smap, SourcePosition, FILE_SECTION, KOTLIN_DEBUG_STRATA_NAME, KOTLIN_STRATA_NAME,
    LINE_SECTION, STRATA_SECTION,
};
use indexmap::IndexMap;
use tracing::debug;

pub struct SmapParser;

impl SmapParser {
    /// Parses `mapping_info`, or falls back to a single mapping of
    /// `[start_line, end_line]` of `source` onto itself.
    pub fn parse_or_create_default(
        mapping_info: Option<&str>,
        source: Option<&str>,
        path: &str,
        start_line: i32,
        end_line: i32,
    ) -> Smap {
        if let Some(info) = mapping_info.filter(|info| !info.is_empty()) {
            if let Some(smap) = Self::parse_or_none(info) {
                return smap;
            }
            debug!(path, "unparsable SMAP, using the default mapping");
        }
        let Some(source) = source.filter(|s| !s.is_empty()) else {
            return Smap::new(Vec::new());
        };
        if start_line > end_line {
            return Smap::new(Vec::new());
        }
        let mut mapping = FileMapping::new(source, path);
        mapping.map_new_interval(start_line, start_line, end_line - start_line + 1, None);
        Smap::new(vec![mapping])
    }

    /// Parses the `Kotlin` stratum, taking call sites from `KotlinDebug`.
    pub fn parse_or_none(mapping_info: &str) -> Option<Smap> {
        let call_sites = parse_stratum(mapping_info, KOTLIN_DEBUG_STRATA_NAME, None);
        parse_stratum(mapping_info, KOTLIN_STRATA_NAME, call_sites.as_ref())
    }

    pub fn parse(mapping_info: &str) -> Option<Smap> {
        Self::parse_or_none(mapping_info)
    }
}

fn parse_stratum(mapping_info: &str, stratum: &str, call_sites: Option<&Smap>) -> Option<Smap> {
    let header = format!("{STRATA_SECTION} {stratum}");
    let mut lines = mapping_info
        .lines()
        .skip_while(|line| line.trim() != header)
        .skip(1)
        .peekable();

    if lines.next()?.trim() != FILE_SECTION {
        return None;
    }

    let mut files: IndexMap<u32, FileMapping> = IndexMap::new();
    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed == LINE_SECTION {
            break;
        }
        let entry = trimmed.strip_prefix("+ ");
        let with_path = entry.is_some();
        let (index, name) = entry.unwrap_or(trimmed).split_once(' ')?;
        let index: u32 = index.trim().parse().ok()?;
        let name = name.trim().to_string();
        // `+ id name` is always followed by a path; a bare `id name` only when
        // the next line is not another entry or section
        let next_is_path = lines
            .peek()
            .is_some_and(|next| with_path || !is_entry_or_section(next));
        let path = match lines.next_if(|_| next_is_path) {
            Some(path) => path.trim().to_string(),
            None => name.clone(),
        };
        files.insert(index, FileMapping::new(name, path));
    }

    for line in lines {
        let trimmed = line.trim();
        if trimmed == LINE_SECTION {
            continue;
        }
        if trimmed == super::END || trimmed.starts_with(STRATA_SECTION) {
            break;
        }
        // <source>#<file>[,<range>]:<dest>[,<multiplier>]
        let file_separator = trimmed.find('#')?;
        let dest_separator = file_separator + trimmed[file_separator..].find(':')?;
        let source_range_separator = trimmed[file_separator..dest_separator]
            .find(',')
            .map(|i| file_separator + i)
            .unwrap_or(dest_separator);
        let dest_multiplier_separator = trimmed[dest_separator..]
            .find(',')
            .map(|i| dest_separator + i)
            .unwrap_or(trimmed.len());

        let file_index: u32 = trimmed[file_separator + 1..source_range_separator]
            .parse()
            .ok()?;
        let source: i32 = trimmed[..file_separator].parse().ok()?;
        let dest: i32 = trimmed[dest_separator + 1..dest_multiplier_separator]
            .parse()
            .ok()?;
        // both forms mean the same thing here, see `SmapBuilder`
        let range: i32 = if dest_multiplier_separator != trimmed.len() {
            trimmed[dest_multiplier_separator + 1..].parse().ok()?
        } else if source_range_separator != dest_separator {
            trimmed[source_range_separator + 1..dest_separator]
                .parse()
                .ok()?
        } else {
            1
        };

        let call_site = call_sites.and_then(|sites| {
            sites
                .find_range(dest)
                .map(|(file, range)| SourcePosition::new(range.source, &file.name, &file.path))
        });
        files
            .get_mut(&file_index)?
            .map_new_interval(source, dest, range, call_site);
    }

    Some(Smap::new(files.into_values().collect()))
}

fn is_entry_or_section(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.starts_with('*') || trimmed.starts_with("+ ") {
        return true;
    }
    match trimmed.split_once(' ') {
        Some((index, _)) => index.parse::<u32>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_bare_file_entry_with_path() {
        let smap = SmapParser::parse(
            "SMAP\nFoo.kt\nKotlin\n*S Kotlin\n*F\n1 Foo.kt\nfoo/Foo\n*L\n10#1:1\n*E\n",
        )
        .unwrap();
        assert_eq!(smap.file_mappings().len(), 1);
        let file = &smap.file_mappings()[0];
        assert_eq!(file.name, "Foo.kt");
        assert_eq!(file.path, "foo/Foo");
        assert_eq!(file.line_mappings.len(), 1);
        let range = &file.line_mappings[0];
        assert_eq!((range.source, range.dest, range.range), (10, 1, 1));
    }

    #[test]
    fn test_debug_stratum_provides_call_sites() {
        let text = indoc! {"
            SMAP
            Main.kt
            Kotlin
            *S Kotlin
            *F
            + 1 Main.kt
            app/MainKt
            + 2 Lib.kt
            lib/LibKt
            *L
            1#1,20:1
            5#2,3:21
            *S KotlinDebug
            *F
            + 1 Main.kt
            app/MainKt
            *L
            7#1:21,3
            *E
        "};
        let smap = SmapParser::parse(text).unwrap();
        assert_eq!(smap.file_mappings().len(), 2);
        let (file, range) = smap.find_range(22).unwrap();
        assert_eq!(file.name, "Lib.kt");
        assert_eq!(range.map_dest_to_source(22), 6);
        assert_eq!(
            range.call_site,
            Some(SourcePosition::new(7, "Main.kt", "app/MainKt"))
        );
        assert_eq!(smap.find_range(3).unwrap().1.call_site, None);
    }

    #[test]
    fn test_missing_stratum_is_none() {
        assert!(SmapParser::parse_or_none("SMAP\nA.kt\nJava\n").is_none());
        assert!(SmapParser::parse_or_none("SMAP\nA.kt\nKotlin\n*S Kotlin\n*L\n").is_none());
    }

    #[test]
    fn test_unknown_file_index_is_none() {
        let text = "SMAP\nA.kt\nKotlin\n*S Kotlin\n*F\n+ 1 A.kt\na/A\n*L\n1#2:1\n*E\n";
        assert!(SmapParser::parse_or_none(text).is_none());
    }

    #[test]
    fn test_default_mapping() {
        let smap = SmapParser::parse_or_create_default(None, Some("A.kt"), "a/A", 3, 9);
        let file = &smap.file_mappings()[0];
        assert_eq!(file.line_mappings[0].range, 7);
        assert_eq!(smap.source_position(5).unwrap().line, 5);

        let empty = SmapParser::parse_or_create_default(Some(""), None, "a/A", 3, 9);
        assert!(empty.file_mappings().is_empty());
        let inverted = SmapParser::parse_or_create_default(None, Some("A.kt"), "a/A", 9, 3);
        assert!(inverted.file_mappings().is_empty());
    }
}
