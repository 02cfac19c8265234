use crate::insn::{AsmType, Constant, Insn, LocalVariable, MethodNode};
use rustc_hash::FxHashMap;

/// Old to new internal names of regenerated classes.
///
/// A child remapper starts from a copy of its parent's table, so mappings
/// registered later on the parent are not seen by existing children.
#[derive(Debug, Clone, Default)]
pub struct TypeRemapper {
    mappings: FxHashMap<String, String>,
    additional: FxHashMap<String, String>,
}

impl TypeRemapper {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn create_from(
        parent: &TypeRemapper,
        mappings: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut merged = parent.mappings.clone();
        merged.extend(mappings);
        Self {
            mappings: merged,
            additional: FxHashMap::default(),
        }
    }

    pub fn add_mapping(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.mappings.insert(old.into(), new.into());
    }

    /// Mapping discovered while a class is being regenerated, such as a
    /// changed return type.
    pub fn add_additional_mapping(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.additional.insert(old.into(), new.into());
    }

    pub fn has_no_additional_mapping(&self, name: &str) -> bool {
        self.mappings.contains_key(name)
    }

    pub fn mappings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.mappings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn map<'n>(&'n self, name: &'n str) -> &'n str {
        self.mappings
            .get(name)
            .or_else(|| self.additional.get(name))
            .map_or(name, String::as_str)
    }

    /// Rewrites every `L<name>;` of a field or method descriptor.
    pub fn map_desc(&self, desc: &str) -> String {
        let mut out = String::with_capacity(desc.len());
        let mut rest = desc;
        while let Some(start) = rest.find('L') {
            out.push_str(&rest[..=start]);
            let after = &rest[start + 1..];
            match after.find(';') {
                Some(end) => {
                    out.push_str(self.map(&after[..end]));
                    rest = &after[end..];
                }
                None => {
                    rest = after;
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Maps an internal name that may also be an array descriptor.
    fn map_name_or_desc(&self, name: &str) -> String {
        if name.starts_with('[') {
            self.map_desc(name)
        } else {
            self.map(name).to_string()
        }
    }

    pub fn map_type(&self, ty: &AsmType) -> AsmType {
        match ty {
            AsmType::Object(name) => AsmType::object(self.map(name)),
            AsmType::Array(element) => AsmType::array_of(self.map_type(element)),
            other => other.clone(),
        }
    }

    pub fn remap_insn(&self, insn: &mut Insn) {
        match insn {
            Insn::Type { desc, .. } => *desc = self.map_name_or_desc(desc),
            Insn::Field { owner, desc, .. } => {
                *owner = self.map_name_or_desc(owner);
                *desc = self.map_desc(desc);
            }
            Insn::Method { owner, desc, .. } => {
                *owner = self.map_name_or_desc(owner);
                *desc = self.map_desc(desc);
            }
            Insn::Ldc(Constant::Type(ty)) => *ty = self.map_type(ty),
            _ => {}
        }
    }

    pub fn remap_local_variable(&self, local: &mut LocalVariable) {
        local.desc = self.map_desc(&local.desc);
    }

    /// Applies the table to every instruction, debug entry and caught type
    /// of `method`, and to its descriptor.
    pub fn remap_method(&self, method: &mut MethodNode) {
        method.desc = self.map_desc(&method.desc);
        for id in method.instructions.ids() {
            self.remap_insn(method.instructions.get_mut(id));
        }
        for local in &mut method.local_variables {
            self.remap_local_variable(local);
        }
        for block in &mut method.try_catch_blocks {
            if let Some(ty) = &block.ty {
                block.ty = Some(self.map(ty).to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::opcodes::*;

    fn remapper() -> TypeRemapper {
        let mut remapper = TypeRemapper::root();
        remapper.add_mapping("Foo$1", "Bar$inlined$1");
        remapper
    }

    #[test]
    fn test_map_desc() {
        let remapper = remapper();
        assert_eq!(
            remapper.map_desc("(ILFoo$1;[LFoo$1;)LFoo$1;"),
            "(ILBar$inlined$1;[LBar$inlined$1;)LBar$inlined$1;"
        );
        assert_eq!(remapper.map_desc("(J)V"), "(J)V");
        assert_eq!(remapper.map_desc("LFoo$12;"), "LFoo$12;");
    }

    #[test]
    fn test_remap_instructions() {
        let remapper = remapper();
        let mut new = Insn::type_insn(NEW, "Foo$1");
        remapper.remap_insn(&mut new);
        assert_eq!(new, Insn::type_insn(NEW, "Bar$inlined$1"));

        let mut init = Insn::method(INVOKESPECIAL, "Foo$1", "<init>", "(LFoo$1;)V");
        remapper.remap_insn(&mut init);
        assert_eq!(
            init,
            Insn::method(INVOKESPECIAL, "Bar$inlined$1", "<init>", "(LBar$inlined$1;)V")
        );
    }

    #[test]
    fn test_child_copies_parent() {
        let parent = remapper();
        let mut child = TypeRemapper::create_from(&parent, [("A".to_string(), "B".to_string())]);
        child.add_additional_mapping("C", "D");
        assert_eq!(child.map("Foo$1"), "Bar$inlined$1");
        assert_eq!(child.map("A"), "B");
        assert_eq!(child.map("C"), "D");
        assert!(!child.has_no_additional_mapping("C"));
        assert_eq!(parent.map("A"), "A");
    }
}
