use crate::errors::Result;
use crate::insn::list::Constant;
use crate::insn::method::MethodNode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub access: u32,
    pub name: String,
    pub desc: String,
    pub signature: Option<String>,
    pub value: Option<Constant>,
}

impl FieldNode {
    pub fn new(access: u32, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            signature: None,
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerClassNode {
    pub name: String,
    pub outer_name: Option<String>,
    pub inner_name: Option<String>,
    pub access: u32,
}

/// `EnclosingMethod` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuterClass {
    pub owner: String,
    pub method_name: Option<String>,
    pub method_desc: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataKind {
    Class,
    /// Lambdas and other synthetic classes.
    SyntheticClass,
    Other,
}

/// The parts of `kotlin.Metadata` the inliner reads or rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KotlinMetadata {
    pub kind: MetadataKind,
    pub metadata_version: Vec<u32>,
    pub public_abi: bool,
    /// Name of the anonymous object before it was regenerated at a call site.
    pub original_name: Option<String>,
}

impl KotlinMetadata {
    pub fn new(kind: MetadataKind, metadata_version: Vec<u32>) -> Self {
        Self {
            kind,
            metadata_version,
            public_abi: false,
            original_name: None,
        }
    }

    /// The public ABI flag only exists from metadata 1.6.0 on; older classes
    /// are treated as public.
    pub fn is_public_abi(&self) -> bool {
        !self.is_at_least(1, 6, 0) || self.public_abi
    }

    pub fn is_at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        let part = |i: usize| self.metadata_version.get(i).copied().unwrap_or(0);
        (part(0), part(1), part(2)) >= (major, minor, patch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassNode {
    pub version: u32,
    pub access: u32,
    pub name: String,
    pub signature: Option<String>,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    /// `SourceDebugExtension` contents (an SMAP).
    pub source_debug: Option<String>,
    pub outer_class: Option<OuterClass>,
    pub inner_classes: Vec<InnerClassNode>,
    pub fields: Vec<FieldNode>,
    pub methods: Vec<MethodNode>,
    pub metadata: Option<KotlinMetadata>,
}

impl ClassNode {
    pub fn new(access: u32, name: impl Into<String>, super_name: impl Into<String>) -> Self {
        Self {
            version: 52,
            access,
            name: name.into(),
            signature: None,
            super_name: Some(super_name.into()),
            interfaces: Vec::new(),
            source_file: None,
            source_debug: None,
            outer_class: None,
            inner_classes: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            metadata: None,
        }
    }

    /// Encodes the class into its opaque byte form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes class bytes. Every method gets fresh label identities.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut class: ClassNode = bincode::deserialize(bytes)?;
        for method in &mut class.methods {
            method.refresh_labels();
        }
        Ok(class)
    }

    pub fn find_method(&self, name: &str, desc: &str) -> Option<&MethodNode> {
        self.methods.iter().find(|m| m.name == name && m.desc == desc)
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::list::{Insn, LabelId};
    use crate::insn::opcodes::*;

    #[test]
    fn test_bytes_round_trip_refreshes_labels() {
        let label = LabelId::fresh();
        let mut method = MethodNode::new(ACC_PUBLIC, "invoke", "()V");
        method.instructions = vec![Insn::Label(label), Insn::Simple(RETURN)].into();
        let mut class = ClassNode::new(ACC_PUBLIC, "a/B$1", "java/lang/Object");
        class.methods.push(method);
        class.fields.push(FieldNode::new(ACC_FINAL, "$x", "I"));

        let decoded = ClassNode::from_bytes(&class.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.name, "a/B$1");
        assert_eq!(decoded.find_field("$x").unwrap().desc, "I");
        let body = decoded.find_method("invoke", "()V").unwrap().instructions.to_vec();
        assert_eq!(body.len(), 2);
        assert_ne!(body[0], Insn::Label(label));
    }

    #[test]
    fn test_garbage_bytes_are_an_error() {
        assert!(ClassNode::from_bytes(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn test_public_abi_flag_depends_on_version() {
        let mut metadata = KotlinMetadata::new(MetadataKind::Class, vec![1, 5, 1]);
        assert!(metadata.is_public_abi());
        metadata.metadata_version = vec![1, 6, 0];
        assert!(!metadata.is_public_abi());
        metadata.public_abi = true;
        assert!(metadata.is_public_abi());
    }
}
