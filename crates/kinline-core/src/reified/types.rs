use super::ReificationArgument;
use crate::insn::AsmType;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReifiedTypeKind {
    /// Classifier by Kotlin internal name (`kotlin/collections/MutableList`).
    Class {
        name: String,
        arguments: Vec<ReifiedType>,
    },
    Array(Box<ReifiedType>),
    TypeParameter { name: String, is_reified: bool },
}

/// The part of a Kotlin type reification needs: classifier, arguments and
/// nullability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReifiedType {
    pub kind: ReifiedTypeKind,
    pub nullable: bool,
}

const MUTABLE_COLLECTIONS: [(&str, &str); 8] = [
    ("kotlin/collections/MutableIterator", "MutableIterator"),
    ("kotlin/collections/MutableIterable", "MutableIterable"),
    ("kotlin/collections/MutableCollection", "MutableCollection"),
    ("kotlin/collections/MutableList", "MutableList"),
    ("kotlin/collections/MutableListIterator", "MutableListIterator"),
    ("kotlin/collections/MutableSet", "MutableSet"),
    ("kotlin/collections/MutableMap", "MutableMap"),
    ("kotlin/collections/MutableMap.MutableEntry", "MutableMapEntry"),
];

impl ReifiedType {
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            kind: ReifiedTypeKind::Class {
                name: name.into(),
                arguments: Vec::new(),
            },
            nullable: false,
        }
    }

    pub fn generic(name: impl Into<String>, arguments: Vec<ReifiedType>) -> Self {
        Self {
            kind: ReifiedTypeKind::Class {
                name: name.into(),
                arguments,
            },
            nullable: false,
        }
    }

    pub fn type_parameter(name: impl Into<String>, is_reified: bool) -> Self {
        Self {
            kind: ReifiedTypeKind::TypeParameter {
                name: name.into(),
                is_reified,
            },
            nullable: false,
        }
    }

    pub fn array_of(element: ReifiedType) -> Self {
        Self {
            kind: ReifiedTypeKind::Array(Box::new(element)),
            nullable: false,
        }
    }

    pub fn make_nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Wraps the type in `argument.array_depth` arrays, then applies the
    /// argument's nullability.
    pub fn reify(&self, argument: &ReificationArgument) -> Self {
        let mut ty = self.clone();
        for _ in 0..argument.array_depth {
            ty = ReifiedType::array_of(ty);
        }
        if argument.nullable {
            ty.make_nullable()
        } else {
            ty
        }
    }

    pub fn classifier_name(&self) -> Option<&str> {
        match &self.kind {
            ReifiedTypeKind::Class { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Suffix of the `TypeIntrinsics` helpers (`isMutableList`, ...) for
    /// mutable collection types.
    pub fn mutable_collection_suffix(&self) -> Option<&'static str> {
        let name = self.classifier_name()?;
        MUTABLE_COLLECTIONS
            .iter()
            .find(|(fq_name, _)| *fq_name == name)
            .map(|(_, suffix)| *suffix)
    }

    /// Arity of `kotlin/FunctionN` types.
    pub fn function_arity(&self) -> Option<usize> {
        self.classifier_name()?
            .strip_prefix("kotlin/Function")
            .and_then(|arity| arity.parse().ok())
    }

    /// `Array<...<T>>` with a reified `T` at the bottom.
    pub fn reification_argument(&self) -> Option<ReificationArgument> {
        let mut ty = self;
        let mut array_depth = 0;
        while let ReifiedTypeKind::Array(element) = &ty.kind {
            array_depth += 1;
            ty = element;
        }
        match &ty.kind {
            ReifiedTypeKind::TypeParameter {
                name,
                is_reified: true,
            } => Some(ReificationArgument::new(
                name.clone(),
                self.nullable,
                array_depth,
            )),
            _ => None,
        }
    }

    /// Every reified type parameter mentioned anywhere in the type.
    pub fn used_reified_parameters(&self) -> ReifiedTypeParametersUsages {
        let mut usages = ReifiedTypeParametersUsages::default();
        self.collect_reified(&mut usages);
        usages
    }

    fn collect_reified(&self, usages: &mut ReifiedTypeParametersUsages) {
        match &self.kind {
            ReifiedTypeKind::Class { arguments, .. } => {
                for argument in arguments {
                    argument.collect_reified(usages);
                }
            }
            ReifiedTypeKind::Array(element) => element.collect_reified(usages),
            ReifiedTypeKind::TypeParameter {
                name,
                is_reified: true,
            } => usages.add_used_reified_parameter(name.clone()),
            ReifiedTypeKind::TypeParameter { .. } => {}
        }
    }
}

impl fmt::Display for ReifiedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ReifiedTypeKind::Class { name, arguments } => {
                f.write_str(&name.replace('/', "."))?;
                if !arguments.is_empty() {
                    f.write_str("<")?;
                    for (i, argument) in arguments.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{argument}")?;
                    }
                    f.write_str(">")?;
                }
            }
            ReifiedTypeKind::Array(element) => write!(f, "kotlin.Array<{element}>")?,
            ReifiedTypeKind::TypeParameter { name, .. } => f.write_str(name)?,
        }
        if self.nullable {
            f.write_str("?")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TypeParameterMapping {
    pub ty: ReifiedType,
    pub asm_type: AsmType,
    pub signature: String,
    pub is_reified: bool,
    /// Set when the argument is itself a reified parameter of the caller,
    /// whose marker must survive for the next inlining.
    pub reification_argument: Option<ReificationArgument>,
    pub reified_type_parameters_usages: ReifiedTypeParametersUsages,
}

impl TypeParameterMapping {
    pub fn new(ty: ReifiedType, asm_type: AsmType, signature: impl Into<String>, is_reified: bool) -> Self {
        Self {
            reification_argument: ty.reification_argument(),
            reified_type_parameters_usages: ty.used_reified_parameters(),
            ty,
            asm_type,
            signature: signature.into(),
            is_reified,
        }
    }
}

/// Type arguments of a call, by type parameter name.
#[derive(Debug, Clone, Default)]
pub struct TypeParameterMappings {
    mappings_by_name: IndexMap<String, TypeParameterMapping>,
}

impl TypeParameterMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, mapping: TypeParameterMapping) {
        self.mappings_by_name.insert(name.into(), mapping);
    }

    pub fn get(&self, name: &str) -> Option<&TypeParameterMapping> {
        self.mappings_by_name.get(name)
    }

    pub fn has_reified_parameters(&self) -> bool {
        self.mappings_by_name.values().any(|m| m.is_reified)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeParameterMapping)> {
        self.mappings_by_name.iter().map(|(name, m)| (name.as_str(), m))
    }
}

/// Names of reified type parameters whose markers are still in a body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReifiedTypeParametersUsages {
    used_type_parameters: FxHashSet<String>,
}

impl ReifiedTypeParametersUsages {
    pub fn were_used_reified_parameters(&self) -> bool {
        !self.used_type_parameters.is_empty()
    }

    pub fn add_used_reified_parameter(&mut self, name: impl Into<String>) {
        self.used_type_parameters.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used_type_parameters.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.used_type_parameters.iter().map(String::as_str)
    }

    /// Takes the child's usages except those declared by the context the
    /// child belongs to; what is left comes from an outer scope.
    pub fn propagate_child_usages_within_context(
        &mut self,
        child: &ReifiedTypeParametersUsages,
        names_in_context: &FxHashSet<String>,
    ) {
        if !child.were_used_reified_parameters() {
            return;
        }
        self.used_type_parameters.extend(
            child
                .used_type_parameters
                .iter()
                .filter(|name| !names_in_context.contains(*name))
                .cloned(),
        );
    }

    pub fn merge_all(&mut self, other: &ReifiedTypeParametersUsages) {
        self.used_type_parameters
            .extend(other.used_type_parameters.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reification_argument_of_nested_array() {
        let ty = ReifiedType::array_of(ReifiedType::array_of(ReifiedType::type_parameter("R", true)))
            .make_nullable();
        assert_eq!(ty.reification_argument(), Some(ReificationArgument::new("R", true, 2)));
        assert_eq!(ReifiedType::type_parameter("R", false).reification_argument(), None);
        assert_eq!(ReifiedType::class("kotlin/String").reification_argument(), None);
    }

    #[test]
    fn test_reify_wraps_arrays_then_nullability() {
        let ty = ReifiedType::class("kotlin/String");
        let reified = ty.reify(&ReificationArgument::parse("[T?"));
        assert_eq!(reified.to_string(), "kotlin.Array<kotlin.String>?");
    }

    #[test]
    fn test_intrinsic_classification() {
        assert_eq!(
            ReifiedType::class("kotlin/collections/MutableList").mutable_collection_suffix(),
            Some("MutableList")
        );
        assert_eq!(ReifiedType::class("kotlin/collections/List").mutable_collection_suffix(), None);
        assert_eq!(ReifiedType::class("kotlin/Function2").function_arity(), Some(2));
        assert_eq!(ReifiedType::class("kotlin/FunctionX").function_arity(), None);
    }

    #[test]
    fn test_usages_propagation() {
        let child_type = ReifiedType::generic(
            "kotlin/collections/List",
            vec![ReifiedType::type_parameter("T", true), ReifiedType::type_parameter("U", true)],
        );
        let child = child_type.used_reified_parameters();
        let mut parent = ReifiedTypeParametersUsages::default();
        let context: FxHashSet<String> = ["T".to_string()].into_iter().collect();
        parent.propagate_child_usages_within_context(&child, &context);
        assert!(parent.contains("U"));
        assert!(!parent.contains("T"));
    }
}
