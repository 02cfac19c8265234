//! Inlining contexts.
//!
//! One inline call creates a tree of contexts: the root (the call site),
//! a child per nested inline call, per inlined lambda and per regenerated
//! anonymous object. Contexts live in an arena and refer to their parent by
//! index; the arena is owned by the inline operation that created the root.

use crate::insn::markers::{INLINE_TRANSFORMATION_SUFFIX, THIS};
use crate::reified::TypeParameterMappings;
use crate::remap::TypeRemapper;
use crate::transform::AnonymousObjectTransformationInfo;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameGeneratorId(usize);

/// Hands out `<prefix>$1`, `<prefix>$2`, ... for regenerated classes.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    generator_class: String,
    next_index: usize,
    sub_generators: FxHashMap<String, NameGeneratorId>,
}

impl NameGenerator {
    fn new(generator_class: String) -> Self {
        Self {
            generator_class,
            next_index: 1,
            sub_generators: FxHashMap::default(),
        }
    }

    pub fn generator_class(&self) -> &str {
        &self.generator_class
    }
}

/// Where an inline call sits in the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineCallSiteInfo {
    pub owner_class_name: String,
    pub method_name: String,
    pub method_desc: String,
    /// The call is inside a public inline function, so anything it
    /// regenerates becomes public ABI.
    pub is_in_public_inline_scope: bool,
    pub file: Option<String>,
    pub line_number: i32,
}

impl InlineCallSiteInfo {
    pub fn new(
        owner_class_name: impl Into<String>,
        method_name: impl Into<String>,
        method_desc: impl Into<String>,
    ) -> Self {
        Self {
            owner_class_name: owner_class_name.into(),
            method_name: method_name.into(),
            method_desc: method_desc.into(),
            is_in_public_inline_scope: false,
            file: None,
            line_number: -1,
        }
    }

    pub fn location(&self) -> String {
        match &self.file {
            Some(file) => format!("{file}:{}", self.line_number),
            None => format!(
                "{}.{}{}",
                self.owner_class_name, self.method_name, self.method_desc
            ),
        }
    }
}

#[derive(Debug)]
pub enum ContextKind {
    Root {
        call_site: InlineCallSiteInfo,
        type_mappings: TypeParameterMappings,
    },
    /// An inline call nested in the body being inlined.
    SubInline,
    /// Body of an inline lambda; `is_default` for default-value lambdas.
    InlinedLambda { lambda_class: String, is_default: bool },
    /// Methods of an anonymous object being regenerated.
    RegeneratedObject {
        info: Box<AnonymousObjectTransformationInfo>,
        call_site: InlineCallSiteInfo,
    },
}

#[derive(Debug)]
struct InliningContext {
    parent: Option<ContextId>,
    kind: ContextKind,
    name_generator: NameGeneratorId,
    type_remapper: TypeRemapper,
    /// Lambda whose body this context is part of, inherited by children.
    lambda_class: Option<String>,
    is_default_lambda: bool,
    is_continuation: bool,
}

/// Arena of the contexts of one inline operation.
#[derive(Debug, Default)]
pub struct InliningContexts {
    contexts: Vec<InliningContext>,
    generators: Vec<NameGenerator>,
    generate_assert_field: bool,
    /// Names handed out to regenerated classes by this operation.
    regenerated_classes: FxHashSet<String>,
}

impl InliningContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the root for a call of `callee_name` from `call_site`;
    /// regenerated classes are named `<owner>$<method>$$inlined$<callee>$<n>`.
    pub fn new_root(
        &mut self,
        call_site: InlineCallSiteInfo,
        callee_name: &str,
        type_mappings: TypeParameterMappings,
    ) -> ContextId {
        let base = self.new_generator(format!(
            "{}${}",
            call_site.owner_class_name, call_site.method_name
        ));
        let generator = self.inlined_sub_generator(base, callee_name);
        self.push(InliningContext {
            parent: None,
            kind: ContextKind::Root {
                call_site,
                type_mappings,
            },
            name_generator: generator,
            type_remapper: TypeRemapper::root(),
            lambda_class: None,
            is_default_lambda: false,
            is_continuation: false,
        })
    }

    fn push(&mut self, context: InliningContext) -> ContextId {
        self.contexts.push(context);
        ContextId(self.contexts.len() - 1)
    }

    fn get(&self, id: ContextId) -> &InliningContext {
        &self.contexts[id.0]
    }

    fn get_mut(&mut self, id: ContextId) -> &mut InliningContext {
        &mut self.contexts[id.0]
    }

    fn child(
        &mut self,
        parent: ContextId,
        kind: ContextKind,
        name_generator: NameGeneratorId,
        additional_mappings: Vec<(String, String)>,
    ) -> ContextId {
        let (lambda_class, is_default_lambda) = match &kind {
            ContextKind::InlinedLambda {
                lambda_class,
                is_default,
            } => (Some(lambda_class.clone()), *is_default),
            _ => {
                let parent = self.get(parent);
                (parent.lambda_class.clone(), parent.is_default_lambda)
            }
        };
        let type_remapper =
            TypeRemapper::create_from(&self.get(parent).type_remapper, additional_mappings);
        self.push(InliningContext {
            parent: Some(parent),
            kind,
            name_generator,
            type_remapper,
            lambda_class,
            is_default_lambda,
            is_continuation: false,
        })
    }

    /// Context of an inline call made by the body of `parent`.
    pub fn sub_inline(&mut self, parent: ContextId, name_generator: NameGeneratorId) -> ContextId {
        self.child(parent, ContextKind::SubInline, name_generator, Vec::new())
    }

    /// Context of an inline lambda's body. The lambda class itself is
    /// dropped from the type mappings: its body is no longer in it.
    pub fn sub_inline_lambda(
        &mut self,
        parent: ContextId,
        lambda_class: &str,
        is_default: bool,
    ) -> ContextId {
        let generator = self.sub_generator(self.name_generator(parent), "lambda");
        self.child(
            parent,
            ContextKind::InlinedLambda {
                lambda_class: lambda_class.to_string(),
                is_default,
            },
            generator,
            Vec::new(),
        )
    }

    /// Context for the methods of a regenerated anonymous object.
    pub fn sub_inline_with_class_regeneration(
        &mut self,
        parent: ContextId,
        name_generator: NameGeneratorId,
        info: AnonymousObjectTransformationInfo,
        call_site: InlineCallSiteInfo,
    ) -> ContextId {
        let mappings = info
            .new_class_name()
            .map(|new| vec![(info.old_class_name.clone(), new.to_string())])
            .unwrap_or_default();
        self.child(
            parent,
            ContextKind::RegeneratedObject {
                info: Box::new(info),
                call_site,
            },
            name_generator,
            mappings,
        )
    }

    pub fn parent(&self, id: ContextId) -> Option<ContextId> {
        self.get(id).parent
    }

    pub fn kind(&self, id: ContextId) -> &ContextKind {
        &self.get(id).kind
    }

    pub fn is_root(&self, id: ContextId) -> bool {
        self.get(id).parent.is_none()
    }

    pub fn root(&self, id: ContextId) -> ContextId {
        let mut current = id;
        while let Some(parent) = self.get(current).parent {
            current = parent;
        }
        current
    }

    /// True when `ancestor` is `id` or one of its parents.
    pub fn is_ancestor(&self, ancestor: ContextId, id: ContextId) -> bool {
        let mut current = Some(id);
        while let Some(context) = current {
            if context == ancestor {
                return true;
            }
            current = self.get(context).parent;
        }
        false
    }

    pub fn is_inlining_lambda(&self, id: ContextId) -> bool {
        self.get(id).lambda_class.is_some()
    }

    pub fn lambda_class(&self, id: ContextId) -> Option<&str> {
        self.get(id).lambda_class.as_deref()
    }

    pub fn is_default_lambda(&self, id: ContextId) -> bool {
        self.get(id).is_default_lambda
    }

    /// Regenerating a class rather than inlining into the call site.
    pub fn is_class_regeneration(&self, id: ContextId) -> bool {
        let mut current = Some(id);
        while let Some(context) = current {
            if matches!(self.get(context).kind, ContextKind::RegeneratedObject { .. }) {
                return true;
            }
            current = self.get(context).parent;
        }
        false
    }

    pub fn is_continuation(&self, id: ContextId) -> bool {
        self.get(id).is_continuation
    }

    pub fn set_continuation(&mut self, id: ContextId, is_continuation: bool) {
        self.get_mut(id).is_continuation = is_continuation;
    }

    pub fn generate_assert_field(&self) -> bool {
        self.generate_assert_field
    }

    pub fn set_generate_assert_field(&mut self, value: bool) {
        self.generate_assert_field = value;
    }

    /// Call site of the nearest root or regenerated object.
    pub fn call_site(&self, id: ContextId) -> &InlineCallSiteInfo {
        let mut current = id;
        loop {
            let context = self.get(current);
            match (&context.kind, context.parent) {
                (ContextKind::Root { call_site, .. }, _)
                | (ContextKind::RegeneratedObject { call_site, .. }, _) => return call_site,
                (_, Some(parent)) => current = parent,
                // every chain ends in a root
                (_, None) => unreachable!("context without a root"),
            }
        }
    }

    /// Call site of the outermost inline call, where regenerated objects
    /// take their `$assertionsDisabled` from.
    pub fn root_call_site(&self, id: ContextId) -> &InlineCallSiteInfo {
        self.call_site(self.root(id))
    }

    pub fn type_mappings(&self, id: ContextId) -> Option<&TypeParameterMappings> {
        match &self.get(self.root(id)).kind {
            ContextKind::Root { type_mappings, .. } => Some(type_mappings),
            _ => None,
        }
    }

    pub fn type_remapper(&self, id: ContextId) -> &TypeRemapper {
        &self.get(id).type_remapper
    }

    pub fn type_remapper_mut(&mut self, id: ContextId) -> &mut TypeRemapper {
        &mut self.get_mut(id).type_remapper
    }

    pub fn transformation_info(&self, id: ContextId) -> Option<&AnonymousObjectTransformationInfo> {
        match &self.get(id).kind {
            ContextKind::RegeneratedObject { info, .. } => Some(info),
            _ => None,
        }
    }

    pub fn transformation_info_mut(
        &mut self,
        id: ContextId,
    ) -> Option<&mut AnonymousObjectTransformationInfo> {
        match &mut self.get_mut(id).kind {
            ContextKind::RegeneratedObject { info, .. } => Some(info),
            _ => None,
        }
    }

    /// Transformation of `old_name` being performed by `id` or one of its
    /// parents.
    pub fn find_anonymous_object_transformation_info(
        &self,
        id: ContextId,
        old_name: &str,
    ) -> Option<&AnonymousObjectTransformationInfo> {
        let mut current = Some(id);
        while let Some(context) = current {
            if let Some(info) = self.transformation_info(context) {
                if info.old_class_name == old_name {
                    return Some(info);
                }
            }
            current = self.get(context).parent;
        }
        None
    }

    pub fn register_regenerated_class(&mut self, name: impl Into<String>) {
        self.regenerated_classes.insert(name.into());
    }

    /// The class is itself the output of a regeneration.
    pub fn is_regenerated_class(&self, name: &str) -> bool {
        self.regenerated_classes.contains(name)
    }

    pub fn name_generator(&self, id: ContextId) -> NameGeneratorId {
        self.get(id).name_generator
    }

    pub fn generator(&self, id: NameGeneratorId) -> &NameGenerator {
        &self.generators[id.0]
    }

    fn new_generator(&mut self, generator_class: String) -> NameGeneratorId {
        self.generators.push(NameGenerator::new(generator_class));
        NameGeneratorId(self.generators.len() - 1)
    }

    /// Next class name of `generator`.
    pub fn gen_lambda_class_name(&mut self, generator: NameGeneratorId) -> String {
        let generator = &mut self.generators[generator.0];
        let name = format!("{}${}", generator.generator_class, generator.next_index);
        generator.next_index += 1;
        name
    }

    /// Generator for classes nested in the regenerated class `class_name`.
    pub fn generator_for_class(&mut self, class_name: &str) -> NameGeneratorId {
        self.new_generator(class_name.to_string())
    }

    fn memoized_sub_generator(&mut self, parent: NameGeneratorId, key: String, class: String) -> NameGeneratorId {
        if let Some(existing) = self.generators[parent.0].sub_generators.get(&key) {
            return *existing;
        }
        let id = self.new_generator(class);
        self.generators[parent.0].sub_generators.insert(key, id);
        id
    }

    /// `<class>$<name>`, shared by every caller asking for the same name.
    pub fn sub_generator(&mut self, parent: NameGeneratorId, name: &str) -> NameGeneratorId {
        let class = format!("{}${name}", self.generators[parent.0].generator_class);
        self.memoized_sub_generator(parent, name.to_string(), class)
    }

    /// `<class>$$inlined$<callee>` for classes regenerated by an inline
    /// call of `callee`.
    pub fn inlined_sub_generator(&mut self, parent: NameGeneratorId, callee: &str) -> NameGeneratorId {
        let callee = if callee == "<init>" { THIS } else { callee };
        let class = format!(
            "{}${INLINE_TRANSFORMATION_SUFFIX}${callee}",
            self.generators[parent.0].generator_class
        );
        self.memoized_sub_generator(parent, format!("{INLINE_TRANSFORMATION_SUFFIX}${callee}"), class)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(contexts: &mut InliningContexts) -> ContextId {
        contexts.new_root(
            InlineCallSiteInfo::new("a/Caller", "run", "()V"),
            "map",
            TypeParameterMappings::new(),
        )
    }

    #[test]
    fn test_name_generation() {
        let mut contexts = InliningContexts::new();
        let root = root(&mut contexts);
        let generator = contexts.name_generator(root);
        assert_eq!(contexts.gen_lambda_class_name(generator), "a/Caller$run$$inlined$map$1");
        assert_eq!(contexts.gen_lambda_class_name(generator), "a/Caller$run$$inlined$map$2");

        let sub = contexts.sub_generator(generator, "filter");
        assert_eq!(contexts.sub_generator(generator, "filter"), sub);
        assert_eq!(
            contexts.gen_lambda_class_name(sub),
            "a/Caller$run$$inlined$map$filter$1"
        );
        let inlined = contexts.inlined_sub_generator(sub, "forEach");
        assert_eq!(
            contexts.generator(inlined).generator_class(),
            "a/Caller$run$$inlined$map$filter$$inlined$forEach"
        );
    }

    #[test]
    fn test_tree_queries() {
        let mut contexts = InliningContexts::new();
        let root = root(&mut contexts);
        let lambda = contexts.sub_inline_lambda(root, "a/Caller$run$1", false);
        let generator = contexts.name_generator(lambda);
        let nested = contexts.sub_inline(lambda, generator);

        assert!(contexts.is_root(root));
        assert!(!contexts.is_root(nested));
        assert_eq!(contexts.root(nested), root);
        assert!(contexts.is_ancestor(root, nested));
        assert!(!contexts.is_ancestor(nested, root));
        assert!(!contexts.is_inlining_lambda(root));
        assert!(contexts.is_inlining_lambda(nested));
        assert_eq!(contexts.lambda_class(nested), Some("a/Caller$run$1"));
        assert_eq!(contexts.call_site(nested).method_name, "run");
        assert!(contexts.type_mappings(nested).is_some());
    }

    #[test]
    fn test_transformation_lookup() {
        let mut contexts = InliningContexts::new();
        let root = root(&mut contexts);
        let generator = contexts.name_generator(root);
        let mut info = AnonymousObjectTransformationInfo::new("a/Inline$f$1", false);
        info.generate_new_class_name(&mut contexts, generator);
        let regenerated = contexts.sub_inline_with_class_regeneration(
            root,
            generator,
            info,
            InlineCallSiteInfo::new("a/Inline$f$1", "invoke", "()V"),
        );
        let nested = contexts.sub_inline(regenerated, generator);

        let found = contexts
            .find_anonymous_object_transformation_info(nested, "a/Inline$f$1")
            .unwrap();
        assert_eq!(found.new_class_name(), Some("a/Caller$run$$inlined$map$1"));
        assert!(contexts
            .find_anonymous_object_transformation_info(nested, "a/Other$1")
            .is_none());
        assert_eq!(
            contexts.type_remapper(nested).map("a/Inline$f$1"),
            "a/Caller$run$$inlined$map$1"
        );
        assert!(contexts.is_class_regeneration(nested));
        assert_eq!(contexts.call_site(nested).owner_class_name, "a/Inline$f$1");
    }
}
