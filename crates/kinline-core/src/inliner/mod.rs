//! Inlining of calls to inline functions.
//!
//! [`InlineCodegen`] handles one call in a caller body: it loads the
//! callee, reifies it, binds the call's arguments to its parameters and
//! splices the transformed body in place of the call. The transformation
//! itself is done by `MethodInliner`, once per level: the callee, each
//! inline lambda it calls and each method of a regenerated object.

mod codegen;
mod finally;
mod method_inliner;
mod returns;

pub use codegen::{attach_source_map, CallArgument, InlineCall, InlineCodegen};
pub use finally::{generate_and_insert_finally_blocks, FinallyBlockRequest};
pub use returns::{process_returns, PointForExternalFinallyBlocks};

pub(crate) use method_inliner::{LineMapping, MethodInliner, Returns};

use crate::cache::InlineCache;
use crate::config::InlineConfig;
use crate::context::InliningContexts;
use crate::diagnostics::DiagnosticHandler;
use crate::errors::{InlineError, Result};
use crate::insn::{ClassNode, Insn, MethodId};
use crate::lambda::{CapturedVar, LambdaInfo};
use crate::reified::{IntrinsicsSupport, ReifiedTypeParametersUsages};
use crate::smap::SmapAndMethodNode;
use crate::transform::CoroutineSupport;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

/// Compiled classes the inliner may read: callees from other modules,
/// lambda classes and anonymous objects to regenerate.
pub trait ClassProvider {
    /// Serialized [`ClassNode`] of `internal_name`, `None` if there is no
    /// such class.
    fn class_bytes(&self, internal_name: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// The code generator of the caller.
pub trait SourceCompilerForInline {
    /// Body of `callee` compiled from source when it belongs to the module
    /// being compiled; `None` loads it from compiled classes instead.
    /// Inline calls inside that body go back through `codegen`.
    fn compile_inline_function(
        &self,
        callee: &MethodId,
        codegen: &mut InlineCodegen<'_>,
    ) -> anyhow::Result<Option<SmapAndMethodNode>>;

    /// Body and captured variables of a lambda written at the call site.
    fn generate_lambda_body(
        &self,
        lambda: &LambdaInfo,
    ) -> anyhow::Result<(SmapAndMethodNode, Vec<CapturedVar>)>;

    /// The call is inside try blocks with `finally` sections.
    fn has_finally_blocks(&self) -> bool {
        false
    }

    /// Code of the enclosing `finally` sections, run before a non-local
    /// return leaves the caller.
    fn generate_finally_blocks(&self, _request: &FinallyBlockRequest) -> anyhow::Result<Vec<Insn>> {
        Ok(Vec::new())
    }

    /// The caller is itself inlined later, so finally sections and
    /// non-local returns must stay marked.
    fn is_finally_marker_required(&self) -> bool {
        false
    }
}

/// Everything an inline operation reads but does not own.
#[derive(Clone, Copy)]
pub struct InlineEnv<'a> {
    pub config: &'a InlineConfig,
    pub classes: &'a dyn ClassProvider,
    pub cache: &'a InlineCache,
    pub intrinsics: &'a dyn IntrinsicsSupport,
    pub coroutines: &'a dyn CoroutineSupport,
    pub diagnostics: &'a dyn DiagnosticHandler,
}

impl InlineEnv<'_> {
    /// Loads `internal_name` through the class bytes cache.
    pub fn load_class(&self, internal_name: &str) -> Result<ClassNode> {
        let bytes = self.cache.get_or_compute_class_bytes(internal_name, || {
            trace!(class = internal_name, "reading class bytes");
            self.classes
                .class_bytes(internal_name)?
                .ok_or_else(|| InlineError::ClassNotFound {
                    name: internal_name.to_string(),
                })
        })?;
        ClassNode::from_bytes(&bytes)
    }
}

/// State of one inline operation: the shared environment and the context
/// tree of the call being inlined.
pub struct InlineSession<'a> {
    pub env: InlineEnv<'a>,
    pub contexts: InliningContexts,
}

impl<'a> InlineSession<'a> {
    pub fn new(env: InlineEnv<'a>) -> Self {
        let mut contexts = InliningContexts::new();
        contexts.set_generate_assert_field(env.config.generate_assert_field);
        Self { env, contexts }
    }
}

/// What inlining changed outside the caller body.
#[derive(Debug, Default)]
pub struct InlineResult {
    changed_types: FxHashMap<String, String>,
    classes_to_remove: FxHashSet<String>,
    not_changed_types: FxHashSet<String>,
    pub reified_type_parameters_usages: ReifiedTypeParametersUsages,
    /// Classes created by regeneration, to be written with the caller.
    pub regenerated_classes: Vec<ClassNode>,
    /// Inlined code reads `$assertionsDisabled` of the caller's class.
    pub uses_assertions_field: bool,
}

impl InlineResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_changed_type(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.changed_types.insert(old.into(), new.into());
    }

    pub fn changed_types(&self) -> &FxHashMap<String, String> {
        &self.changed_types
    }

    pub fn add_class_to_remove(&mut self, name: impl Into<String>) {
        self.classes_to_remove.insert(name.into());
    }

    /// A class used as is somewhere, which must survive even if another
    /// construction of it was regenerated.
    pub fn add_not_changed_class(&mut self, name: impl Into<String>) {
        self.not_changed_types.insert(name.into());
    }

    /// Classes no longer referenced by anything inlining produced.
    pub fn classes_to_remove(&self) -> FxHashSet<String> {
        self.classes_to_remove
            .difference(&self.not_changed_types)
            .cloned()
            .collect()
    }

    pub fn merge(&mut self, child: InlineResult) {
        self.classes_to_remove.extend(child.classes_to_remove());
        self.not_changed_types.extend(child.not_changed_types);
        self.changed_types.extend(child.changed_types);
        self.reified_type_parameters_usages
            .merge_all(&child.reified_type_parameters_usages);
        self.regenerated_classes.extend(child.regenerated_classes);
        self.uses_assertions_field |= child.uses_assertions_field;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_changed_class_is_kept() {
        let mut child = InlineResult::new();
        child.add_class_to_remove("a/A$f$1");
        child.add_class_to_remove("a/A$f$2");
        child.add_not_changed_class("a/A$f$2");
        child.add_changed_type("a/A$f$1", "a/B$g$$inlined$f$1");

        let mut parent = InlineResult::new();
        parent.merge(child);
        let removed = parent.classes_to_remove();
        assert!(removed.contains("a/A$f$1"));
        assert!(!removed.contains("a/A$f$2"));
        assert_eq!(
            parent.changed_types().get("a/A$f$1").map(String::as_str),
            Some("a/B$g$$inlined$f$1")
        );
    }

    #[test]
    fn test_merge_keeps_usages() {
        let mut child = InlineResult::new();
        child
            .reified_type_parameters_usages
            .add_used_reified_parameter("T");
        child.uses_assertions_field = true;
        let mut parent = InlineResult::new();
        parent.merge(child);
        assert!(parent
            .reified_type_parameters_usages
            .were_used_reified_parameters());
        assert!(parent.uses_assertions_field);
    }
}
