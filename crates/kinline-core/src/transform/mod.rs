//! Regeneration of anonymous objects and lambdas whose bodies depend on the
//! call they are inlined into.
//!
//! An object built by an inline function captures the function's lambdas
//! (or reified type parameters). Those lambdas are only known at the call
//! site, so the class is copied under a new name with the lambdas inlined
//! into its methods and their captured variables turned into fields.

mod transformer;

pub use transformer::AnonymousObjectTransformer;

use crate::context::{InliningContexts, NameGeneratorId};
use crate::inliner::InlineResult;
use crate::insn::{ClassNode, MethodNode};
use crate::lambda::FunctionalArgument;
use crate::params::CapturedParamDesc;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

/// What is known about one construction (or singleton load) of an
/// anonymous class found in a body being inlined.
#[derive(Debug, Clone)]
pub struct AnonymousObjectTransformationInfo {
    pub old_class_name: String,
    /// Functional arguments passed to the constructor, by parameter slot.
    pub functional_arguments: FxHashMap<usize, FunctionalArgument>,
    /// The construction is preceded by a class reification marker.
    pub need_reification: bool,
    /// The enclosing class is itself being regenerated.
    pub captured_outer_regenerated: bool,
    pub already_regenerated: bool,
    pub constructor_desc: Option<String>,
    /// Loaded through its `INSTANCE` field rather than constructed.
    pub is_static_origin: bool,
    /// A constructor argument is an object that is regenerated too.
    pub captures_regenerated_object: bool,
    new_class_name: Option<String>,
    pub new_constructor_descriptor: Option<String>,
    /// Values the new constructor takes after the original arguments.
    pub all_recaptured_parameters: Vec<CapturedParamDesc>,
    /// Inline lambdas stored in fields of the object, by lambda class.
    pub captured_lambdas_to_inline: IndexMap<String, FunctionalArgument>,
}

impl AnonymousObjectTransformationInfo {
    pub fn new(old_class_name: impl Into<String>, need_reification: bool) -> Self {
        Self {
            old_class_name: old_class_name.into(),
            functional_arguments: FxHashMap::default(),
            need_reification,
            captured_outer_regenerated: false,
            already_regenerated: false,
            constructor_desc: None,
            is_static_origin: false,
            captures_regenerated_object: false,
            new_class_name: None,
            new_constructor_descriptor: None,
            all_recaptured_parameters: Vec::new(),
            captured_lambdas_to_inline: IndexMap::new(),
        }
    }

    /// Singleton loaded with `GETSTATIC <class>.INSTANCE`.
    pub fn singleton(old_class_name: impl Into<String>, need_reification: bool) -> Self {
        Self {
            is_static_origin: true,
            ..Self::new(old_class_name, need_reification)
        }
    }

    pub fn should_regenerate(&self, same_module: bool) -> bool {
        !self.already_regenerated
            && (self.functional_arguments.values().any(FunctionalArgument::is_inlinable)
                || !same_module
                || self.captured_outer_regenerated
                || self.need_reification
                || self.captures_regenerated_object)
    }

    /// A class loaded through `INSTANCE` may be a local function shared
    /// with code outside the lambda, so it has to stay.
    pub fn can_remove_after_transformation(&self) -> bool {
        !self.is_static_origin
    }

    pub fn new_class_name(&self) -> Option<&str> {
        self.new_class_name.as_deref()
    }

    /// Name of the regenerated class, allocated from `generator` on first use.
    pub fn generate_new_class_name(
        &mut self,
        contexts: &mut InliningContexts,
        generator: NameGeneratorId,
    ) -> &str {
        if self.new_class_name.is_none() {
            let name = contexts.gen_lambda_class_name(generator);
            contexts.register_regenerated_class(name.clone());
            self.new_class_name = Some(name);
        }
        self.new_class_name.as_deref().unwrap_or_default()
    }
}

/// Output of one regeneration.
#[derive(Debug)]
pub struct TransformationResult {
    pub new_class: ClassNode,
    /// Merged results of inlining into the class's methods.
    pub inline_result: InlineResult,
}

/// Coroutine support for regenerated objects. Suspend lambdas and
/// continuation classes need their state machine rebuilt once their
/// methods have been inlined into.
pub trait CoroutineSupport {
    fn is_continuation_class(&self, super_name: &str) -> bool {
        matches!(
            super_name,
            "kotlin/coroutines/jvm/internal/ContinuationImpl"
                | "kotlin/coroutines/jvm/internal/SuspendLambda"
                | "kotlin/coroutines/jvm/internal/RestrictedSuspendLambda"
                | "kotlin/coroutines/jvm/internal/RestrictedContinuationImpl"
        )
    }

    fn needs_state_machine(&self, _class: &ClassNode, _method: &MethodNode) -> bool {
        false
    }

    /// Rewrites `method` of the regenerated class `class_name` into a state
    /// machine.
    fn generate_state_machine(&self, _class_name: &str, _method: &mut MethodNode) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Leaves suspend functions untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCoroutineSupport;

impl CoroutineSupport for NoCoroutineSupport {}
