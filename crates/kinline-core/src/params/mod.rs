//! Formal parameters of a body being inlined, plus the values it captures.
//!
//! Two orders matter. Arguments are added in the order the call site
//! evaluates them (`index` is the offset in that order); the body refers to
//! them by declaration order, where every value parameter comes first and
//! captured values follow.

mod builder;
mod parameters;

pub use builder::ParametersBuilder;
pub use parameters::Parameters;

use crate::insn::{AsmType, StackValue};
use crate::lambda::FunctionalArgument;

/// A captured variable as seen by the class that captured it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapturedParamDesc {
    /// Internal name of the lambda or object holding the field.
    pub containing_lambda: String,
    pub field_name: String,
    pub ty: AsmType,
}

impl CapturedParamDesc {
    pub fn new(
        containing_lambda: impl Into<String>,
        field_name: impl Into<String>,
        ty: AsmType,
    ) -> Self {
        Self {
            containing_lambda: containing_lambda.into(),
            field_name: field_name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedParamInfo {
    pub desc: CapturedParamDesc,
    /// Field name in a regenerated class.
    pub new_field_name: String,
    /// Stored by the constructor of a regenerated class only when false.
    pub skip_in_constructor: bool,
    /// Occupies a slot even when skipped.
    pub is_synthetic: bool,
}

#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub ty: AsmType,
    /// Type of the value the call site leaves on the stack.
    pub type_on_stack: AsmType,
    /// Never materialized at runtime (inline lambdas, default masks).
    pub is_skipped: bool,
    /// Offset in call-site evaluation order.
    pub index: usize,
    pub declaration_index: usize,
    /// Value to read instead of a fresh local.
    pub remap_value: Option<StackValue>,
    pub functional_argument: Option<FunctionalArgument>,
    /// Captured field a constructor parameter of a regenerated object is
    /// stored into.
    pub field_equivalent: Option<Box<ParameterInfo>>,
    pub captured: Option<CapturedParamInfo>,
}

impl ParameterInfo {
    pub fn new(ty: AsmType, is_skipped: bool, index: usize, declaration_index: usize) -> Self {
        Self {
            type_on_stack: ty.clone(),
            ty,
            is_skipped,
            index,
            declaration_index,
            remap_value: None,
            functional_argument: None,
            field_equivalent: None,
            captured: None,
        }
    }

    pub fn is_remapped(&self) -> bool {
        self.remap_value.is_some()
    }

    pub fn is_skipped_or_remapped(&self) -> bool {
        self.is_skipped || self.is_remapped()
    }

    pub fn is_captured(&self) -> bool {
        self.captured.is_some()
    }

    pub fn is_synthetic(&self) -> bool {
        self.captured.as_ref().is_some_and(|c| c.is_synthetic)
    }

    pub fn captured_desc(&self) -> Option<&CapturedParamDesc> {
        self.captured.as_ref().map(|c| &c.desc)
    }

    /// Field name in the class that captured the value.
    pub fn original_field_name(&self) -> Option<&str> {
        self.captured.as_ref().map(|c| c.desc.field_name.as_str())
    }

    pub fn new_field_name(&self) -> Option<&str> {
        self.captured.as_ref().map(|c| c.new_field_name.as_str())
    }

    pub fn containing_lambda_name(&self) -> Option<&str> {
        self.captured
            .as_ref()
            .map(|c| c.desc.containing_lambda.as_str())
    }

    pub fn skip_in_constructor(&self) -> bool {
        self.captured.as_ref().is_some_and(|c| c.skip_in_constructor)
    }

    pub fn size(&self) -> usize {
        self.ty.size()
    }
}
