//! Functional arguments of an inline call and the lambdas behind them.
//!
//! A lambda is declared when the call site is analysed (class, invoke
//! method) and finalized exactly once when its body is available. Anything
//! that needs the body before that is a bug in the driver.

use crate::errors::{InlineError, Result};
use crate::insn::markers::{find_captured_field_assignments, CAPTURED_RECEIVER_FIELD};
use crate::insn::opcodes::*;
use crate::insn::{AsmType, ClassNode, Insn, MethodNode, StackValue};
use crate::params::{CapturedParamDesc, Parameters, ParametersBuilder};
use crate::remap::FieldRemapper;
use crate::smap::{SmapAndMethodNode, SmapParser};
use std::cell::OnceCell;
use std::rc::Rc;

/// What the call site passes for a functional parameter.
#[derive(Debug, Clone)]
pub enum FunctionalArgument {
    /// Lambda literal written at the call site.
    ExpressionLambda(Rc<LambdaInfo>),
    /// Default value of an inline functional parameter that is a lambda.
    DefaultLambda(Rc<DefaultLambda>),
    /// Inline lambda stored in a variable and called from a suspend context.
    NonInlineSuspendVariable,
    /// Parameter left to its default value, before extraction.
    DefaultValueOfInlineParameter,
}

impl FunctionalArgument {
    /// The lambda to inline, if this argument is one.
    pub fn lambda(&self) -> Option<&LambdaInfo> {
        match self {
            FunctionalArgument::ExpressionLambda(lambda) => Some(lambda),
            FunctionalArgument::DefaultLambda(default) => Some(&default.info),
            _ => None,
        }
    }

    pub fn is_inlinable(&self) -> bool {
        self.lambda().is_some()
    }
}

/// A captured variable of a lambda and, for lambdas written at the call
/// site, where the caller keeps its value.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedVar {
    pub desc: CapturedParamDesc,
    pub value: Option<StackValue>,
}

impl CapturedVar {
    pub fn new(desc: CapturedParamDesc, value: Option<StackValue>) -> Self {
        Self { desc, value }
    }
}

#[derive(Debug)]
struct FinalizedLambda {
    body: SmapAndMethodNode,
    captured_vars: Vec<CapturedVar>,
}

#[derive(Debug)]
pub struct LambdaInfo {
    /// Internal name of the lambda class.
    pub lambda_class: String,
    pub invoke_name: String,
    pub invoke_desc: String,
    pub is_crossinline: bool,
    pub is_suspend: bool,
    pub is_bound_callable_reference: bool,
    /// False for static callable references, whose `invoke` has no receiver.
    pub has_dispatch_receiver: bool,
    /// Labels a `return@label` inside the body may use to leave the lambda.
    pub return_labels: Vec<String>,
    finalized: OnceCell<FinalizedLambda>,
}

impl LambdaInfo {
    pub fn new(
        lambda_class: impl Into<String>,
        invoke_name: impl Into<String>,
        invoke_desc: impl Into<String>,
    ) -> Self {
        Self {
            lambda_class: lambda_class.into(),
            invoke_name: invoke_name.into(),
            invoke_desc: invoke_desc.into(),
            is_crossinline: false,
            is_suspend: false,
            is_bound_callable_reference: false,
            has_dispatch_receiver: true,
            return_labels: Vec::new(),
            finalized: OnceCell::new(),
        }
    }

    pub fn with_return_labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.return_labels.extend(labels);
        self
    }

    pub fn crossinline(mut self, is_crossinline: bool) -> Self {
        self.is_crossinline = is_crossinline;
        self
    }

    pub fn suspend(mut self, is_suspend: bool) -> Self {
        self.is_suspend = is_suspend;
        self
    }

    pub fn lambda_type(&self) -> AsmType {
        AsmType::object(&self.lambda_class)
    }

    pub fn invoke_param_types(&self) -> Result<Vec<AsmType>> {
        AsmType::argument_types(&self.invoke_desc)
    }

    pub fn invoke_return_type(&self) -> Result<AsmType> {
        AsmType::return_type(&self.invoke_desc)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.get().is_some()
    }

    /// Supplies the compiled body and the captured variables.
    pub fn finalize(&self, body: SmapAndMethodNode, captured_vars: Vec<CapturedVar>) -> Result<()> {
        self.finalized
            .set(FinalizedLambda {
                body,
                captured_vars,
            })
            .map_err(|_| {
                InlineError::internal(format!("Lambda {} is already finalized", self.lambda_class))
            })
    }

    fn finalized(&self) -> Result<&FinalizedLambda> {
        self.finalized.get().ok_or_else(|| {
            InlineError::internal(format!(
                "Lambda {} is used before its body was generated",
                self.lambda_class
            ))
        })
    }

    pub fn node(&self) -> Result<&SmapAndMethodNode> {
        Ok(&self.finalized()?.body)
    }

    pub fn captured_vars(&self) -> Result<&[CapturedVar]> {
        Ok(&self.finalized()?.captured_vars)
    }

    pub fn is_return_from_me(&self, label: &str) -> bool {
        self.return_labels.iter().any(|it| it == label)
    }

    /// Parameters of the body when it is inlined into the level described
    /// by `remapper`: a skipped receiver, the `invoke` arguments, then every
    /// captured variable, read from wherever that level keeps it.
    ///
    /// `this_argument` is the argument this lambda was passed as; code that
    /// hands the lambda's own `this` to an object sees it through the
    /// receiver.
    pub fn add_all_parameters(
        &self,
        remapper: &FieldRemapper<'_>,
        this_argument: Option<FunctionalArgument>,
    ) -> Result<Parameters> {
        let mut builder = ParametersBuilder::new();
        if self.has_dispatch_receiver {
            builder.add_this(AsmType::java_object(), true).functional_argument = this_argument;
        }
        for ty in self.invoke_param_types()? {
            builder.add_next_parameter(ty, false);
        }
        for var in self.captured_vars()? {
            let (level, original) = remapper
                .find_field(&var.desc.containing_lambda, &var.desc.field_name)
                .ok_or_else(|| {
                    InlineError::internal(format!(
                        "Captured field not found: {}.{}",
                        var.desc.containing_lambda, var.desc.field_name
                    ))
                })?;
            let value = remapper.captured_value_from(level, original);
            let info = builder.add_captured_param_from(original, var.desc.field_name.clone());
            info.remap_value = value;
            if let Some(captured) = info.captured.as_mut() {
                captured.desc = var.desc.clone();
            }
        }
        Ok(builder.build_parameters())
    }
}

/// A lambda that is the default value of an inline functional parameter,
/// compiled into its own class by the callee's module.
#[derive(Debug)]
pub struct DefaultLambda {
    pub info: LambdaInfo,
    /// Declaration slot of the parameter it is the default of.
    pub offset: usize,
    pub needs_reification: bool,
    /// Constructor argument types, i.e. what the fake call consumes.
    pub captured_args: Vec<AsmType>,
}

impl DefaultLambda {
    /// Declares and finalizes the lambda from its class: the `invoke`
    /// body, and the captured fields its constructor assigns (or the bound
    /// receiver of a callable reference).
    pub fn load(
        class: &ClassNode,
        offset: usize,
        needs_reification: bool,
        captured_args: Vec<AsmType>,
    ) -> Result<Self> {
        let invoke = find_invoke(class)?;
        let mut info = LambdaInfo::new(&class.name, &invoke.name, &invoke.desc);
        info.is_bound_callable_reference = is_callable_reference(class) && !captured_args.is_empty();
        info.has_dispatch_receiver = !invoke.is_static();

        let constructor_desc = AsmType::method_descriptor(&captured_args, &AsmType::Void);
        let constructor = class.find_method("<init>", &constructor_desc);
        if constructor.is_none() && !captured_args.is_empty() {
            return Err(InlineError::MethodNotFound {
                owner: class.name.clone(),
                name: "<init>".into(),
                desc: constructor_desc,
            });
        }

        let mut node = invoke.clone();
        let captured_vars = if is_callable_reference(class) {
            match captured_args.as_slice() {
                [receiver] => {
                    let receiver = receiver.boxed();
                    redirect_bound_receiver(&mut node, &class.name, &receiver);
                    vec![CapturedVar::new(
                        CapturedParamDesc::new(&class.name, CAPTURED_RECEIVER_FIELD, receiver),
                        None,
                    )]
                }
                _ => Vec::new(),
            }
        } else {
            constructor
                .map(|constructor| captured_fields(&class.name, constructor))
                .transpose()?
                .unwrap_or_default()
        };

        let (start, end) = node.line_number_range().unwrap_or((0, 0));
        let smap = SmapParser::parse_or_create_default(
            class.source_debug.as_deref(),
            class.source_file.as_deref(),
            &class.name,
            start,
            end,
        );
        info.finalize(SmapAndMethodNode::new(node, smap), captured_vars)?;
        Ok(Self {
            info,
            offset,
            needs_reification,
            captured_args,
        })
    }
}

fn find_invoke(class: &ClassNode) -> Result<&MethodNode> {
    // bridges are synthetic
    let invokes = || class.methods.iter().filter(|m| m.name == "invoke");
    invokes()
        .find(|m| m.access & ACC_SYNTHETIC == 0)
        .or_else(|| invokes().next())
        .ok_or_else(|| InlineError::MethodNotFound {
            owner: class.name.clone(),
            name: "invoke".into(),
            desc: String::new(),
        })
}

fn is_callable_reference(class: &ClassNode) -> bool {
    class.super_name.as_deref().is_some_and(|name| {
        name.starts_with("kotlin/jvm/internal/FunctionReference")
            || name.starts_with("kotlin/jvm/internal/PropertyReference")
    })
}

fn captured_fields(owner: &str, constructor: &MethodNode) -> Result<Vec<CapturedVar>> {
    find_captured_field_assignments(constructor)
        .into_iter()
        .map(|id| match constructor.instructions.get(id) {
            Insn::Field { name, desc, .. } => Ok(CapturedVar::new(
                CapturedParamDesc::new(owner, name.clone(), AsmType::from_descriptor(desc)?),
                None,
            )),
            other => Err(InlineError::internal(format!(
                "Expected a captured field store, got {other}"
            ))),
        })
        .collect()
}

/// Callable references read their receiver from the inherited
/// `receiver` field; point those reads at the captured field instead.
fn redirect_bound_receiver(node: &mut MethodNode, owner: &str, receiver: &AsmType) {
    for id in node.instructions.ids() {
        if let Insn::Field {
            opcode: GETFIELD,
            owner: field_owner,
            name,
            ..
        } = node.instructions.get(id)
        {
            if name == "receiver" && field_owner.starts_with("kotlin/jvm/internal/") {
                node.instructions.set(
                    id,
                    Insn::field(GETFIELD, owner, CAPTURED_RECEIVER_FIELD, receiver.descriptor()),
                );
            }
        }
    }
}
