use super::finally::generate_and_insert_finally_blocks;
use super::{InlineEnv, InlineResult, InlineSession, LineMapping, MethodInliner, Returns, SourceCompilerForInline};
use crate::config::InlineConfig;
use crate::context::InlineCallSiteInfo;
use crate::default_lambda::expand_mask_conditions_and_update_variable_nodes;
use crate::errors::{InlineError, Result};
use crate::insn::analysis::compute_max_stack;
use crate::insn::markers::{
    inline_marker, is_suspend_marker, non_local_return_label, remove_finally_markers, AFTER_INLINE_CALL,
    BEFORE_INLINE_CALL, LOCAL_FOR_INLINE_FUNCTION,
};
use crate::insn::method::line_number_range;
use crate::insn::opcodes::*;
use crate::insn::{AsmType, ClassNode, Insn, InsnId, LabelId, LocalVariable, MethodId, MethodNode};
use crate::lambda::{DefaultLambda, FunctionalArgument, LambdaInfo};
use crate::params::{Parameters, ParametersBuilder};
use crate::reified::{ReifiedTypeInliner, TypeParameterMappings};
use crate::remap::{FieldRemapper, LocalVarRemapper};
use crate::smap::{SmapAndMethodNode, SmapBuilder, SmapParser, SourceMapCopier, SourceMapper, SourcePosition};
use rustc_hash::FxHashSet;
use std::rc::Rc;
use tracing::{debug, trace};

const DEFAULT_STUB_SUFFIX: &str = "$default";

/// One declared parameter of the callee as passed by the call, receiver
/// first.
#[derive(Debug, Clone)]
pub enum CallArgument {
    /// Computed by the caller and on the stack at the call.
    Value,
    /// A lambda written at the call site. Nothing is pushed for it.
    Lambda(Rc<LambdaInfo>),
    /// A suspend lambda passed on as a variable; it is called, not inlined.
    SuspendLambdaVariable,
    /// Omitted argument of a call to the `$default` stub; the caller pushed
    /// a placeholder.
    Default,
    /// Omitted inline functional argument of a `$default` call. A default
    /// lambda constructed by the stub is inlined like a call-site lambda.
    DefaultLambda,
}

/// What semantic analysis resolved about one inline call.
#[derive(Debug, Clone)]
pub struct InlineCall {
    pub callee: MethodId,
    pub call_site: InlineCallSiteInfo,
    pub arguments: Vec<CallArgument>,
    pub type_mappings: TypeParameterMappings,
    pub is_same_module: bool,
    /// Mask words passed to the `$default` stub; the stub also takes a
    /// method handle after them.
    pub default_masks: Option<Vec<i32>>,
}

impl InlineCall {
    pub fn new(callee: MethodId, call_site: InlineCallSiteInfo, arguments: Vec<CallArgument>) -> Self {
        Self {
            callee,
            call_site,
            arguments,
            type_mappings: TypeParameterMappings::new(),
            is_same_module: true,
            default_masks: None,
        }
    }

    pub fn with_type_mappings(mut self, type_mappings: TypeParameterMappings) -> Self {
        self.type_mappings = type_mappings;
        self
    }

    pub fn with_default_masks(mut self, masks: Vec<i32>) -> Self {
        self.default_masks = Some(masks);
        self
    }

    pub fn from_other_module(mut self) -> Self {
        self.is_same_module = false;
        self
    }

    /// Name of the inline function, also for calls to its `$default` stub.
    pub fn function_name(&self) -> &str {
        self.callee
            .name
            .strip_suffix(DEFAULT_STUB_SUFFIX)
            .unwrap_or(&self.callee.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Receiver,
    Argument(usize),
    Mask,
    MethodHandle,
}

/// A value the call instruction consumes, in push order.
#[derive(Debug, Clone)]
struct Operand {
    ty: AsmType,
    role: Role,
}

fn stack_operands(opcode: u8, request: &InlineCall) -> Result<Vec<Operand>> {
    let mut types = AsmType::argument_types(&request.callee.desc)?;
    if opcode != INVOKESTATIC {
        types.insert(0, AsmType::object(&request.callee.owner));
    }
    let masks = request.default_masks.as_ref().map_or(0, Vec::len);
    let stub_arguments = if request.default_masks.is_some() { masks + 1 } else { 0 };
    let declared = request.arguments.len();
    if types.len() != declared + stub_arguments {
        return Err(InlineError::internal(format!(
            "{} takes {} stack values but the call describes {}",
            request.callee,
            types.len(),
            declared + stub_arguments
        )));
    }
    Ok(types
        .into_iter()
        .enumerate()
        .map(|(index, ty)| {
            let role = match index {
                0 if opcode != INVOKESTATIC => Role::Receiver,
                i if i < declared => Role::Argument(i),
                i if i < declared + masks => Role::Mask,
                _ => Role::MethodHandle,
            };
            Operand { ty, role }
        })
        .collect())
}

fn is_pushed(operand: &Operand, arguments: &[CallArgument]) -> bool {
    match operand.role {
        Role::Argument(index) => !matches!(arguments[index], CallArgument::Lambda(_)),
        _ => true,
    }
}

/// Inlines calls to inline functions, one call at a time.
///
/// Calls inside a callee compiled from source come back through
/// [`SourceCompilerForInline::compile_inline_function`] with the same
/// codegen, which is how recursive inline cycles are detected.
pub struct InlineCodegen<'a> {
    env: InlineEnv<'a>,
    compiler: &'a dyn SourceCompilerForInline,
    call_stack: Vec<MethodId>,
}

impl<'a> InlineCodegen<'a> {
    pub fn new(env: InlineEnv<'a>, compiler: &'a dyn SourceCompilerForInline) -> Self {
        Self {
            env,
            compiler,
            call_stack: Vec::new(),
        }
    }

    pub fn env(&self) -> &InlineEnv<'a> {
        &self.env
    }

    /// Inline functions whose bodies are being inlined, outermost first.
    pub fn call_stack(&self) -> &[MethodId] {
        &self.call_stack
    }

    /// Replaces `call` in `caller` with the body of `request.callee`.
    ///
    /// Lines of the inlined code are added to `source_mapper`, the source
    /// map of the class `caller` belongs to. A call that is part of an
    /// inline cycle is reported and replaced by code that throws.
    pub fn inline_call(
        &mut self,
        caller: &mut MethodNode,
        call: InsnId,
        request: &InlineCall,
        source_mapper: &mut SourceMapper,
    ) -> Result<InlineResult> {
        let location = request.call_site.location();
        let opcode = match caller.instructions.get(call) {
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                ..
            } if *owner == request.callee.owner && *name == request.callee.name && *desc == request.callee.desc => {
                *opcode
            }
            other => {
                return Err(InlineError::internal(format!(
                    "Expected a call of {} at {location}, found {other:?}",
                    request.callee
                )))
            }
        };

        if self.call_stack.contains(&request.callee) {
            self.replace_with_cycle_stub(caller, call, opcode, request)?;
            return Ok(InlineResult::new());
        }

        debug!(callee = %request.callee, at = %location, "inlining call");
        self.call_stack.push(request.callee.clone());
        let result = self.inline_call_at(caller, call, opcode, request, source_mapper);
        self.call_stack.pop();
        result.map_err(|err| err.at_call_site(location))
    }

    fn inline_call_at(
        &mut self,
        caller: &mut MethodNode,
        call: InsnId,
        opcode: u8,
        request: &InlineCall,
        source_mapper: &mut SourceMapper,
    ) -> Result<InlineResult> {
        let compiler = self.compiler;
        let SmapAndMethodNode { mut node, smap } = match compiler.compile_inline_function(&request.callee, self)? {
            Some(compiled) => compiled,
            None => self.load_compiled_body(&request.callee)?,
        };
        node.refresh_labels();

        for argument in &request.arguments {
            if let CallArgument::Lambda(lambda) = argument {
                if !lambda.is_finalized() {
                    let (body, captured_vars) = compiler.generate_lambda_body(lambda)?;
                    lambda.finalize(body, captured_vars)?;
                }
            }
        }

        let mut result = InlineResult::new();
        let usages = ReifiedTypeInliner::new(
            Some(&request.type_mappings),
            self.env.intrinsics,
            self.env.config.unified_null_checks,
        )
        .reify_instructions(&mut node);
        result.reified_type_parameters_usages.merge_all(&usages);

        let operands = stack_operands(opcode, request)?;
        let default_lambdas = self.expand_defaults(&mut node, request, &operands)?;
        let function_name = request.function_name();
        add_inline_function_marker(&mut node, function_name)?;

        let parameters = build_parameters(&operands, &request.arguments, &default_lambdas)?;
        let shift = caller.compute_max_locals()?.max(caller.max_locals);
        let local_remapper = LocalVarRemapper::new(&parameters, shift);
        let remapper = FieldRemapper::root(&parameters);

        let mut session = InlineSession::new(self.env);
        let context = session.contexts.new_root(
            request.call_site.clone(),
            function_name,
            request.type_mappings.clone(),
        );
        let call_site = &request.call_site;
        let position = call_site
            .file
            .as_ref()
            .filter(|_| call_site.line_number >= 0)
            .map(|file| SourcePosition::new(call_site.line_number, file, &call_site.owner_class_name));
        let mut lines = LineMapping::new(SourceMapCopier::new(smap, position), source_mapper);
        let return_labels = [function_name.to_string()];
        let inlined = MethodInliner::new(
            node,
            &parameters,
            context,
            &remapper,
            request.is_same_module,
            call_site.clone(),
        )
        .do_inline(&mut session, &local_remapper, &mut lines, Returns::Local(&return_labels))?;
        result.merge(inlined.result);

        let mut body = inlined.node;
        let first_free_local = body.max_locals.max(shift + local_remapper.actual_params_size());
        generate_and_insert_finally_blocks(&mut body, &inlined.finally_points, compiler, first_free_local)?;
        if !compiler.is_finally_marker_required() {
            remove_finally_markers(&mut body);
            remove_non_local_return_markers(&mut body);
        }

        let mut spill = Vec::new();
        let declared: Vec<_> = parameters.iter().filter(|p| !p.is_captured()).collect();
        for (info, operand) in declared.iter().zip(&operands).rev() {
            if !is_pushed(operand, &request.arguments) {
                continue;
            }
            if info.is_skipped {
                spill.push(Insn::Simple(if info.size() == 2 { POP2 } else { POP }));
            } else {
                let slot = parameters.declaration_slot(info);
                local_remapper.visit_var_insn(info.ty.opcode(ISTORE), slot, &mut spill)?;
            }
        }

        let mark_stack = requires_empty_stack_on_entry(&body);
        let has_lines = body
            .instructions
            .iter()
            .any(|(_, insn)| matches!(insn, Insn::LineNumber { .. }));
        let list = &mut caller.instructions;
        if mark_stack {
            list.insert_before(call, inline_marker(BEFORE_INLINE_CALL));
        }
        for insn in spill {
            list.insert_before(call, insn);
        }
        for insn in body.instructions.into_vec() {
            list.insert_before(call, insn);
        }
        // the code after the call is back on the caller's line
        if has_lines && call_site.line_number >= 0 {
            let restore = LabelId::fresh();
            list.insert_before(call, Insn::Label(restore));
            list.insert_before(
                call,
                Insn::LineNumber {
                    line: call_site.line_number,
                    start: restore,
                },
            );
        }
        if mark_stack {
            list.insert_before(call, inline_marker(AFTER_INLINE_CALL));
        }
        list.remove(call);

        caller.try_catch_blocks.splice(0..0, body.try_catch_blocks);
        caller.local_variables.extend(body.local_variables);
        caller.max_locals = caller
            .max_locals
            .max(body.max_locals)
            .max(caller.compute_max_locals()?);
        caller.max_stack = compute_max_stack(caller)?;
        trace!(
            callee = %request.callee,
            regenerated = result.regenerated_classes.len(),
            "call inlined"
        );
        Ok(result)
    }

    /// Body of a callee from compiled classes, through the method cache.
    fn load_compiled_body(&self, callee: &MethodId) -> Result<SmapAndMethodNode> {
        let cached = self.env.cache.get_or_compute_method_node(callee, || {
            let class = self.env.load_class(&callee.owner)?;
            let method = class
                .find_method(&callee.name, &callee.desc)
                .ok_or_else(|| InlineError::MethodNotFound {
                    owner: callee.owner.clone(),
                    name: callee.name.clone(),
                    desc: callee.desc.clone(),
                })?;
            let (start, end) = line_number_range(&class.methods);
            let smap = SmapParser::parse_or_create_default(
                class.source_debug.as_deref(),
                class.source_file.as_deref(),
                &class.name,
                start,
                end,
            );
            Ok(SmapAndMethodNode::new(method.clone(), smap))
        })?;
        Ok(SmapAndMethodNode::clone(&cached))
    }

    /// Resolves the mask guards of a `$default` stub and loads the default
    /// lambdas it constructs, by parameter slot.
    fn expand_defaults(
        &self,
        node: &mut MethodNode,
        request: &InlineCall,
        operands: &[Operand],
    ) -> Result<Vec<Rc<DefaultLambda>>> {
        let Some(masks) = &request.default_masks else {
            return Ok(Vec::new());
        };
        let mut offset = 0;
        let mut mask_start = None;
        let mut method_handle = None;
        let mut valid_offsets = FxHashSet::default();
        for operand in operands {
            match operand.role {
                Role::Argument(index) if matches!(request.arguments[index], CallArgument::DefaultLambda) => {
                    valid_offsets.insert(offset);
                }
                Role::Mask if mask_start.is_none() => mask_start = Some(offset),
                Role::MethodHandle => method_handle = Some(offset),
                _ => {}
            }
            offset += operand.ty.size();
        }

        let extracted = expand_mask_conditions_and_update_variable_nodes(
            node,
            mask_start.unwrap_or(offset),
            masks,
            method_handle,
            &valid_offsets,
        )?;
        let mut lambdas = Vec::with_capacity(extracted.len());
        for lambda in extracted {
            trace!(class = %lambda.ty, offset = lambda.offset, "default lambda extracted");
            let class = self.env.load_class(&lambda.ty)?;
            let default = DefaultLambda::load(&class, lambda.offset, lambda.needs_reification, lambda.captured_args)?;
            lambdas.push(Rc::new(default));
        }
        lambdas.sort_by_key(|lambda| lambda.offset);
        Ok(lambdas)
    }

    /// Pops the call's operands and throws instead of inlining.
    fn replace_with_cycle_stub(
        &self,
        caller: &mut MethodNode,
        call: InsnId,
        opcode: u8,
        request: &InlineCall,
    ) -> Result<()> {
        let name = request.function_name();
        self.env.diagnostics.error(
            &request.call_site.location(),
            &format!("The '{name}' invocation is a part of inline cycle"),
        );
        debug!(callee = %request.callee, "inline cycle, generating stub");

        let operands = stack_operands(opcode, request)?;
        let list = &mut caller.instructions;
        for operand in operands.iter().rev() {
            if is_pushed(operand, &request.arguments) {
                list.insert_before(call, Insn::Simple(if operand.ty.size() == 2 { POP2 } else { POP }));
            }
        }
        let exception = "java/lang/UnsupportedOperationException";
        for insn in [
            Insn::type_insn(NEW, exception),
            Insn::Simple(DUP),
            Insn::ldc_string(format!("Call is part of inline cycle: {name}")),
            Insn::method(INVOKESPECIAL, exception, "<init>", "(Ljava/lang/String;)V"),
            Insn::Simple(ATHROW),
        ] {
            list.insert_before(call, insn);
        }
        list.remove(call);
        caller.max_stack = caller.max_stack.max(3);
        Ok(())
    }
}

/// Parameters of the callee for this call: receiver and arguments in
/// declaration order (masks and method handle skipped), then the captured
/// variables of the call-site lambdas, read from the caller, and those of
/// default lambdas, which get locals of their own.
fn build_parameters(
    operands: &[Operand],
    arguments: &[CallArgument],
    default_lambdas: &[Rc<DefaultLambda>],
) -> Result<Parameters> {
    let mut builder = ParametersBuilder::new();
    for operand in operands {
        let offset = builder.next_parameter_offset();
        let (skipped, functional_argument) = match operand.role {
            Role::Mask | Role::MethodHandle => (true, None),
            Role::Receiver => (false, None),
            Role::Argument(index) => match &arguments[index] {
                CallArgument::Value | CallArgument::Default => (false, None),
                CallArgument::Lambda(lambda) => (true, Some(FunctionalArgument::ExpressionLambda(Rc::clone(lambda)))),
                CallArgument::SuspendLambdaVariable => (false, Some(FunctionalArgument::NonInlineSuspendVariable)),
                CallArgument::DefaultLambda => match default_lambdas.iter().find(|l| l.offset == offset) {
                    Some(lambda) => (true, Some(FunctionalArgument::DefaultLambda(Rc::clone(lambda)))),
                    None => (false, Some(FunctionalArgument::DefaultValueOfInlineParameter)),
                },
            },
        };
        let info = if operand.role == Role::Receiver {
            builder.add_this(operand.ty.clone(), skipped)
        } else {
            builder.add_next_parameter(operand.ty.clone(), skipped)
        };
        info.functional_argument = functional_argument;
    }

    for argument in arguments {
        let CallArgument::Lambda(lambda) = argument else {
            continue;
        };
        for var in lambda.captured_vars()? {
            let value = var.value.clone().ok_or_else(|| {
                InlineError::internal(format!(
                    "No value at the call site for {} captured by {}",
                    var.desc.field_name, lambda.lambda_class
                ))
            })?;
            builder
                .add_captured_param(var.desc.clone(), var.desc.field_name.clone(), false)
                .remap_value = Some(value);
        }
    }
    for lambda in default_lambdas {
        for var in lambda.info.captured_vars()? {
            builder.add_captured_param(var.desc.clone(), var.desc.field_name.clone(), false);
        }
    }
    Ok(builder.build_parameters())
}

/// `$i$f$<name>`, live over the whole body, tells debuggers which inline
/// function the code came from.
fn add_inline_function_marker(node: &mut MethodNode, function_name: &str) -> Result<()> {
    let index = node
        .compute_max_locals()?
        .max(node.max_locals)
        .max(node.args_size()?);
    let (start, end) = (LabelId::fresh(), LabelId::fresh());
    let list = &mut node.instructions;
    list.push_front(Insn::var(ISTORE, index));
    list.push_front(Insn::int_const(0));
    list.push_front(Insn::Label(start));
    list.push(Insn::Label(end));
    node.local_variables.push(LocalVariable::new(
        format!("{LOCAL_FOR_INLINE_FUNCTION}{function_name}"),
        "I",
        start,
        end,
        index,
    ));
    node.max_locals = index + 1;
    Ok(())
}

fn remove_non_local_return_markers(node: &mut MethodNode) {
    let list = &mut node.instructions;
    for id in list.ids() {
        if non_local_return_label(list.get(id)).is_some() {
            list.remove(id);
        }
    }
}

/// The caller has to store its stack before the body: it catches
/// exceptions, suspends or loops.
fn requires_empty_stack_on_entry(node: &MethodNode) -> bool {
    if !node.try_catch_blocks.is_empty() {
        return true;
    }
    let positions = node.instructions.label_positions();
    node.instructions.iter().enumerate().any(|(index, (_, insn))| {
        is_suspend_marker(insn)
            || insn
                .jump_targets()
                .iter()
                .any(|label| positions.get(label).is_some_and(|target| *target <= index))
    })
}

/// Writes the source map of everything inlined into `class` as its
/// `SourceDebugExtension`.
pub fn attach_source_map(class: &mut ClassNode, mapper: &SourceMapper, config: &InlineConfig) {
    if !config.generate_smap || mapper.is_trivial() {
        return;
    }
    let mappings = mapper.result_mappings();
    let (source, path) = match mapper.source_info() {
        Some(info) => (info.file_name.clone(), info.path.clone()),
        None => (class.source_file.clone().unwrap_or_default(), class.name.clone()),
    };
    let builder = SmapBuilder::new(&source, &path, &mappings, config.backwards_compatible_smap_syntax());
    if let Some(smap) = builder.build() {
        class.source_debug = Some(smap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InlineCache;
    use crate::diagnostics::{CollectingDiagnosticHandler, DiagnosticHandler};
    use crate::inliner::ClassProvider;
    use crate::insn::InsnList;
    use crate::lambda::CapturedVar;
    use crate::reified::DefaultIntrinsics;
    use crate::smap::{Smap, SourceInfo};
    use crate::transform::NoCoroutineSupport;
    use std::collections::HashMap;

    struct Classes(HashMap<String, Vec<u8>>);

    impl ClassProvider for Classes {
        fn class_bytes(&self, internal_name: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.0.get(internal_name).cloned())
        }
    }

    /// Compiles nothing from source; `body` answers for one method and
    /// recursively inlines its own call to that method.
    struct Recursive {
        callee: MethodId,
    }

    impl SourceCompilerForInline for Recursive {
        fn compile_inline_function(
            &self,
            callee: &MethodId,
            codegen: &mut InlineCodegen<'_>,
        ) -> anyhow::Result<Option<SmapAndMethodNode>> {
            assert_eq!(*callee, self.callee);
            let mut body = MethodNode::new(ACC_STATIC, "f", "()V");
            body.instructions = InsnList::from(vec![
                Insn::method(INVOKESTATIC, "a/Lib", "f", "()V"),
                Insn::Simple(RETURN),
            ]);
            let call = body.instructions.first().unwrap();
            let request = InlineCall::new(callee.clone(), InlineCallSiteInfo::new("a/Lib", "f", "()V"), Vec::new());
            let mut mapper = SourceMapper::new(None);
            codegen.inline_call(&mut body, call, &request, &mut mapper)?;
            Ok(Some(SmapAndMethodNode::new(body, Smap::new(Vec::new()))))
        }

        fn generate_lambda_body(&self, lambda: &LambdaInfo) -> anyhow::Result<(SmapAndMethodNode, Vec<CapturedVar>)> {
            anyhow::bail!("unexpected lambda {}", lambda.lambda_class)
        }
    }

    struct FromClasses;

    impl SourceCompilerForInline for FromClasses {
        fn compile_inline_function(
            &self,
            _callee: &MethodId,
            _codegen: &mut InlineCodegen<'_>,
        ) -> anyhow::Result<Option<SmapAndMethodNode>> {
            Ok(None)
        }

        fn generate_lambda_body(&self, lambda: &LambdaInfo) -> anyhow::Result<(SmapAndMethodNode, Vec<CapturedVar>)> {
            anyhow::bail!("unexpected lambda {}", lambda.lambda_class)
        }
    }

    fn with_codegen(
        classes: Vec<ClassNode>,
        compiler: &dyn SourceCompilerForInline,
        test: impl FnOnce(&mut InlineCodegen<'_>, &CollectingDiagnosticHandler),
    ) {
        let config = InlineConfig::default();
        let cache = InlineCache::new(&config);
        let diagnostics = CollectingDiagnosticHandler::new();
        let classes = Classes(
            classes
                .into_iter()
                .map(|class| (class.name.clone(), class.to_bytes().unwrap()))
                .collect(),
        );
        let env = InlineEnv {
            config: &config,
            classes: &classes,
            cache: &cache,
            intrinsics: &DefaultIntrinsics,
            coroutines: &NoCoroutineSupport,
            diagnostics: &diagnostics,
        };
        let mut codegen = InlineCodegen::new(env, compiler);
        test(&mut codegen, &diagnostics);
    }

    /// `inline fun twice(x: Int) = x + x` in `a/Lib`
    fn lib_class() -> ClassNode {
        let mut class = ClassNode::new(ACC_PUBLIC | ACC_FINAL, "a/Lib", "java/lang/Object");
        class.source_file = Some("Lib.kt".into());
        let start = LabelId::fresh();
        let mut twice = MethodNode::new(ACC_PUBLIC | ACC_STATIC, "twice", "(I)I");
        twice.instructions = InsnList::from(vec![
            Insn::Label(start),
            Insn::LineNumber { line: 3, start },
            Insn::var(ILOAD, 0),
            Insn::var(ILOAD, 0),
            Insn::Simple(IADD),
            Insn::Simple(IRETURN),
        ]);
        twice.max_locals = 1;
        twice.max_stack = 2;
        class.methods.push(twice);
        class
    }

    fn caller_of_twice() -> (MethodNode, InsnId) {
        let mut caller = MethodNode::new(ACC_STATIC, "run", "(I)I");
        caller.instructions = InsnList::from(vec![
            Insn::var(ILOAD, 0),
            Insn::method(INVOKESTATIC, "a/Lib", "twice", "(I)I"),
            Insn::Simple(IRETURN),
        ]);
        caller.max_locals = 1;
        caller.max_stack = 1;
        let call = caller.instructions.ids()[1];
        (caller, call)
    }

    #[test]
    fn test_compiled_callee_is_spliced() {
        with_codegen(vec![lib_class()], &FromClasses, |codegen, diagnostics| {
            let (mut caller, call) = caller_of_twice();
            let request = InlineCall::new(
                MethodId::new("a/Lib", "twice", "(I)I"),
                InlineCallSiteInfo {
                    file: Some("Main.kt".into()),
                    line_number: 7,
                    ..InlineCallSiteInfo::new("a/Main", "run", "(I)I")
                },
                vec![CallArgument::Value],
            );
            let mut mapper = SourceMapper::new(Some(SourceInfo::new("Main.kt", "a/Main", 10)));
            codegen.inline_call(&mut caller, call, &request, &mut mapper).unwrap();
            assert!(!diagnostics.has_errors());

            let insns = caller.instructions.to_vec();
            assert!(!insns.iter().any(|insn| insn.is_method_call("a/Lib", "twice")));
            // the argument is spilled after the caller's own local
            assert_eq!(insns[1], Insn::var(ISTORE, 1));
            assert!(insns.contains(&Insn::var(ILOAD, 1)));
            assert!(insns.contains(&Insn::Simple(IADD)));
            assert_eq!(insns.iter().filter(|insn| insn.is_return()).count(), 1);
            // callee lines land after the caller's file
            assert!(insns.iter().any(|insn| matches!(insn, Insn::LineNumber { line: 11, .. })));
            assert!(insns.iter().any(|insn| matches!(insn, Insn::LineNumber { line: 7, .. })));

            let marker = caller
                .local_variables
                .iter()
                .find(|local| local.name == "$i$f$twice")
                .unwrap();
            assert_eq!(marker.index, 2);
            assert_eq!(caller.max_locals, 3);
            assert_eq!(caller.max_stack, 2);
            assert!(!mapper.is_trivial());
        });
    }

    #[test]
    fn test_missing_callee_reports_location() {
        with_codegen(Vec::new(), &FromClasses, |codegen, _| {
            let (mut caller, call) = caller_of_twice();
            let request = InlineCall::new(
                MethodId::new("a/Lib", "twice", "(I)I"),
                InlineCallSiteInfo::new("a/Main", "run", "(I)I"),
                vec![CallArgument::Value],
            );
            let mut mapper = SourceMapper::new(None);
            let err = codegen
                .inline_call(&mut caller, call, &request, &mut mapper)
                .unwrap_err();
            match err {
                InlineError::CallSite { location, source } => {
                    assert_eq!(location, "a/Main.run(I)I");
                    assert!(matches!(*source, InlineError::ClassNotFound { .. }));
                }
                other => panic!("unexpected error {other:?}"),
            }
        });
    }

    #[test]
    fn test_recursive_call_becomes_stub() {
        let callee = MethodId::new("a/Lib", "f", "()V");
        let compiler = Recursive { callee: callee.clone() };
        with_codegen(Vec::new(), &compiler, |codegen, diagnostics| {
            let mut caller = MethodNode::new(ACC_STATIC, "run", "()V");
            caller.instructions = InsnList::from(vec![
                Insn::method(INVOKESTATIC, "a/Lib", "f", "()V"),
                Insn::Simple(RETURN),
            ]);
            let call = caller.instructions.first().unwrap();
            let request = InlineCall::new(callee, InlineCallSiteInfo::new("a/Main", "run", "()V"), Vec::new());
            let mut mapper = SourceMapper::new(None);
            codegen.inline_call(&mut caller, call, &request, &mut mapper).unwrap();

            assert_eq!(diagnostics.error_count(), 1);
            assert!(diagnostics.get_diagnostics()[0].message.contains("inline cycle"));
            let insns = caller.instructions.to_vec();
            assert!(insns.contains(&Insn::type_insn(NEW, "java/lang/UnsupportedOperationException")));
            assert!(insns.contains(&Insn::Simple(ATHROW)));
            assert!(codegen.call_stack().is_empty());
        });
    }

    #[test]
    fn test_loops_require_empty_stack() {
        let top = LabelId::fresh();
        let mut node = MethodNode::new(ACC_STATIC, "f", "()V");
        node.instructions = InsnList::from(vec![Insn::Label(top), Insn::jump(GOTO, top)]);
        assert!(requires_empty_stack_on_entry(&node));

        let exit = LabelId::fresh();
        node.instructions = InsnList::from(vec![Insn::jump(GOTO, exit), Insn::Label(exit)]);
        assert!(!requires_empty_stack_on_entry(&node));
    }

    #[test]
    fn test_source_map_attached_only_when_lines_were_inlined() {
        let config = InlineConfig::default();
        let mut class = ClassNode::new(ACC_PUBLIC, "a/Main", "java/lang/Object");
        let mut mapper = SourceMapper::new(Some(SourceInfo::new("Main.kt", "a/Main", 10)));
        attach_source_map(&mut class, &mapper, &config);
        assert!(class.source_debug.is_none());

        mapper.map_line_number(&SourcePosition::new(3, "Lib.kt", "a/Lib"), None);
        attach_source_map(&mut class, &mapper, &config);
        let smap = class.source_debug.unwrap();
        assert!(smap.starts_with("SMAP\nMain.kt\nKotlin\n"));
        assert!(smap.contains("Lib.kt"));
    }
}
