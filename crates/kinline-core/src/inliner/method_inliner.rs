use super::returns::{process_returns, PointForExternalFinallyBlocks};
use super::{InlineResult, InlineSession};
use crate::context::{ContextId, InlineCallSiteInfo};
use crate::errors::{InlineError, Result};
use crate::insn::analysis::{compute_max_stack, Frames, Origin};
use crate::insn::markers::{
    default_lambda_fake_call_offset, fold_name, inline_marker, is_anonymous_constructor_call,
    is_anonymous_singleton_load, is_fake_local_variable_for_inline, unfold_name,
    AFTER_INLINE_CALL, ASSERTIONS_DISABLED_FIELD, BEFORE_INLINE_CALL, INLINE_FUN_VAR_SUFFIX,
    LOCAL_FOR_INLINE_ARGUMENT, THIS,
};
use crate::insn::opcodes::*;
use crate::insn::stack_value::coerce;
use crate::insn::{AsmType, Insn, InsnId, LabelId, LocalVariable, MethodNode};
use crate::lambda::{DefaultLambda, FunctionalArgument};
use crate::params::{CapturedParamDesc, Parameters};
use crate::reified::{is_need_class_reification_marker, ReifiedTypeInliner};
use crate::remap::{FieldRemapper, FieldRemapperKind, LocalVarRemapper};
use crate::smap::{Smap, SourceMapCopier, SourceMapper, SourcePosition};
use crate::transform::{AnonymousObjectTransformationInfo, AnonymousObjectTransformer};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;
use tracing::{debug, trace};

/// Copies the line numbers of one inlined body into the source map of the
/// class that receives the code.
pub(crate) struct LineMapping<'m> {
    copier: SourceMapCopier,
    mapper: &'m mut SourceMapper,
}

impl<'m> LineMapping<'m> {
    pub fn new(copier: SourceMapCopier, mapper: &'m mut SourceMapper) -> Self {
        Self { copier, mapper }
    }

    /// Line in the receiving class, -1 if the line cannot be mapped.
    pub fn map(&mut self, line: i32) -> i32 {
        self.copier.map_line_number(self.mapper, line)
    }

    /// Mapping for a body inlined into the current one; both end up in
    /// the same class.
    pub fn nested(&mut self, smap: Smap, call_site: Option<SourcePosition>) -> LineMapping<'_> {
        LineMapping {
            copier: SourceMapCopier::new(smap, call_site),
            mapper: &mut *self.mapper,
        }
    }
}

pub(crate) enum Returns<'l> {
    /// Returns jump past the end of the body. Returns marked with one of
    /// these labels are local too.
    Local(&'l [String]),
    /// Methods of regenerated objects keep their returns.
    Keep,
}

#[derive(Debug)]
pub(crate) struct InlinedBody {
    pub node: MethodNode,
    pub result: InlineResult,
    pub finally_points: Vec<PointForExternalFinallyBlocks>,
}

struct LambdaInvocation {
    invoke: InsnId,
    argument: FunctionalArgument,
}

struct ObjectConstruction {
    constructor: Option<InsnId>,
    info: AnonymousObjectTransformationInfo,
}

#[derive(Default)]
struct Inlinables {
    /// Loads of inline lambdas, with their casts.
    removed_loads: Vec<InsnId>,
    invocations: Vec<LambdaInvocation>,
    constructions: Vec<ObjectConstruction>,
}

/// A class already regenerated for this body; later constructions of it
/// reuse the new class.
struct Regenerated {
    new_constructor_desc: Option<String>,
    recaptured: Vec<CapturedParamDesc>,
}

/// Transforms one body for the level it is inlined at: an inline function
/// called from the caller, an inline lambda called from an inlined body, or
/// a method of a regenerated object.
///
/// The body is rewritten in its own slot space first (lambdas inlined,
/// objects regenerated, captured fields resolved, types remapped), then
/// copied with every slot translated into the frame it lands in.
pub(crate) struct MethodInliner<'r> {
    node: MethodNode,
    parameters: &'r Parameters,
    context: ContextId,
    remapper: &'r FieldRemapper<'r>,
    is_same_module: bool,
    call_site: InlineCallSiteInfo,
}

impl<'r> MethodInliner<'r> {
    pub fn new(
        node: MethodNode,
        parameters: &'r Parameters,
        context: ContextId,
        remapper: &'r FieldRemapper<'r>,
        is_same_module: bool,
        call_site: InlineCallSiteInfo,
    ) -> Self {
        Self {
            node,
            parameters,
            context,
            remapper,
            is_same_module,
            call_site,
        }
    }

    pub fn do_inline(
        mut self,
        session: &mut InlineSession<'_>,
        local_remapper: &LocalVarRemapper<'_>,
        lines: &mut LineMapping<'_>,
        returns: Returns<'_>,
    ) -> Result<InlinedBody> {
        debug!(method = %self.node.name, context = ?self.context, "inlining body");
        let mut result = InlineResult::new();
        self.prepare(session, &mut result)?;

        let inlinables = self.find_inlinables(session)?;
        for id in &inlinables.removed_loads {
            if self.node.instructions.contains(*id) {
                self.node.instructions.remove(*id);
            }
        }

        let base_local = self
            .node
            .compute_max_locals()?
            .max(self.node.max_locals)
            .max(self.parameters.args_size_on_stack());
        let mut nested = FxHashSet::default();
        for invocation in &inlinables.invocations {
            self.inline_lambda(session, invocation, base_local, lines, &mut nested, &mut result)?;
        }

        let mut regenerated = FxHashMap::default();
        for construction in inlinables.constructions {
            self.regenerate(session, construction, &mut regenerated, &mut result)?;
        }

        let unresolved = self.remapper.resolve_placeholders(&mut self.node.instructions);
        if unresolved > 0 && !matches!(self.remapper.kind(), FieldRemapperKind::InlinedLambda { .. }) {
            return Err(InlineError::internal(format!(
                "{unresolved} captured field reads left unresolved in {}",
                self.node.name
            )));
        }

        self.remap_types(session);
        let mut node = self.remap_frame(local_remapper, lines, &nested)?;
        let finally_points = match returns {
            Returns::Local(labels) => {
                let end = LabelId::fresh();
                node.instructions.push(Insn::Label(end));
                process_returns(&mut node, labels, end)
            }
            Returns::Keep => Vec::new(),
        };
        node.max_stack = compute_max_stack(&node)?;
        node.max_locals = node.compute_max_locals()?;
        Ok(InlinedBody {
            node,
            result,
            finally_points,
        })
    }

    fn prepare(&mut self, session: &InlineSession<'_>, result: &mut InlineResult) -> Result<()> {
        // body locals move past the captured values appended to the parameters
        let real = self.parameters.real_parameters_size_on_stack();
        let captured = self.parameters.captured_parameters_size_on_stack();
        if captured > 0 {
            let list = &mut self.node.instructions;
            for id in list.ids() {
                match list.get_mut(id) {
                    Insn::Var { var, .. } | Insn::Iinc { var, .. } if *var >= real => *var += captured,
                    _ => {}
                }
            }
            for local in &mut self.node.local_variables {
                if local.index >= real {
                    local.index += captured;
                }
            }
            self.node.max_locals += captured;
        }

        if session.contexts.is_root(self.context) {
            for local in &mut self.node.local_variables {
                if is_fake_local_variable_for_inline(&local.name) {
                    continue;
                }
                if local.name == THIS {
                    local.name.push('_');
                }
                local.name.push_str(INLINE_FUN_VAR_SUFFIX);
            }
            self.redirect_assertions_field(session, result);
        }

        self.replace_default_lambda_fake_calls()?;
        self.remapper.fold_field_access_chains(&mut self.node.instructions);
        Ok(())
    }

    /// Inlined assertions read the flag of the class they end up in.
    fn redirect_assertions_field(&mut self, session: &InlineSession<'_>, result: &mut InlineResult) {
        let owner = &session.contexts.root_call_site(self.context).owner_class_name;
        let list = &mut self.node.instructions;
        for id in list.ids() {
            if let Insn::Field {
                opcode: GETSTATIC,
                owner: field_owner,
                name,
                ..
            } = list.get_mut(id)
            {
                if name == ASSERTIONS_DISABLED_FIELD && *field_owner != *owner {
                    *field_owner = owner.clone();
                    result.uses_assertions_field = true;
                }
            }
        }
    }

    /// The fake call left where a default lambda was constructed consumes
    /// its constructor arguments; they become the lambda's captured values.
    fn replace_default_lambda_fake_calls(&mut self) -> Result<()> {
        let parameters = self.parameters;
        let list = &mut self.node.instructions;
        for id in list.ids() {
            let Some(offset) = default_lambda_fake_call_offset(list.get(id)) else {
                continue;
            };
            let lambda = default_lambda_at(parameters, offset)?;
            let vars = lambda.info.captured_vars()?;
            if vars.len() != lambda.captured_args.len() {
                return Err(InlineError::internal(format!(
                    "Default lambda {} captures {} values but its constructor takes {}",
                    lambda.info.lambda_class,
                    vars.len(),
                    lambda.captured_args.len()
                )));
            }
            for var in vars.iter().rev() {
                list.insert_before(
                    id,
                    Insn::field(
                        PUTSTATIC,
                        &lambda.info.lambda_class,
                        fold_name(&var.desc.field_name),
                        var.desc.ty.descriptor(),
                    ),
                );
            }
            list.remove(id);
        }
        Ok(())
    }

    fn find_inlinables(&self, session: &InlineSession<'_>) -> Result<Inlinables> {
        let frames = Frames::analyze(&self.node)?;
        let mut found = Inlinables::default();
        let mut regenerated_news: FxHashSet<InsnId> = FxHashSet::default();

        for (id, insn) in self.node.instructions.iter() {
            match insn {
                Insn::Method {
                    opcode: INVOKESPECIAL,
                    owner,
                    name,
                    desc,
                    ..
                } if is_anonymous_constructor_call(owner, name) => {
                    let Some((Some(receiver), args)) = frames.call_operands(id, insn) else {
                        continue;
                    };
                    let Origin::New(new_insn) = receiver.origin else {
                        continue;
                    };
                    let mut info =
                        AnonymousObjectTransformationInfo::new(owner.clone(), self.needs_class_reification(new_insn));
                    info.constructor_desc = Some(desc.clone());
                    info.already_regenerated = self.is_already_regenerated(session, owner);

                    let mut slot = 1;
                    for arg in &args {
                        if let Some((argument, loads)) = self.functional_argument(arg.origin) {
                            if argument.is_inlinable() {
                                found.removed_loads.extend(loads);
                            }
                            info.functional_arguments.insert(slot, argument);
                        } else {
                            match arg.origin {
                                Origin::Load { slot: 0, .. }
                                    if self.remapper.is_regenerating() && !self.node.is_static() =>
                                {
                                    info.captured_outer_regenerated = true;
                                }
                                Origin::New(inner) if regenerated_news.contains(&inner) => {
                                    info.captures_regenerated_object = true;
                                }
                                _ => {}
                            }
                        }
                        slot += arg.size;
                    }
                    if info.should_regenerate(self.is_same_module) {
                        regenerated_news.insert(new_insn);
                    }
                    found.constructions.push(ObjectConstruction {
                        constructor: Some(id),
                        info,
                    });
                }
                Insn::Field {
                    opcode: GETSTATIC,
                    owner,
                    name,
                    ..
                } if is_anonymous_singleton_load(owner, name) => {
                    let mut info =
                        AnonymousObjectTransformationInfo::singleton(owner.clone(), self.needs_class_reification(id));
                    info.already_regenerated = self.is_already_regenerated(session, owner);
                    found.constructions.push(ObjectConstruction {
                        constructor: None,
                        info,
                    });
                }
                Insn::Method {
                    opcode: INVOKEINTERFACE | INVOKEVIRTUAL,
                    name,
                    ..
                } => {
                    let Some((Some(receiver), _)) = frames.call_operands(id, insn) else {
                        continue;
                    };
                    let Some((argument, loads)) = self.functional_argument(receiver.origin) else {
                        continue;
                    };
                    let Some(lambda) = argument.lambda() else {
                        continue;
                    };
                    if name != "invoke" && *name != lambda.invoke_name {
                        continue;
                    }
                    trace!(lambda = %lambda.lambda_class, "found lambda invocation");
                    found.removed_loads.extend(loads);
                    found.invocations.push(LambdaInvocation { invoke: id, argument });
                }
                _ => {}
            }
        }
        Ok(found)
    }

    /// The functional argument a value was loaded from, with the load and
    /// the cast following it.
    fn functional_argument(&self, origin: Origin) -> Option<(FunctionalArgument, Vec<InsnId>)> {
        let list = &self.node.instructions;
        let (argument, load) = match origin {
            Origin::Load { insn, slot } => {
                if slot >= self.parameters.args_size_on_stack() {
                    return None;
                }
                let info = self
                    .parameters
                    .iter()
                    .find(|p| self.parameters.declaration_slot(p) == slot)?;
                (info.functional_argument.clone()?, insn)
            }
            Origin::Static(insn) => {
                let Insn::Field { owner, name, .. } = list.get(insn) else {
                    return None;
                };
                let (_, info) = self.remapper.find_field(owner, unfold_name(name)?)?;
                (info.functional_argument.clone()?, insn)
            }
            _ => return None,
        };
        let mut loads = vec![load];
        if let Some(cast) = list
            .next(load)
            .filter(|next| matches!(list.get(*next), Insn::Type { opcode: CHECKCAST, .. }))
        {
            loads.push(cast);
        }
        Some((argument, loads))
    }

    /// The class is the output of a regeneration, or the one an enclosing
    /// level is regenerating (its `<clinit>` constructs it).
    fn is_already_regenerated(&self, session: &InlineSession<'_>, owner: &str) -> bool {
        session.contexts.is_regenerated_class(owner)
            || session
                .contexts
                .find_anonymous_object_transformation_info(self.context, owner)
                .is_some()
    }

    fn needs_class_reification(&self, id: InsnId) -> bool {
        let list = &self.node.instructions;
        let mut cursor = list.prev(id);
        while let Some(prev) = cursor {
            let insn = list.get(prev);
            if insn.is_meaningful() {
                return is_need_class_reification_marker(insn);
            }
            cursor = list.prev(prev);
        }
        false
    }

    fn inline_lambda(
        &mut self,
        session: &mut InlineSession<'_>,
        invocation: &LambdaInvocation,
        base_local: usize,
        lines: &mut LineMapping<'_>,
        nested: &mut FxHashSet<InsnId>,
        result: &mut InlineResult,
    ) -> Result<()> {
        let lambda = invocation
            .argument
            .lambda()
            .ok_or_else(|| InlineError::internal("Invocation of a functional argument without a body"))?;
        let Insn::Method { desc, .. } = self.node.instructions.get(invocation.invoke) else {
            return Err(InlineError::internal("Lambda invocation is not a call"));
        };
        let call_args = AsmType::argument_types(desc)?;
        let call_return = AsmType::return_type(desc)?;
        let lambda_args = lambda.invoke_param_types()?;
        if call_args.len() != lambda_args.len() {
            return Err(InlineError::internal(format!(
                "{} is invoked with {} arguments but takes {}",
                lambda.lambda_class,
                call_args.len(),
                lambda_args.len()
            )));
        }
        debug!(lambda = %lambda.lambda_class, "inlining lambda");

        let this_argument = lambda
            .has_dispatch_receiver
            .then(|| invocation.argument.clone());
        let parameters = lambda.add_all_parameters(self.remapper, this_argument)?;
        let var_remapper = LocalVarRemapper::new(&parameters, base_local + 1);

        // arguments are on the stack, last one on top
        let mut prologue = Vec::new();
        let receiver_params = usize::from(lambda.has_dispatch_receiver);
        for (position, (from, to)) in call_args.iter().zip(&lambda_args).enumerate().rev() {
            coerce(from, to, &mut prologue);
            let slot = parameters.declaration_slot(parameters.get(position + receiver_params));
            var_remapper.visit_var_insn(to.opcode(ISTORE), slot, &mut prologue)?;
        }
        prologue.push(Insn::int_const(0));
        prologue.push(Insn::var(ISTORE, base_local));

        let is_default = matches!(invocation.argument, FunctionalArgument::DefaultLambda(_));
        let context = session
            .contexts
            .sub_inline_lambda(self.context, &lambda.lambda_class, is_default);
        let remapper = FieldRemapper::new(
            FieldRemapperKind::InlinedLambda {
                lambda_name: lambda.lambda_class.clone(),
            },
            &parameters,
            Some(self.remapper),
        );

        let source = lambda.node()?;
        let mut body = source.node.clone();
        body.refresh_labels();
        if let FunctionalArgument::DefaultLambda(default) = &invocation.argument {
            if default.needs_reification {
                let usages = ReifiedTypeInliner::new(
                    session.contexts.type_mappings(self.context),
                    session.env.intrinsics,
                    session.env.config.unified_null_checks,
                )
                .reify_instructions(&mut body);
                result.reified_type_parameters_usages.merge_all(&usages);
            }
        }

        let inlined = {
            let mut lambda_lines = lines.nested(source.smap.clone(), None);
            MethodInliner::new(
                body,
                &parameters,
                context,
                &remapper,
                self.is_same_module,
                self.call_site.clone(),
            )
            .do_inline(
                session,
                &var_remapper,
                &mut lambda_lines,
                Returns::Local(&lambda.return_labels),
            )?
        };

        let mut epilogue = Vec::new();
        coerce(&lambda.invoke_return_type()?, &call_return, &mut epilogue);

        let InlinedBody {
            node: body,
            result: child,
            ..
        } = inlined;
        let (start, end) = (LabelId::fresh(), LabelId::fresh());
        let anchor = invocation.invoke;
        let list = &mut self.node.instructions;
        list.insert_before(anchor, Insn::Label(start));
        list.insert_before(anchor, inline_marker(BEFORE_INLINE_CALL));
        for insn in prologue {
            list.insert_before(anchor, insn);
        }
        for insn in body.instructions.into_vec() {
            nested.insert(list.insert_before(anchor, insn));
        }
        for insn in epilogue {
            list.insert_before(anchor, insn);
        }
        list.insert_before(anchor, inline_marker(AFTER_INLINE_CALL));
        list.insert_before(anchor, Insn::Label(end));
        list.remove(anchor);

        self.node
            .try_catch_blocks
            .splice(0..0, body.try_catch_blocks);
        self.node.local_variables.extend(body.local_variables);
        let short_name = lambda
            .lambda_class
            .rsplit('/')
            .next()
            .unwrap_or(&lambda.lambda_class);
        self.node.local_variables.push(LocalVariable::new(
            format!("{LOCAL_FOR_INLINE_ARGUMENT}-{short_name}"),
            "I",
            start,
            end,
            base_local,
        ));
        result.merge(child);
        Ok(())
    }

    fn regenerate(
        &mut self,
        session: &mut InlineSession<'_>,
        construction: ObjectConstruction,
        regenerated: &mut FxHashMap<String, Regenerated>,
        result: &mut InlineResult,
    ) -> Result<()> {
        let ObjectConstruction { constructor, mut info } = construction;
        let old_name = info.old_class_name.clone();
        if let Some(done) = regenerated.get(&old_name) {
            if let Some(constructor) = constructor {
                self.patch_constructor_call(constructor, done);
            }
            return Ok(());
        }
        if info.already_regenerated {
            // type remapping points the construction at the new class
            return Ok(());
        }
        if !info.should_regenerate(self.is_same_module) {
            trace!(class = %old_name, "anonymous object used as is");
            result.add_not_changed_class(old_name);
            return Ok(());
        }

        let generator = session.contexts.name_generator(self.context);
        let new_name = info
            .generate_new_class_name(&mut session.contexts, generator)
            .to_string();
        debug!(old = %old_name, new = %new_name, "regenerating anonymous object");
        let context = session.contexts.sub_inline_with_class_regeneration(
            self.context,
            generator,
            info,
            self.call_site.clone(),
        );
        let transformed =
            AnonymousObjectTransformer::new(context, self.is_same_module).transform(session, self.remapper)?;
        let info = session
            .contexts
            .transformation_info(context)
            .cloned()
            .ok_or_else(|| InlineError::internal(format!("No transformation info for {old_name}")))?;

        session
            .contexts
            .type_remapper_mut(self.context)
            .add_mapping(&old_name, &new_name);
        result.add_changed_type(&old_name, &new_name);
        if info.can_remove_after_transformation() {
            result.add_class_to_remove(&old_name);
        }
        result.merge(transformed.inline_result);
        result.regenerated_classes.push(transformed.new_class);

        let done = Regenerated {
            new_constructor_desc: info.new_constructor_descriptor,
            recaptured: info.all_recaptured_parameters,
        };
        if let Some(constructor) = constructor {
            self.patch_constructor_call(constructor, &done);
        }
        regenerated.insert(old_name, done);
        Ok(())
    }

    /// Passes the recaptured values, as placeholders, to the new constructor.
    fn patch_constructor_call(&mut self, constructor: InsnId, done: &Regenerated) {
        let list = &mut self.node.instructions;
        for desc in &done.recaptured {
            list.insert_before(
                constructor,
                Insn::field(
                    GETSTATIC,
                    &desc.containing_lambda,
                    fold_name(&desc.field_name),
                    desc.ty.descriptor(),
                ),
            );
        }
        if let (Insn::Method { desc, .. }, Some(new_desc)) = (list.get_mut(constructor), &done.new_constructor_desc) {
            *desc = new_desc.clone();
        }
    }

    fn remap_types(&mut self, session: &InlineSession<'_>) {
        let remapper = session.contexts.type_remapper(self.context);
        let list = &mut self.node.instructions;
        for id in list.ids() {
            let insn = list.get_mut(id);
            // placeholders are looked up by their original owner
            if is_placeholder(insn) {
                continue;
            }
            remapper.remap_insn(insn);
        }
        for local in &mut self.node.local_variables {
            remapper.remap_local_variable(local);
        }
        for block in &mut self.node.try_catch_blocks {
            if let Some(ty) = &block.ty {
                block.ty = Some(remapper.map(ty).to_string());
            }
        }
    }

    /// Copies the body with its slots translated into the receiving frame.
    fn remap_frame(
        &self,
        local_remapper: &LocalVarRemapper<'_>,
        lines: &mut LineMapping<'_>,
        nested: &FxHashSet<InsnId>,
    ) -> Result<MethodNode> {
        let source = &self.node;
        let mut node = MethodNode::new(source.access, source.name.clone(), source.desc.clone());
        node.signature = source.signature.clone();
        node.exceptions = source.exceptions.clone();

        let mut buffer = Vec::new();
        for (id, insn) in source.instructions.iter() {
            match insn {
                Insn::Var { opcode, var } => local_remapper.visit_var_insn(*opcode, *var, &mut buffer)?,
                Insn::Iinc { var, incr } => local_remapper.visit_iinc(*var, *incr, &mut buffer)?,
                // lines of inlined lambdas were mapped by their own level
                Insn::LineNumber { line, start } if !nested.contains(&id) => {
                    let mapped = lines.map(*line);
                    if mapped >= 0 {
                        buffer.push(Insn::LineNumber {
                            line: mapped,
                            start: *start,
                        });
                    }
                }
                other => buffer.push(other.clone()),
            }
            for insn in buffer.drain(..) {
                node.instructions.push(insn);
            }
        }

        node.try_catch_blocks = source.try_catch_blocks.clone();
        node.local_variables = source
            .local_variables
            .iter()
            .filter_map(|local| local_remapper.visit_local_variable(local))
            .collect();
        node.max_locals = source.max_locals;
        Ok(node)
    }
}

fn is_placeholder(insn: &Insn) -> bool {
    matches!(insn, Insn::Field { opcode: GETSTATIC | PUTSTATIC, name, .. } if unfold_name(name).is_some())
}

fn default_lambda_at(parameters: &Parameters, offset: usize) -> Result<Rc<DefaultLambda>> {
    let argument = parameters
        .iter()
        .find(|p| !p.is_captured() && parameters.declaration_slot(p) == offset)
        .and_then(|p| p.functional_argument.as_ref());
    match argument {
        Some(FunctionalArgument::DefaultLambda(lambda)) => Ok(Rc::clone(lambda)),
        _ => Err(InlineError::internal(format!(
            "No default lambda for the parameter at slot {offset}"
        ))),
    }
}
