use super::{AnonymousObjectTransformationInfo, TransformationResult};
use crate::context::{ContextId, InlineCallSiteInfo, NameGeneratorId};
use crate::errors::{InlineError, Result};
use crate::inliner::{attach_source_map, InlineResult, InlineSession, LineMapping, MethodInliner, Returns};
use crate::insn::analysis::compute_max_stack;
use crate::insn::markers::{
    find_captured_field_assignments, is_captured_field_name, is_this0, remove_finally_markers,
    ASSERTIONS_DISABLED_FIELD, CAPTURED_THIS_FIELD, INLINE_FUN_THIS_0_SUFFIX,
    INLINE_TRANSFORMATION_SUFFIX, THIS,
};
use crate::insn::method::line_number_range;
use crate::insn::opcodes::*;
use crate::insn::{
    AsmType, ClassNode, Constant, FieldNode, Insn, InsnId, InsnList, LabelId, MethodNode, OuterClass,
    StackValue,
};
use crate::lambda::FunctionalArgument;
use crate::params::{CapturedParamDesc, ParameterInfo, Parameters, ParametersBuilder};
use crate::reified::ReifiedTypeInliner;
use crate::remap::{FieldRemapper, FieldRemapperKind, LocalVarRemapper};
use crate::smap::{Smap, SmapParser, SourceMapCopier, SourceMapper};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

/// Copies an anonymous object (or lambda class) under the name its
/// regeneration context allocated, inlining the functional arguments it
/// captured into its methods.
pub struct AnonymousObjectTransformer {
    context: ContextId,
    is_same_module: bool,
    old_name: String,
    new_name: String,
    /// Names given out so far, by requested name.
    field_names: FxHashMap<String, usize>,
    smap: Smap,
    source_mapper: SourceMapper,
}

/// Parameters extracted from the old constructor.
struct CapturedParameters {
    /// Captured values as the object's other methods see them.
    captured: ParametersBuilder,
    /// Parameters of the new constructor.
    constructor: ParametersBuilder,
    /// Captured field assignments removed from the old constructor.
    assignments: Vec<InsnId>,
}

impl AnonymousObjectTransformer {
    pub fn new(context: ContextId, is_same_module: bool) -> Self {
        Self {
            context,
            is_same_module,
            old_name: String::new(),
            new_name: String::new(),
            field_names: FxHashMap::default(),
            smap: Smap::new(Vec::new()),
            source_mapper: SourceMapper::new(None),
        }
    }

    fn info<'s>(&self, session: &'s InlineSession<'_>) -> Result<&'s AnonymousObjectTransformationInfo> {
        session
            .contexts
            .transformation_info(self.context)
            .ok_or_else(|| InlineError::internal("Object transformation outside of a regeneration context"))
    }

    fn info_mut<'s>(
        &self,
        session: &'s mut InlineSession<'_>,
    ) -> Result<&'s mut AnonymousObjectTransformationInfo> {
        session
            .contexts
            .transformation_info_mut(self.context)
            .ok_or_else(|| InlineError::internal("Object transformation outside of a regeneration context"))
    }

    pub fn transform(
        mut self,
        session: &mut InlineSession<'_>,
        parent_remapper: &FieldRemapper<'_>,
    ) -> Result<TransformationResult> {
        let info = self.info(session)?;
        self.old_name = info.old_class_name.clone();
        self.new_name = info
            .new_class_name()
            .ok_or_else(|| InlineError::internal(format!("No new name for {}", info.old_class_name)))?
            .to_string();
        debug!(old = %self.old_name, new = %self.new_name, "transforming anonymous object");

        let old = session.env.load_class(&self.old_name)?;
        let (constructor, methods) = self.split_constructor(&old)?;
        if old
            .super_name
            .as_deref()
            .is_some_and(|name| session.env.coroutines.is_continuation_class(name))
        {
            session.contexts.set_continuation(self.context, true);
        }
        if !self.is_same_module && !old.metadata.as_ref().is_some_and(|m| m.is_public_abi()) {
            return Err(InlineError::internal(format!(
                "Trying to inline an anonymous object which is not part of the public ABI: {}",
                self.old_name
            )));
        }

        let mut fields = Vec::new();
        for field in &old.fields {
            self.add_unique_field(&field.name);
            if !is_captured_field_name(&field.name) {
                fields.push(field.clone());
            }
        }
        self.init_source_map(session, &old, &constructor, &methods);

        let mut constructor = constructor;
        let mut params = self.extract_parameters(session, &constructor, parent_remapper)?;
        for id in params.assignments.drain(..) {
            constructor.instructions.remove(id);
        }

        let mut result = InlineResult::new();
        let generator = session.contexts.generator_for_class(&self.new_name);
        let (new_constructor, new_fields) =
            self.generate_constructor(session, constructor, &mut params, parent_remapper, generator, &mut result)?;
        fields.extend(new_fields);

        let mut new_methods = vec![new_constructor];
        for method in methods {
            let is_clinit = method.name == "<clinit>";
            let mut method = method;
            if is_clinit {
                let owner = session.contexts.root_call_site(self.context).owner_class_name.clone();
                rewrite_assertions_disabled_field_initialization(&mut method, &owner);
            }
            let needs_state_machine = session.env.coroutines.needs_state_machine(&old, &method);
            let return_type = AsmType::return_type(&method.desc)?;

            let parameters = method_parameters_with_captured(&params.captured, &method, &self.old_name)?;
            let (mut node, child) =
                self.inline_method(session, method, &parameters, false, parent_remapper, generator)?;
            if needs_state_machine {
                session
                    .env
                    .coroutines
                    .generate_state_machine(&self.new_name, &mut node)?;
            }
            if return_type.is_reference() {
                let old_return = return_type.internal_name();
                if let Some(new_return) = child.changed_types().get(&old_return) {
                    session
                        .contexts
                        .type_remapper_mut(self.context)
                        .add_additional_mapping(old_return.clone(), new_return.clone());
                }
            }
            result.merge(child);
            new_methods.push(node);
        }

        let new_class = self.finish_class(session, old, fields, new_methods)?;
        Ok(TransformationResult {
            new_class,
            inline_result: result,
        })
    }

    fn split_constructor(&self, old: &ClassNode) -> Result<(MethodNode, Vec<MethodNode>)> {
        let mut constructor: Option<MethodNode> = None;
        let mut methods = Vec::new();
        for method in &old.methods {
            if method.name != "<init>" {
                methods.push(method.clone());
                continue;
            }
            if let Some(first) = &constructor {
                return Err(InlineError::internal(format!(
                    "Lambda, SAM or anonymous object should have only one constructor.\nFirst:\n{}\n\nSecond:\n{}\n",
                    first.node_text(),
                    method.node_text()
                )));
            }
            constructor = Some(method.clone());
        }
        let constructor = constructor
            .ok_or_else(|| InlineError::internal(format!("{} has no constructor", self.old_name)))?;
        Ok((constructor, methods))
    }

    /// Lines of the object's own file keep their numbers; inlined lines are
    /// appended. Objects regenerated inside an inline lambda keep their SMAP.
    fn init_source_map(
        &mut self,
        session: &InlineSession<'_>,
        old: &ClassNode,
        constructor: &MethodNode,
        methods: &[MethodNode],
    ) {
        let debug = if session.contexts.is_inlining_lambda(self.context) {
            None
        } else {
            old.source_debug.as_deref()
        };
        let (start, end) = line_number_range(methods.iter().chain(std::iter::once(constructor)));
        self.smap = SmapParser::parse_or_create_default(debug, old.source_file.as_deref(), &self.old_name, start, end);
        let source_info = self
            .smap
            .file_mappings()
            .iter()
            .find(|mapping| Some(mapping.name.as_str()) == old.source_file.as_deref())
            .map(|mapping| mapping.to_source_info());
        self.source_mapper = SourceMapper::new(source_info);
    }

    fn add_unique_field(&mut self, name: &str) -> String {
        unique_field_name(&mut self.field_names, name)
    }

    /// Finds what the old constructor stores into captured fields, and
    /// decides which lambda captures the new class has to carry itself.
    fn extract_parameters(
        &mut self,
        session: &mut InlineSession<'_>,
        constructor: &MethodNode,
        parent_remapper: &FieldRemapper<'_>,
    ) -> Result<CapturedParameters> {
        let info = self.info(session)?.clone();
        let functional_arguments = &info.functional_arguments;
        let mut captured = ParametersBuilder::new();
        let mut constructor_builder = ParametersBuilder::new();
        let mut captured_lambdas: IndexMap<String, FunctionalArgument> = IndexMap::new();
        let mut captured_by_slot: FxHashMap<usize, ParameterInfo> = FxHashMap::default();
        let mut assignments = Vec::new();

        // an object at the top of a crossinline lambda that is itself inlined
        // into an object reads the lambda's captures through that object
        let top_level_in_crossinline_lambda = matches!(parent_remapper.kind(), FieldRemapperKind::InlinedLambda { .. })
            && parent_remapper.parent().is_some_and(|parent| !parent.is_root());

        let list = &constructor.instructions;
        for put in find_captured_field_assignments(constructor) {
            let Insn::Field { name, desc, .. } = list.get(put) else {
                continue;
            };
            let Some(load) = list.prev(put) else {
                continue;
            };
            let Insn::Var { var, .. } = *list.get(load) else {
                continue;
            };
            let argument = functional_arguments.get(&var).cloned();
            let is_lambda = argument.as_ref().is_some_and(|a| a.lambda().is_some());

            let should_rename = !top_level_in_crossinline_lambda
                && is_this0(name)
                && functional_arguments.values().any(|argument| {
                    argument.lambda().is_some_and(|lambda| {
                        lambda
                            .captured_vars()
                            .is_ok_and(|vars| vars.iter().any(|v| v.desc.field_name == *name))
                    })
                });
            let new_field_name = if should_rename {
                self.add_unique_field(&format!("{name}{INLINE_FUN_THIS_0_SUFFIX}"))
            } else {
                name.clone()
            };
            let ty = AsmType::from_descriptor(desc)?;
            let param = captured.add_captured_param_named(&self.old_name, name, &new_field_name, ty, is_lambda, None);
            param.functional_argument = argument.clone();
            if let Some(lambda) = argument.filter(|_| is_lambda) {
                insert_lambda(&mut captured_lambdas, lambda);
            }
            captured_by_slot.insert(var, param.clone());

            if let Some(receiver) = list.prev(load) {
                assignments.push(receiver);
            }
            assignments.push(load);
            assignments.push(put);
        }

        constructor_builder.add_this(AsmType::object(&self.old_name), false);
        let param_types = match &info.constructor_desc {
            Some(desc) => AsmType::argument_types(desc)?,
            None => Vec::new(),
        };
        for ty in param_types {
            let offset = constructor_builder.next_parameter_offset();
            let argument = functional_arguments.get(&offset).cloned();
            let is_lambda = argument.as_ref().is_some_and(|a| a.lambda().is_some());
            let field_equivalent = captured_by_slot.get(&offset).cloned();
            if is_lambda && field_equivalent.is_none() {
                if let Some(lambda) = argument.clone() {
                    insert_lambda(&mut captured_lambdas, lambda);
                }
            }
            let param = constructor_builder.add_next_parameter(ty, is_lambda);
            param.functional_argument = argument;
            param.field_equivalent = field_equivalent.map(Box::new);
        }

        let mut all_recaptured = Vec::new();
        if !top_level_in_crossinline_lambda {
            let mut captured_outer_this_types = FxHashSet::default();
            for argument in captured_lambdas.values() {
                let Some(lambda) = argument.lambda() else {
                    continue;
                };
                for var in lambda.captured_vars()? {
                    let desc = &var.desc;
                    let this0 = is_this0(&desc.field_name);
                    let new_field_name = if this0 {
                        desc.field_name.clone()
                    } else {
                        self.add_unique_field(&format!("{}{INLINE_TRANSFORMATION_SUFFIX}", desc.field_name))
                    };
                    // outer `this` values of one type captured by several lambdas are the same object
                    let skip_in_constructor = this0 && !captured_outer_this_types.insert(desc.ty.clone());
                    let recaptured = constructor_builder
                        .add_captured_param(desc.clone(), new_field_name.clone(), skip_in_constructor)
                        .clone();
                    let value = StackValue::field(desc.ty.clone(), &self.old_name, new_field_name.clone());
                    captured.add_captured_param_from(&recaptured, new_field_name).remap_value = Some(value);
                    all_recaptured.push(desc.clone());
                }
            }
        } else if !captured_lambdas.is_empty() {
            let outer = parent_remapper
                .parent()
                .filter(|parent| parent.is_regenerating())
                .and_then(FieldRemapper::original_lambda_name)
                .ok_or_else(|| {
                    InlineError::internal(format!(
                        "Expected a regenerated object around the lambda that builds {}",
                        self.old_name
                    ))
                })?
                .to_string();
            let desc = CapturedParamDesc::new(&outer, THIS, AsmType::object(&outer));
            let recaptured = constructor_builder
                .add_captured_param(desc.clone(), CAPTURED_THIS_FIELD, false)
                .clone();
            captured
                .add_captured_param_from(&recaptured, CAPTURED_THIS_FIELD)
                .remap_value = Some(StackValue::local(0, AsmType::object(&outer)));
            all_recaptured.push(desc);
        }

        trace!(
            class = %self.old_name,
            recaptured = all_recaptured.len(),
            lambdas = captured_lambdas.len(),
            "extracted captured parameters"
        );
        let info = self.info_mut(session)?;
        info.all_recaptured_parameters = all_recaptured;
        info.captured_lambdas_to_inline = captured_lambdas;
        Ok(CapturedParameters {
            captured,
            constructor: constructor_builder,
            assignments,
        })
    }

    /// New constructor: stores every captured value into its field, then
    /// runs the old constructor body.
    fn generate_constructor(
        &mut self,
        session: &mut InlineSession<'_>,
        constructor: MethodNode,
        params: &mut CapturedParameters,
        parent_remapper: &FieldRemapper<'_>,
        generator: NameGeneratorId,
        result: &mut InlineResult,
    ) -> Result<(MethodNode, Vec<FieldNode>)> {
        let constructor_params = params.constructor.build_parameters();
        let new_types: Vec<AsmType> = constructor_params
            .iter()
            .filter(|p| !p.is_skipped)
            .skip(1)
            .map(|p| p.ty.clone())
            .collect();
        let new_desc = AsmType::method_descriptor(&new_types, &AsmType::Void);
        self.info_mut(session)?.new_constructor_descriptor = Some(new_desc.clone());

        let body_start = LabelId::fresh();
        let mut prologue = vec![Insn::Label(body_start)];
        let mut fields = Vec::new();
        let mut next_offset = 0;
        for param in constructor_params.iter() {
            let offset = (!param.is_skipped).then(|| {
                let offset = next_offset;
                next_offset += param.size();
                offset
            });
            let stored = match &param.field_equivalent {
                Some(equivalent) => {
                    // reads of the field inside the constructor become loads of the argument
                    let new_field_name = equivalent.new_field_name().unwrap_or_default().to_string();
                    params
                        .constructor
                        .add_captured_param_from(equivalent, new_field_name)
                        .remap_value = offset.map(|offset| StackValue::local(offset, param.ty.clone()));
                    equivalent.as_ref()
                }
                None => param,
            };
            let (Some(offset), Some(captured)) = (offset, &stored.captured) else {
                continue;
            };
            if captured.skip_in_constructor {
                continue;
            }
            let desc = stored.ty.descriptor();
            fields.push(FieldNode::new(ACC_SYNTHETIC | ACC_FINAL, &captured.new_field_name, &desc));
            prologue.push(Insn::var(ALOAD, 0));
            prologue.push(Insn::var(stored.ty.opcode(ILOAD), offset));
            prologue.push(Insn::field(PUTFIELD, &self.new_name, &captured.new_field_name, desc));
        }

        let old_start = constructor
            .instructions
            .first()
            .and_then(|first| constructor.instructions.get(first).as_label());
        let access = constructor.access;
        let parameters = params.constructor.build_parameters();
        let (mut body, child) = self.inline_method(session, constructor, &parameters, true, parent_remapper, generator)?;
        result.merge(child);
        remove_finally_markers(&mut body);

        let mut node = MethodNode::new(access, "<init>", new_desc);
        node.instructions = InsnList::from(prologue);
        node.instructions.append(body.instructions);
        node.try_catch_blocks = body.try_catch_blocks;
        node.local_variables = body.local_variables;
        for local in &mut node.local_variables {
            if Some(local.start) == old_start {
                local.start = body_start;
            }
        }
        node.max_stack = compute_max_stack(&node)?;
        node.max_locals = node.compute_max_locals()?;
        Ok((node, fields))
    }

    fn inline_method(
        &mut self,
        session: &mut InlineSession<'_>,
        mut source: MethodNode,
        parameters: &Parameters,
        is_constructor: bool,
        parent_remapper: &FieldRemapper<'_>,
        generator: NameGeneratorId,
    ) -> Result<(MethodNode, InlineResult)> {
        let info = self.info(session)?;
        let desc = if is_constructor {
            info.new_constructor_descriptor.clone().unwrap_or_else(|| source.desc.clone())
        } else {
            source.desc.clone()
        };
        let recaptured_lambdas = info.captured_lambdas_to_inline.keys().cloned().collect();
        let remapper = FieldRemapper::new(
            FieldRemapperKind::RegeneratedLambda {
                old_owner: self.old_name.clone(),
                new_owner: self.new_name.clone(),
                is_constructor,
                recaptured_lambdas,
            },
            parameters,
            Some(parent_remapper),
        );

        let usages = ReifiedTypeInliner::new(
            session.contexts.type_mappings(self.context),
            session.env.intrinsics,
            session.env.config.unified_null_checks,
        )
        .reify_instructions(&mut source);

        let parent_site = session.contexts.call_site(self.context);
        let call_site = InlineCallSiteInfo {
            is_in_public_inline_scope: parent_site.is_in_public_inline_scope,
            file: parent_site.file.clone(),
            line_number: parent_site.line_number,
            ..InlineCallSiteInfo::new(&self.old_name, &source.name, desc)
        };
        let context = session.contexts.sub_inline(self.context, generator);
        let local_remapper = LocalVarRemapper::new(parameters, 0);
        let mut lines = LineMapping::new(SourceMapCopier::new(self.smap.clone(), None), &mut self.source_mapper);
        let inlined = MethodInliner::new(source, parameters, context, &remapper, self.is_same_module, call_site)
            .do_inline(session, &local_remapper, &mut lines, Returns::Keep)?;

        let mut result = inlined.result;
        result.reified_type_parameters_usages.merge_all(&usages);
        let mut node = inlined.node;
        remove_finally_markers(&mut node);
        Ok((node, result))
    }

    fn finish_class(
        self,
        session: &mut InlineSession<'_>,
        old: ClassNode,
        fields: Vec<FieldNode>,
        methods: Vec<MethodNode>,
    ) -> Result<ClassNode> {
        let call_site = session.contexts.call_site(self.context).clone();
        let mut class = ClassNode {
            name: self.new_name.clone(),
            fields,
            methods,
            outer_class: Some(OuterClass {
                owner: call_site.owner_class_name.clone(),
                method_name: Some(call_site.method_name.clone()),
                method_desc: Some(call_site.method_desc.clone()),
            }),
            ..old
        };
        if let Some(metadata) = class.metadata.as_mut() {
            metadata.original_name = Some(self.old_name.clone());
            metadata.public_abi = call_site.is_in_public_inline_scope;
        }

        let remapper = session.contexts.type_remapper(self.context);
        for method in &mut class.methods {
            remapper.remap_method(method);
        }
        for field in &mut class.fields {
            field.desc = remapper.map_desc(&field.desc);
        }
        class.super_name = class.super_name.map(|name| remapper.map(&name).to_string());
        for interface in &mut class.interfaces {
            *interface = remapper.map(interface).to_string();
        }
        for inner in &mut class.inner_classes {
            inner.name = remapper.map(&inner.name).to_string();
            if let Some(outer) = &inner.outer_name {
                inner.outer_name = Some(remapper.map(outer).to_string());
            }
        }

        if session.contexts.generate_assert_field() && !self.field_names.contains_key(ASSERTIONS_DISABLED_FIELD) {
            let owner = &session.contexts.root_call_site(self.context).owner_class_name;
            generate_assertions_disabled_field(&mut class, owner)?;
        }

        if session.env.config.generate_smap && !session.contexts.is_inlining_lambda(self.context) {
            attach_source_map(&mut class, &self.source_mapper, session.env.config);
        }

        trace!(old = %self.old_name, new = %class.name, "object regenerated");
        Ok(class)
    }
}

/// `name`, then `name$1`, `name$2`, ... for later requests.
fn unique_field_name(names: &mut FxHashMap<String, usize>, name: &str) -> String {
    let count = names.entry(name.to_string()).or_insert(0);
    let unique = if *count == 0 {
        name.to_string()
    } else {
        format!("{name}${count}")
    };
    *count += 1;
    unique
}

fn insert_lambda(lambdas: &mut IndexMap<String, FunctionalArgument>, argument: FunctionalArgument) {
    if let Some(lambda) = argument.lambda() {
        let name = lambda.lambda_class.clone();
        lambdas.entry(name).or_insert(argument);
    }
}

/// `this`, the method's own arguments, then every captured value.
fn method_parameters_with_captured(
    captured: &ParametersBuilder,
    method: &MethodNode,
    old_name: &str,
) -> Result<Parameters> {
    let mut builder = ParametersBuilder::new();
    if !method.is_static() {
        builder.add_this(AsmType::object(old_name), false);
    }
    for ty in method.argument_types()? {
        builder.add_next_parameter(ty, false);
    }
    for param in captured.list_captured() {
        builder.add_captured_param_copy(param);
    }
    Ok(builder.build_parameters())
}

/// `LDC <class>; INVOKEVIRTUAL Class.desiredAssertionStatus` in `<clinit>`
/// asks the class the code was inlined into.
fn rewrite_assertions_disabled_field_initialization(method: &mut MethodNode, owner: &str) {
    let list = &mut method.instructions;
    let Some(status) = list
        .ids()
        .into_iter()
        .find(|id| list.get(*id).is_method_call("java/lang/Class", "desiredAssertionStatus"))
    else {
        return;
    };
    if let Some(prev) = list.prev(status) {
        if let Insn::Ldc(Constant::Type(ty)) = list.get_mut(prev) {
            *ty = AsmType::object(owner);
        }
    }
}

fn assertions_disabled_initialization(class_name: &str, owner: &str) -> Vec<Insn> {
    let (enabled, store) = (LabelId::fresh(), LabelId::fresh());
    vec![
        Insn::Ldc(Constant::Type(AsmType::object(owner))),
        Insn::method(INVOKEVIRTUAL, "java/lang/Class", "desiredAssertionStatus", "()Z"),
        Insn::jump(IFNE, enabled),
        Insn::int_const(1),
        Insn::jump(GOTO, store),
        Insn::Label(enabled),
        Insn::int_const(0),
        Insn::Label(store),
        Insn::field(PUTSTATIC, class_name, ASSERTIONS_DISABLED_FIELD, "Z"),
    ]
}

/// Adds `$assertionsDisabled`, initialized from `owner`, and prepends its
/// initialization to `<clinit>`.
fn generate_assertions_disabled_field(class: &mut ClassNode, owner: &str) -> Result<()> {
    class.fields.push(FieldNode::new(
        ACC_STATIC | ACC_FINAL | ACC_SYNTHETIC,
        ASSERTIONS_DISABLED_FIELD,
        "Z",
    ));
    let init = assertions_disabled_initialization(&class.name, owner);
    let index = match class.methods.iter().position(|m| m.name == "<clinit>") {
        Some(index) => index,
        None => {
            let mut clinit = MethodNode::new(ACC_STATIC, "<clinit>", "()V");
            clinit.instructions.push(Insn::Simple(RETURN));
            class.methods.push(clinit);
            class.methods.len() - 1
        }
    };
    let clinit = &mut class.methods[index];
    let mut instructions = InsnList::from(init);
    instructions.append(std::mem::take(&mut clinit.instructions));
    clinit.instructions = instructions;
    clinit.max_stack = compute_max_stack(clinit)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_field_names() {
        let mut names = FxHashMap::default();
        assert_eq!(unique_field_name(&mut names, "this$0"), "this$0");
        assert_eq!(unique_field_name(&mut names, "this$0"), "this$0$1");
        assert_eq!(unique_field_name(&mut names, "this$0"), "this$0$2");
        assert_eq!(unique_field_name(&mut names, "$x$inlined"), "$x$inlined");
    }

    #[test]
    fn test_clinit_asks_the_caller_class() {
        let mut clinit = MethodNode::new(ACC_STATIC, "<clinit>", "()V");
        clinit.instructions = InsnList::from(vec![
            Insn::Ldc(Constant::Type(AsmType::object("a/A$f$1"))),
            Insn::method(INVOKEVIRTUAL, "java/lang/Class", "desiredAssertionStatus", "()Z"),
            Insn::Simple(POP),
            Insn::Simple(RETURN),
        ]);
        rewrite_assertions_disabled_field_initialization(&mut clinit, "a/Caller");
        assert_eq!(
            clinit.instructions.to_vec()[0],
            Insn::Ldc(Constant::Type(AsmType::object("a/Caller")))
        );
    }

    #[test]
    fn test_assertions_field_merged_into_clinit() {
        let mut class = ClassNode::new(ACC_FINAL, "a/Caller$run$$inlined$f$1", "java/lang/Object");
        let mut clinit = MethodNode::new(ACC_STATIC, "<clinit>", "()V");
        clinit.instructions = InsnList::from(vec![Insn::int_const(4), Insn::Simple(POP), Insn::Simple(RETURN)]);
        class.methods.push(clinit);

        generate_assertions_disabled_field(&mut class, "a/Caller").unwrap();
        assert!(class.find_field(ASSERTIONS_DISABLED_FIELD).is_some());
        assert_eq!(class.methods.len(), 1);
        let insns = class.methods[0].instructions.to_vec();
        assert_eq!(insns[0], Insn::Ldc(Constant::Type(AsmType::object("a/Caller"))));
        assert_eq!(insns[insns.len() - 3..], [Insn::int_const(4), Insn::Simple(POP), Insn::Simple(RETURN)]);
        assert_eq!(class.methods[0].max_stack, 1);
    }
}
