//! Expansion of the `$default` stub of an inline function.
//!
//! The stub starts with one guard per parameter that has a default value:
//!
//! ```text
//! ILOAD mask; ICONST bit; IAND; IFEQ L
//!     <compute default>; xSTORE slot
//! L:
//! ```
//!
//! The masks are constants at an inline call site, so every guard is
//! resolved statically. Defaults that are lambdas are pulled out so they can
//! be inlined like a lambda written at the call site.

use crate::errors::{InlineError, Result};
use crate::insn::markers::default_lambda_fake_call;
use crate::insn::opcodes::*;
use crate::insn::{AsmType, Insn, InsnId, InsnList, LabelId, MethodNode};
use crate::reified::is_need_class_reification_marker;
use rustc_hash::FxHashSet;
use tracing::trace;

/// A default value that is a lambda, removed from the stub body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDefaultLambda {
    /// Internal name of the lambda class.
    pub ty: String,
    /// Constructor arguments, left on the stack for the fake call.
    pub captured_args: Vec<AsmType>,
    /// Slot of the parameter the lambda is the default of.
    pub offset: usize,
    pub needs_reification: bool,
}

#[derive(Debug)]
struct Condition {
    mask_instruction: InsnId,
    jump_instruction: InsnId,
    jump_label: LabelId,
    /// Store of the default value, right before the guard's label.
    var_insn: Option<InsnId>,
    var_index: usize,
    expand_not_delete: bool,
}

/// Resolves every guard of `node` against `masks` (mask words stored from
/// slot `mask_start`) and drops the method handle guard. Guards whose bit is
/// set lose only their test; the others lose their whole block. Defaults of
/// slots in `valid_offsets` that construct a lambda are extracted and
/// replaced by a fake call consuming the constructor arguments.
pub fn expand_mask_conditions_and_update_variable_nodes(
    node: &mut MethodNode,
    mask_start: usize,
    masks: &[i32],
    method_handle_index: Option<usize>,
    valid_offsets: &FxHashSet<usize>,
) -> Result<Vec<ExtractedDefaultLambda>> {
    let is_mask_index = |var: usize| (mask_start..mask_start + masks.len()).contains(&var);
    let list = &node.instructions;

    let mut conditions = Vec::new();
    for (id, insn) in list.iter() {
        let Insn::Var { opcode, var } = insn else {
            continue;
        };
        let (opcode, var) = (*opcode, *var);
        // a store into a mask slot or the method handle means the real body started
        if is_mask_index(var) && opcode != ILOAD || Some(var) == method_handle_index && opcode != ALOAD {
            break;
        }
        if let Some(condition) = mask_condition(list, id, var, mask_start, masks, &is_mask_index) {
            conditions.push(condition);
        } else if Some(var) == method_handle_index {
            if let Some(condition) = method_handle_condition(list, id) {
                conditions.push(condition);
            }
        }
    }

    let mut to_delete: FxHashSet<InsnId> = FxHashSet::default();
    let mut to_insert: Vec<(InsnId, Insn)> = Vec::new();
    let lambdas = extract_default_lambdas(
        list,
        &conditions,
        valid_offsets,
        &mut to_delete,
        &mut to_insert,
    )?;

    for condition in &conditions {
        let mut cursor = Some(condition.mask_instruction);
        while let Some(id) = cursor {
            if list.get(id).as_label() == Some(condition.jump_label) {
                break;
            }
            to_delete.insert(id);
            if condition.expand_not_delete && id == condition.jump_instruction {
                break;
            }
            cursor = list.next(id);
        }
    }

    for condition in conditions.iter().filter(|c| c.expand_not_delete && c.var_insn.is_some()) {
        for local in &mut node.local_variables {
            if local.index == condition.var_index && local.index < mask_start {
                local.start = condition.jump_label;
            }
        }
    }

    let list = &mut node.instructions;
    for (position, insn) in to_insert {
        list.insert_after(position, insn);
    }
    for id in to_delete {
        if list.contains(id) {
            list.remove(id);
        }
    }
    trace!(
        conditions = conditions.len(),
        lambdas = lambdas.len(),
        "expanded default mask conditions"
    );
    Ok(lambdas)
}

fn mask_condition(
    list: &InsnList,
    id: InsnId,
    var: usize,
    mask_start: usize,
    masks: &[i32],
    is_mask_index: &impl Fn(usize) -> bool,
) -> Option<Condition> {
    if !is_mask_index(var) {
        return None;
    }
    let constant = list.next(id)?;
    let and = list.next(constant)?;
    let jump = list.next(and)?;
    if list.get(and).opcode() != Some(IAND) {
        return None;
    }
    let Insn::Jump {
        opcode: IFEQ,
        label,
    } = list.get(jump)
    else {
        return None;
    };
    let bit = list.get(constant).int_value()?;
    let mask = masks[var - mask_start];
    let (var_insn, var_index) = store_before(list, *label);
    Some(Condition {
        mask_instruction: id,
        jump_instruction: jump,
        jump_label: *label,
        var_insn,
        var_index,
        expand_not_delete: mask & bit != 0,
    })
}

/// `ALOAD mh; IFNULL L; NEW ...` is always deleted.
fn method_handle_condition(list: &InsnList, id: InsnId) -> Option<Condition> {
    let jump = list.next(id)?;
    let Insn::Jump {
        opcode: IFNULL,
        label,
    } = list.get(jump)
    else {
        return None;
    };
    let creation = list.next(jump)?;
    if list.get(creation).opcode() != Some(NEW) {
        return None;
    }
    Some(Condition {
        mask_instruction: id,
        jump_instruction: jump,
        jump_label: *label,
        var_insn: None,
        var_index: 0,
        expand_not_delete: false,
    })
}

fn store_before(list: &InsnList, label: LabelId) -> (Option<InsnId>, usize) {
    let store = list
        .find_label(label)
        .and_then(|id| list.prev(id))
        .filter(|id| matches!(list.get(*id), Insn::Var { opcode, .. } if is_store(*opcode)));
    match store.map(|id| (id, list.get(id))) {
        Some((id, Insn::Var { var, .. })) => (Some(id), *var),
        _ => (None, 0),
    }
}

fn extract_default_lambdas(
    list: &InsnList,
    conditions: &[Condition],
    valid_offsets: &FxHashSet<usize>,
    to_delete: &mut FxHashSet<InsnId>,
    to_insert: &mut Vec<(InsnId, Insn)>,
) -> Result<Vec<ExtractedDefaultLambda>> {
    let mut lambdas = Vec::new();
    for condition in conditions
        .iter()
        .filter(|c| c.expand_not_delete && valid_offsets.contains(&c.var_index))
    {
        let store = condition.var_insn.ok_or_else(|| {
            InlineError::internal(format!(
                "Default value of slot {} is not stored before its guard ends",
                condition.var_index
            ))
        })?;
        let mut instance = list
            .prev(store)
            .ok_or_else(|| InlineError::internal("Default lambda store has no value"))?;
        if list.get(instance).opcode() == Some(CHECKCAST) {
            to_delete.insert(instance);
            instance = list
                .prev(instance)
                .ok_or_else(|| InlineError::internal("Default lambda cast has no value"))?;
        }
        let reification_marker = |id: InsnId| {
            list.prev(id)
                .filter(|prev| is_need_class_reification_marker(list.get(*prev)))
        };
        let lambda = match list.get(instance) {
            Insn::Method {
                opcode: INVOKESPECIAL,
                owner,
                name,
                desc,
                ..
            } if name == "<init>" => {
                let creation = find_creation(list, condition, owner)?;
                let dup = list
                    .next(creation)
                    .filter(|id| list.get(*id).opcode() == Some(DUP))
                    .ok_or_else(|| {
                        InlineError::internal(format!(
                            "DUP should follow the creation of default lambda {owner}"
                        ))
                    })?;
                to_delete.extend([creation, dup, instance, store]);
                let marker = reification_marker(creation);
                to_delete.extend(marker);
                let captured_args = AsmType::argument_types(desc)?;
                to_insert.push((
                    store,
                    default_lambda_fake_call(
                        condition.var_index,
                        AsmType::method_descriptor(&captured_args, &AsmType::Void),
                    ),
                ));
                ExtractedDefaultLambda {
                    ty: owner.clone(),
                    captured_args,
                    offset: condition.var_index,
                    needs_reification: marker.is_some(),
                }
            }
            Insn::Field {
                opcode: GETSTATIC,
                owner,
                ..
            } => {
                to_delete.extend([instance, store]);
                let marker = reification_marker(instance);
                to_delete.extend(marker);
                ExtractedDefaultLambda {
                    ty: owner.clone(),
                    captured_args: Vec::new(),
                    offset: condition.var_index,
                    needs_reification: marker.is_some(),
                }
            }
            other => {
                return Err(InlineError::internal(format!(
                    "Can't extract default lambda info for slot {}. Unknown instruction: {other}",
                    condition.var_index
                )))
            }
        };
        lambdas.push(lambda);
    }
    Ok(lambdas)
}

/// The single `NEW owner` inside the guarded block.
fn find_creation(list: &InsnList, condition: &Condition, owner: &str) -> Result<InsnId> {
    let mut found = Vec::new();
    let mut cursor = list.next(condition.jump_instruction);
    while let Some(id) = cursor {
        let insn = list.get(id);
        if insn.as_label() == Some(condition.jump_label) {
            break;
        }
        if matches!(insn, Insn::Type { opcode: NEW, desc } if desc == owner) {
            found.push(id);
        }
        cursor = list.next(id);
    }
    match found.as_slice() {
        [single] => Ok(*single),
        _ => Err(InlineError::internal(format!(
            "Expected exactly one creation of default lambda {owner}, found {}",
            found.len()
        ))),
    }
}
