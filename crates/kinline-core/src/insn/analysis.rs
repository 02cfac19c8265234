//! Forward data-flow over a method body tracking where each stack value
//! came from.
//!
//! The inliner only needs to know which values are loads of (lambda)
//! parameters and which are fresh `NEW` objects, so values carry an origin
//! instead of a type. The same pass yields the maximum stack depth.

use crate::errors::{InlineError, Result};
use crate::insn::list::{Constant, Insn, InsnId, LabelId};
use crate::insn::method::MethodNode;
use crate::insn::opcodes::*;
use crate::insn::types::AsmType;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Pushed by a load of local `slot`.
    Load { insn: InsnId, slot: usize },
    /// Pushed by `NEW`.
    New(InsnId),
    /// Pushed by `GETSTATIC`, which is how folded captured fields read.
    Static(InsnId),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub size: usize,
    pub origin: Origin,
}

impl Value {
    fn unknown(size: usize) -> Self {
        Value {
            size,
            origin: Origin::Unknown,
        }
    }

    fn merge(self, other: Value) -> Value {
        if self.origin == other.origin {
            self
        } else {
            Value::unknown(self.size.max(other.size))
        }
    }
}

pub type Frame = Vec<Value>;

/// Stack frames before every reachable instruction.
pub struct Frames {
    frames: FxHashMap<InsnId, Frame>,
    max_stack: usize,
}

impl Frames {
    pub fn analyze(method: &MethodNode) -> Result<Self> {
        let list = &method.instructions;
        let ids = list.ids();
        let labels: FxHashMap<LabelId, usize> = ids
            .iter()
            .enumerate()
            .filter_map(|(i, id)| list.get(*id).as_label().map(|label| (label, i)))
            .collect();
        let resolve = |label: LabelId| -> Result<usize> {
            labels
                .get(&label)
                .copied()
                .ok_or_else(|| InlineError::internal(format!("Jump to unknown label {label}")))
        };

        let mut frames: Vec<Option<Frame>> = vec![None; ids.len()];
        let mut worklist: Vec<usize> = Vec::new();
        let mut max_stack = 0;

        if !ids.is_empty() {
            frames[0] = Some(Vec::new());
            worklist.push(0);
        }
        for block in &method.try_catch_blocks {
            let handler = resolve(block.handler)?;
            if frames[handler].is_none() {
                frames[handler] = Some(vec![Value::unknown(1)]);
                worklist.push(handler);
                max_stack = max_stack.max(1);
            }
        }

        while let Some(index) = worklist.pop() {
            let id = ids[index];
            let insn = list.get(id);
            let mut stack = frames[index].clone().unwrap_or_default();
            execute(id, insn, &mut stack).map_err(|err| {
                InlineError::internal(format!(
                    "{err} at instruction {index} ({insn}) of {}{}",
                    method.name, method.desc
                ))
            })?;
            max_stack = max_stack.max(stack.iter().map(|v| v.size).sum());

            let mut successors: Vec<usize> = Vec::new();
            for target in insn.jump_targets() {
                successors.push(resolve(target)?);
            }
            if !insn.is_terminal() && index + 1 < ids.len() {
                successors.push(index + 1);
            }
            for succ in successors {
                let changed = if let Some(existing) = frames[succ].as_mut() {
                    merge_into(existing, &stack).map_err(|err| {
                        InlineError::internal(format!(
                            "{err} at instruction {succ} of {}{}",
                            method.name, method.desc
                        ))
                    })?
                } else {
                    frames[succ] = Some(stack.clone());
                    true
                };
                if changed {
                    worklist.push(succ);
                }
            }
        }

        let frames = ids
            .iter()
            .zip(frames)
            .filter_map(|(id, frame)| frame.map(|frame| (*id, frame)))
            .collect();
        Ok(Frames { frames, max_stack })
    }

    /// Stack before `id`; `None` when the instruction is unreachable.
    pub fn frame(&self, id: InsnId) -> Option<&Frame> {
        self.frames.get(&id)
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// Receiver (for instance calls) and arguments of the call at `id`.
    pub fn call_operands(&self, id: InsnId, insn: &Insn) -> Option<(Option<Value>, Vec<Value>)> {
        let Insn::Method { opcode, desc, .. } = insn else {
            return None;
        };
        let frame = self.frame(id)?;
        let arg_count = AsmType::argument_types(desc).ok()?.len();
        let has_receiver = *opcode != INVOKESTATIC;
        let total = arg_count + usize::from(has_receiver);
        if frame.len() < total {
            return None;
        }
        let operands = &frame[frame.len() - total..];
        let receiver = has_receiver.then(|| operands[0]);
        let args = operands[usize::from(has_receiver)..].to_vec();
        Some((receiver, args))
    }
}

/// Maximum stack depth of `method`.
pub fn compute_max_stack(method: &MethodNode) -> Result<usize> {
    Ok(Frames::analyze(method)?.max_stack())
}

fn merge_into(existing: &mut Frame, incoming: &Frame) -> std::result::Result<bool, String> {
    if existing.len() != incoming.len() {
        return Err(format!(
            "Inconsistent stack height {} != {}",
            existing.len(),
            incoming.len()
        ));
    }
    let mut changed = false;
    for (old, new) in existing.iter_mut().zip(incoming) {
        let merged = old.merge(*new);
        if merged != *old {
            *old = merged;
            changed = true;
        }
    }
    Ok(changed)
}

fn pop(stack: &mut Frame) -> std::result::Result<Value, String> {
    stack.pop().ok_or_else(|| "Stack underflow".to_string())
}

fn pop_n(stack: &mut Frame, n: usize) -> std::result::Result<(), String> {
    for _ in 0..n {
        pop(stack)?;
    }
    Ok(())
}

/// Pops values until `slots` slots are consumed, returning them top first.
fn pop_slots(stack: &mut Frame, slots: usize) -> std::result::Result<Vec<Value>, String> {
    let mut taken = Vec::new();
    let mut size = 0;
    while size < slots {
        let value = pop(stack)?;
        size += value.size;
        taken.push(value);
    }
    if size != slots {
        return Err("Operand straddles a two-slot value".to_string());
    }
    Ok(taken)
}

fn push_all_rev(stack: &mut Frame, values: &[Value]) {
    for value in values.iter().rev() {
        stack.push(*value);
    }
}

fn execute(id: InsnId, insn: &Insn, stack: &mut Frame) -> std::result::Result<(), String> {
    let one = Value::unknown(1);
    let two = Value::unknown(2);
    match insn {
        Insn::Label(_) | Insn::LineNumber { .. } | Insn::Iinc { .. } => {}
        Insn::Var { opcode, var } => {
            if is_load(*opcode) {
                stack.push(Value {
                    size: AsmType::for_var_opcode(*opcode).size(),
                    origin: Origin::Load {
                        insn: id,
                        slot: *var,
                    },
                });
            } else {
                pop(stack)?;
            }
        }
        Insn::Int { opcode, .. } => {
            if *opcode == NEWARRAY {
                pop(stack)?;
            }
            stack.push(one);
        }
        Insn::Ldc(constant) => stack.push(match constant {
            Constant::Long(_) | Constant::Double(_) => two,
            _ => one,
        }),
        Insn::Type { opcode, .. } => match *opcode {
            NEW => stack.push(Value {
                size: 1,
                origin: Origin::New(id),
            }),
            CHECKCAST => {
                let value = pop(stack)?;
                stack.push(value);
            }
            _ => {
                pop(stack)?;
                stack.push(one);
            }
        },
        Insn::Field { opcode, desc, .. } => {
            let size = AsmType::from_descriptor(desc)
                .map(|ty| ty.size())
                .map_err(|err| err.to_string())?;
            match *opcode {
                GETSTATIC => stack.push(Value {
                    size,
                    origin: Origin::Static(id),
                }),
                PUTSTATIC => pop_n(stack, 1)?,
                GETFIELD => {
                    pop(stack)?;
                    stack.push(Value::unknown(size));
                }
                _ => pop_n(stack, 2)?,
            }
        }
        Insn::Method { opcode, desc, .. } => {
            let (args, ret) =
                crate::insn::types::parse_method_descriptor(desc).map_err(|err| err.to_string())?;
            pop_n(stack, args.len())?;
            if *opcode != INVOKESTATIC {
                pop(stack)?;
            }
            if ret.size() > 0 {
                stack.push(Value::unknown(ret.size()));
            }
        }
        Insn::Jump { opcode, .. } => match *opcode {
            GOTO => {}
            IF_ICMPEQ..=IF_ACMPNE => pop_n(stack, 2)?,
            _ => pop_n(stack, 1)?,
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => pop_n(stack, 1)?,
        Insn::Simple(op) => execute_simple(*op, stack)?,
    }
    Ok(())
}

fn execute_simple(op: u8, stack: &mut Frame) -> std::result::Result<(), String> {
    let one = Value::unknown(1);
    let two = Value::unknown(2);
    match op {
        NOP => {}
        ACONST_NULL..=ICONST_5 | FCONST_0..=FCONST_2 => stack.push(one),
        LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 => stack.push(two),
        IALOAD..=SALOAD => {
            pop_n(stack, 2)?;
            stack.push(if op == LALOAD || op == DALOAD { two } else { one });
        }
        IASTORE..=SASTORE => pop_n(stack, 3)?,
        POP => pop_n(stack, 1)?,
        POP2 => {
            pop_slots(stack, 2)?;
        }
        DUP => {
            let v = pop(stack)?;
            stack.extend([v, v]);
        }
        DUP_X1 => {
            let v1 = pop(stack)?;
            let v2 = pop(stack)?;
            stack.extend([v1, v2, v1]);
        }
        DUP_X2 => {
            let v1 = pop(stack)?;
            let below = pop_slots(stack, 2)?;
            stack.push(v1);
            push_all_rev(stack, &below);
            stack.push(v1);
        }
        DUP2 => {
            let top = pop_slots(stack, 2)?;
            push_all_rev(stack, &top);
            push_all_rev(stack, &top);
        }
        DUP2_X1 => {
            let top = pop_slots(stack, 2)?;
            let v3 = pop(stack)?;
            push_all_rev(stack, &top);
            stack.push(v3);
            push_all_rev(stack, &top);
        }
        DUP2_X2 => {
            let top = pop_slots(stack, 2)?;
            let below = pop_slots(stack, 2)?;
            push_all_rev(stack, &top);
            push_all_rev(stack, &below);
            push_all_rev(stack, &top);
        }
        SWAP => {
            let v1 = pop(stack)?;
            let v2 = pop(stack)?;
            stack.extend([v1, v2]);
        }
        IADD..=DREM | ISHL..=LXOR => {
            pop_n(stack, 2)?;
            stack.push(if wide_result(op) { two } else { one });
        }
        INEG..=DNEG => {
            pop(stack)?;
            stack.push(if op == LNEG || op == DNEG { two } else { one });
        }
        I2L..=I2S => {
            pop(stack)?;
            stack.push(match op {
                I2L | I2D | L2D | F2L | F2D | D2L => two,
                _ => one,
            });
        }
        LCMP..=DCMPG => {
            pop_n(stack, 2)?;
            stack.push(one);
        }
        IRETURN..=ARETURN | ATHROW | MONITORENTER | MONITOREXIT => pop_n(stack, 1)?,
        RETURN => {}
        ARRAYLENGTH => {
            pop(stack)?;
            stack.push(one);
        }
        other => return Err(format!("Unsupported opcode {other}")),
    }
    Ok(())
}

/// Long and double arithmetic, where the opcode parity tells the type.
fn wide_result(op: u8) -> bool {
    match op {
        IADD..=DREM => matches!((op - IADD) % 4, 1 | 3),
        ISHL..=LUSHR => matches!(op, LSHL | LSHR | LUSHR),
        IAND..=LXOR => matches!(op, LAND | LOR | LXOR),
        _ => false,
    }
}
