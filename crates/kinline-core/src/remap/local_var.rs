use crate::errors::{InlineError, Result};
use crate::insn::opcodes::is_store;
use crate::insn::{AsmType, Insn, LocalVariable, StackValue};
use crate::params::{ParameterInfo, Parameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapStatus {
    /// Materialized as a new local of the consuming frame.
    Shift,
    /// Read from an existing value instead.
    Remapped,
    /// A skipped parameter; any access is a bug.
    Fail,
}

#[derive(Debug, Clone)]
pub struct RemapInfo<'p> {
    pub parameter: Option<&'p ParameterInfo>,
    pub value: Option<StackValue>,
    pub status: RemapStatus,
}

/// Translates slots of the inlined body (declaration space) into slots of
/// the frame the body is inlined into.
///
/// Parameters without a remap value get fresh locals, in declaration order,
/// starting at `additional_shift`. Locals past the parameters follow them.
pub struct LocalVarRemapper<'p> {
    params: &'p Parameters,
    additional_shift: usize,
    actual_params_size: usize,
    remap_values: Vec<Option<StackValue>>,
}

impl<'p> LocalVarRemapper<'p> {
    pub fn new(params: &'p Parameters, additional_shift: usize) -> Self {
        let mut remap_values = vec![None; params.args_size_on_stack()];
        let mut real_size = 0;
        for info in params {
            let slot = params.declaration_slot(info);
            if !info.is_skipped_or_remapped() {
                remap_values[slot] = Some(StackValue::local(real_size, info.ty.clone()));
                real_size += info.size();
            } else {
                remap_values[slot] = info.remap_value.clone();
                if info.is_synthetic() {
                    real_size += info.size();
                }
            }
        }
        Self {
            params,
            additional_shift,
            actual_params_size: real_size,
            remap_values,
        }
    }

    /// Width of the parameter area in the consuming frame.
    pub fn actual_params_size(&self) -> usize {
        self.actual_params_size
    }

    pub fn additional_shift(&self) -> usize {
        self.additional_shift
    }

    fn do_remap(&self, index: usize) -> RemapInfo<'p> {
        let args_size = self.params.args_size_on_stack();
        if index >= args_size {
            let shifted = index - args_size + self.actual_params_size + self.additional_shift;
            return RemapInfo {
                parameter: None,
                value: Some(StackValue::local(shifted, AsmType::java_object())),
                status: RemapStatus::Shift,
            };
        }
        let info = self.params.parameter_by_declaration_slot(index);
        match &self.remap_values[index] {
            None => RemapInfo {
                parameter: Some(info),
                value: None,
                status: RemapStatus::Fail,
            },
            Some(value) if info.is_skipped_or_remapped() => RemapInfo {
                parameter: Some(info),
                value: Some(value.clone()),
                status: RemapStatus::Remapped,
            },
            Some(StackValue::Local { index, ty }) => RemapInfo {
                parameter: None,
                value: Some(StackValue::local(index + self.additional_shift, ty.clone())),
                status: RemapStatus::Shift,
            },
            Some(other) => RemapInfo {
                parameter: Some(info),
                value: Some(other.clone()),
                status: RemapStatus::Remapped,
            },
        }
    }

    pub fn remap(&self, index: usize) -> Result<RemapInfo<'p>> {
        let info = self.do_remap(index);
        if info.status == RemapStatus::Fail {
            let ty = info
                .parameter
                .map(|p| p.ty.to_string())
                .unwrap_or_default();
            return Err(InlineError::internal(format!(
                "Trying to access skipped parameter: {ty} at {index}"
            )));
        }
        Ok(info)
    }

    pub fn visit_var_insn(&self, opcode: u8, var: usize, out: &mut Vec<Insn>) -> Result<()> {
        let info = self.remap(var)?;
        match (info.status, info.value) {
            (RemapStatus::Shift, Some(StackValue::Local { index, .. })) => {
                out.push(Insn::var(opcode, index));
                Ok(())
            }
            (_, Some(value)) if !is_store(opcode) => {
                let target = info.parameter.map_or_else(|| value.ty(), |p| p.ty.clone());
                value.put(&target, out);
                Ok(())
            }
            _ => Err(InlineError::internal(format!(
                "Store into remapped parameter at slot {var}"
            ))),
        }
    }

    pub fn visit_iinc(&self, var: usize, incr: i32, out: &mut Vec<Insn>) -> Result<()> {
        match self.remap(var)? {
            RemapInfo {
                status: RemapStatus::Shift,
                value: Some(StackValue::Local { index, .. }),
                ..
            } => {
                out.push(Insn::Iinc { var: index, incr });
                Ok(())
            }
            _ => Err(InlineError::internal(format!(
                "Increment of remapped parameter at slot {var}"
            ))),
        }
    }

    /// Debug entry for the consuming frame; `None` for remapped slots.
    pub fn visit_local_variable(&self, local: &LocalVariable) -> Option<LocalVariable> {
        match self.do_remap(local.index) {
            RemapInfo {
                status: RemapStatus::Shift,
                value: Some(StackValue::Local { index, .. }),
                ..
            } => Some(LocalVariable {
                index,
                ..local.clone()
            }),
            _ => None,
        }
    }
}
