use super::{CapturedParamDesc, CapturedParamInfo, ParameterInfo, Parameters};
use crate::insn::{AsmType, StackValue};

/// Accumulates parameters in call-site evaluation order.
#[derive(Debug, Clone, Default)]
pub struct ParametersBuilder {
    value_and_hidden: Vec<ParameterInfo>,
    captured: Vec<ParameterInfo>,
    value_param_start: usize,
    next_parameter_offset: usize,
}

impl ParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_parameter_offset(&self) -> usize {
        self.next_parameter_offset
    }

    pub fn add_this(&mut self, ty: AsmType, skipped: bool) -> &mut ParameterInfo {
        let declaration_index = self.value_and_hidden.len();
        self.add_parameter(ty, skipped, declaration_index)
    }

    pub fn add_next_parameter(&mut self, ty: AsmType, skipped: bool) -> &mut ParameterInfo {
        let declaration_index = self.value_and_hidden.len();
        self.add_parameter(ty, skipped, declaration_index)
    }

    /// Adds a value parameter whose declaration position (counted from the
    /// first value parameter) may differ from its evaluation position.
    pub fn add_next_value_parameter(
        &mut self,
        ty: AsmType,
        skipped: bool,
        remap_value: Option<StackValue>,
        parameter_index: Option<usize>,
    ) -> &mut ParameterInfo {
        let declaration_index = match parameter_index {
            Some(index) => index + self.value_param_start,
            None => self.value_and_hidden.len(),
        };
        let info = self.add_parameter(ty, skipped, declaration_index);
        info.remap_value = remap_value;
        info
    }

    fn add_parameter(
        &mut self,
        ty: AsmType,
        skipped: bool,
        declaration_index: usize,
    ) -> &mut ParameterInfo {
        let info = ParameterInfo::new(ty, skipped, self.next_parameter_offset, declaration_index);
        self.next_parameter_offset += info.size();
        self.value_and_hidden.push(info);
        let last = self.value_and_hidden.len() - 1;
        &mut self.value_and_hidden[last]
    }

    fn push_captured(&mut self, mut info: ParameterInfo) -> &mut ParameterInfo {
        info.index = self.next_parameter_offset;
        self.next_parameter_offset += info.size();
        self.captured.push(info);
        let last = self.captured.len() - 1;
        &mut self.captured[last]
    }

    pub fn add_captured_param(
        &mut self,
        desc: CapturedParamDesc,
        new_field_name: impl Into<String>,
        skip_in_constructor: bool,
    ) -> &mut ParameterInfo {
        let mut info = ParameterInfo::new(desc.ty.clone(), false, 0, 0);
        info.captured = Some(CapturedParamInfo {
            desc,
            new_field_name: new_field_name.into(),
            skip_in_constructor,
            is_synthetic: false,
        });
        self.push_captured(info)
    }

    /// Recaptures `original`, which lives at the same offset of the frame
    /// the new parameters are inlined into.
    pub fn add_captured_param_from(
        &mut self,
        original: &ParameterInfo,
        new_field_name: impl Into<String>,
    ) -> &mut ParameterInfo {
        let mut info = ParameterInfo::new(original.ty.clone(), original.is_skipped, 0, 0);
        if !original.is_skipped {
            info.remap_value = Some(StackValue::local(original.index, original.ty.clone()));
        }
        info.functional_argument = original.functional_argument.clone();
        let new_field_name = new_field_name.into();
        let captured = original.captured.as_ref();
        info.captured = Some(CapturedParamInfo {
            desc: captured.map(|c| c.desc.clone()).unwrap_or_else(|| {
                CapturedParamDesc::new("", new_field_name.clone(), original.ty.clone())
            }),
            new_field_name,
            skip_in_constructor: false,
            is_synthetic: captured.is_some_and(|c| c.is_synthetic),
        });
        self.push_captured(info)
    }

    pub fn add_captured_param_copy(&mut self, copy_from: &ParameterInfo) -> &mut ParameterInfo {
        self.push_captured(copy_from.clone())
    }

    /// Captures `field_name` of `containing_lambda`, inheriting the
    /// functional argument of `original` when there is one.
    pub fn add_captured_param_named(
        &mut self,
        containing_lambda: &str,
        field_name: &str,
        new_field_name: &str,
        ty: AsmType,
        skipped: bool,
        original: Option<&ParameterInfo>,
    ) -> &mut ParameterInfo {
        let mut info = ParameterInfo::new(ty.clone(), skipped, 0, 0);
        info.functional_argument = original.and_then(|o| o.functional_argument.clone());
        info.captured = Some(CapturedParamInfo {
            desc: CapturedParamDesc::new(containing_lambda, field_name, ty),
            new_field_name: new_field_name.to_string(),
            skip_in_constructor: false,
            is_synthetic: false,
        });
        self.push_captured(info)
    }

    pub fn mark_value_parameters_start(&mut self) {
        self.value_param_start = self.value_and_hidden.len();
    }

    pub fn list_captured(&self) -> &[ParameterInfo] {
        &self.captured
    }

    pub fn list_captured_mut(&mut self) -> &mut [ParameterInfo] {
        &mut self.captured
    }

    pub fn list_all_params(&self) -> impl Iterator<Item = &ParameterInfo> {
        self.value_and_hidden.iter().chain(&self.captured)
    }

    /// Value parameters in declaration order followed by the captured ones.
    pub fn build_parameters(&self) -> Parameters {
        let mut params = self.value_and_hidden.clone();
        params.sort_by_key(|p| p.declaration_index);
        let mut next_declaration_index = params
            .iter()
            .map(|p| p.declaration_index + 1)
            .max()
            .unwrap_or(0);
        for captured in &self.captured {
            let mut captured = captured.clone();
            captured.declaration_index = next_declaration_index;
            next_declaration_index += 1;
            params.push(captured);
        }
        Parameters::new(params)
    }
}
