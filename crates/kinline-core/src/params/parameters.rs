use super::ParameterInfo;
use crate::insn::AsmType;
use rustc_hash::FxHashMap;

/// Parameters of one inlined body in declaration order.
#[derive(Debug, Clone)]
pub struct Parameters {
    parameters: Vec<ParameterInfo>,
    /// Parameter position by declaration slot.
    by_slot: Vec<Option<usize>>,
    /// Declaration slot by declaration index.
    slots: FxHashMap<usize, usize>,
    args_size_on_stack: usize,
    captured_size_on_stack: usize,
}

impl Parameters {
    pub fn new(parameters: Vec<ParameterInfo>) -> Self {
        let args_size_on_stack = parameters.iter().map(ParameterInfo::size).sum();
        let captured_size_on_stack = parameters
            .iter()
            .filter(|p| p.is_captured())
            .map(ParameterInfo::size)
            .sum();
        let mut by_slot = vec![None; args_size_on_stack];
        let mut slots = FxHashMap::default();
        let mut slot = 0;
        for (position, info) in parameters.iter().enumerate() {
            if slot < by_slot.len() {
                by_slot[slot] = Some(position);
            }
            slots.insert(info.declaration_index, slot);
            slot += info.size();
        }
        Self {
            parameters,
            by_slot,
            slots,
            args_size_on_stack,
            captured_size_on_stack,
        }
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParameterInfo> {
        self.parameters.iter()
    }

    pub fn get(&self, position: usize) -> &ParameterInfo {
        &self.parameters[position]
    }

    /// Sum of the widths of every parameter, captured ones included.
    pub fn args_size_on_stack(&self) -> usize {
        self.args_size_on_stack
    }

    pub fn captured_parameters_size_on_stack(&self) -> usize {
        self.captured_size_on_stack
    }

    pub fn real_parameters_size_on_stack(&self) -> usize {
        self.args_size_on_stack - self.captured_size_on_stack
    }

    pub fn captured(&self) -> impl Iterator<Item = &ParameterInfo> {
        self.parameters.iter().filter(|p| p.is_captured())
    }

    pub fn captured_types(&self) -> Vec<AsmType> {
        self.captured().map(|p| p.ty.clone()).collect()
    }

    /// Slot `info` is declared at.
    ///
    /// # Panics
    ///
    /// If `info` does not belong to these parameters.
    pub fn declaration_slot(&self, info: &ParameterInfo) -> usize {
        match self.slots.get(&info.declaration_index) {
            Some(slot) => *slot,
            None => panic!(
                "Parameter {} (declaration index {}) is not part of the inlined signature",
                info.ty, info.declaration_index
            ),
        }
    }

    /// Parameter declared at `slot`.
    ///
    /// # Panics
    ///
    /// If no parameter starts at `slot`.
    pub fn parameter_by_declaration_slot(&self, slot: usize) -> &ParameterInfo {
        match self.by_slot.get(slot).copied().flatten() {
            Some(position) => &self.parameters[position],
            None => panic!("No parameter declared at slot {slot}"),
        }
    }

    /// Captured parameter holding `field` of `owner`.
    pub fn find_captured(&self, owner: &str, field: &str) -> Option<&ParameterInfo> {
        self.captured().find(|p| {
            p.captured_desc()
                .is_some_and(|desc| desc.containing_lambda == owner && desc.field_name == field)
        })
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = &'a ParameterInfo;
    type IntoIter = std::slice::Iter<'a, ParameterInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
