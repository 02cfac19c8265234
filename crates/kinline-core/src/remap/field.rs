use crate::insn::markers::{
    fold_name, is_captured_field_name, unfold_name, CAPTURED_THIS_FIELD, THIS,
};
use crate::insn::opcodes::*;
use crate::insn::{AsmType, Insn, InsnId, InsnList, StackValue};
use crate::params::{ParameterInfo, Parameters};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone)]
pub enum FieldRemapperKind {
    /// The inline function itself; it owns no captured fields.
    Root,
    /// Body of an inline lambda whose captured fields live in `lambda_name`.
    InlinedLambda { lambda_name: String },
    /// Method of an anonymous object being copied into `new_owner`.
    RegeneratedLambda {
        old_owner: String,
        new_owner: String,
        is_constructor: bool,
        /// Inline lambdas whose captured fields were copied into the object.
        recaptured_lambdas: FxHashSet<String>,
    },
}

/// Resolves reads of captured fields for one inlining level.
///
/// A read `ALOAD 0 [GETFIELD this$0]* GETFIELD owner.$x` is folded into the
/// placeholder `GETSTATIC owner.$$$x` by the level that owns `owner`; the
/// placeholder is then replaced by wherever that level keeps the value.
#[derive(Debug)]
pub struct FieldRemapper<'a> {
    kind: FieldRemapperKind,
    parameters: &'a Parameters,
    parent: Option<&'a FieldRemapper<'a>>,
}

impl<'a> FieldRemapper<'a> {
    pub fn root(parameters: &'a Parameters) -> Self {
        Self {
            kind: FieldRemapperKind::Root,
            parameters,
            parent: None,
        }
    }

    pub fn new(
        kind: FieldRemapperKind,
        parameters: &'a Parameters,
        parent: Option<&'a FieldRemapper<'a>>,
    ) -> Self {
        Self {
            kind,
            parameters,
            parent,
        }
    }

    pub fn kind(&self) -> &FieldRemapperKind {
        &self.kind
    }

    pub fn parameters(&self) -> &'a Parameters {
        self.parameters
    }

    pub fn parent(&self) -> Option<&'a FieldRemapper<'a>> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, FieldRemapperKind::Root)
    }

    pub fn is_regenerating(&self) -> bool {
        matches!(self.kind, FieldRemapperKind::RegeneratedLambda { .. })
    }

    /// Class whose captured fields this level owns.
    pub fn original_lambda_name(&self) -> Option<&str> {
        match &self.kind {
            FieldRemapperKind::Root => None,
            FieldRemapperKind::InlinedLambda { lambda_name } => Some(lambda_name),
            FieldRemapperKind::RegeneratedLambda { old_owner, .. } => Some(old_owner),
        }
    }

    pub fn new_lambda_name(&self) -> Option<&str> {
        match &self.kind {
            FieldRemapperKind::RegeneratedLambda { new_owner, .. } => Some(new_owner),
            _ => self.parent.and_then(FieldRemapper::new_lambda_name),
        }
    }

    pub fn can_process(&self, owner: &str, field: &str) -> bool {
        match &self.kind {
            FieldRemapperKind::Root => false,
            FieldRemapperKind::InlinedLambda { lambda_name } => {
                owner == lambda_name && is_captured_field_name(field)
            }
            FieldRemapperKind::RegeneratedLambda {
                old_owner,
                recaptured_lambdas,
                ..
            } => {
                (owner == old_owner && is_captured_field_name(field))
                    || recaptured_lambdas.contains(owner)
            }
        }
    }

    fn ancestor(&self, depth: usize) -> Option<&FieldRemapper<'a>> {
        let mut level = self;
        for _ in 0..depth {
            level = level.parent?;
        }
        Some(level)
    }

    /// Finds the captured parameter for `owner.field` at this level or above.
    pub fn find_field(&self, owner: &str, field: &str) -> Option<(&FieldRemapper<'a>, &'a ParameterInfo)> {
        match self.parameters.find_captured(owner, field) {
            Some(info) => Some((self, info)),
            None => self.parent.and_then(|parent| parent.find_field(owner, field)),
        }
    }

    /// Value of a captured parameter of this level as seen by code inlined
    /// into this level; `None` for skipped parameters.
    pub fn captured_value(&self, info: &ParameterInfo) -> Option<StackValue> {
        if info.is_skipped {
            return None;
        }
        match &self.kind {
            FieldRemapperKind::RegeneratedLambda {
                new_owner,
                is_constructor: false,
                ..
            } => Some(StackValue::field(
                info.ty.clone(),
                new_owner,
                info.new_field_name().unwrap_or_default(),
            )),
            _ => Some(StackValue::local(
                self.parameters.declaration_slot(info),
                info.ty.clone(),
            )),
        }
    }

    /// Folds every captured field chain of `list` that some level of this
    /// chain owns into a placeholder.
    pub fn fold_field_access_chains(&self, list: &mut InsnList) {
        for id in list.ids() {
            if !list.contains(id) || !matches!(list.get(id), Insn::Var { opcode: ALOAD, var: 0 }) {
                continue;
            }
            let chain = field_access_chain(list, id);
            // the deepest hop belongs to the outermost level
            for position in (0..chain.len()).rev() {
                let Insn::Field {
                    owner, name, desc, ..
                } = list.get(chain[position]).clone()
                else {
                    continue;
                };
                let owns = self
                    .ancestor(position)
                    .is_some_and(|level| level.can_process(&owner, &name));
                if owns {
                    list.set(chain[position], Insn::field(GETSTATIC, owner, fold_name(&name), desc));
                    list.remove(id);
                    for hop in &chain[..position] {
                        list.remove(*hop);
                    }
                    break;
                }
            }
        }
    }

    /// Value of `info`, owned by `level` (this level or a parent), as seen
    /// from code at this level. Each regenerated object between the two
    /// adds a hop through its `this$0`.
    pub fn captured_value_from(
        &self,
        level: &FieldRemapper<'_>,
        info: &ParameterInfo,
    ) -> Option<StackValue> {
        let value = level.captured_value(info)?;
        Some(self.through_outer_objects(level, value))
    }

    fn through_outer_objects(&self, level: &FieldRemapper<'_>, value: StackValue) -> StackValue {
        let StackValue::Field {
            ty,
            owner,
            name,
            is_static: false,
            receiver: None,
        } = value
        else {
            return value;
        };

        let mut receiver: Option<Box<StackValue>> = None;
        let mut current: Option<&FieldRemapper<'_>> = Some(self);
        while let Some(remapper) = current {
            if std::ptr::eq(remapper, level) {
                break;
            }
            if let FieldRemapperKind::RegeneratedLambda {
                new_owner,
                is_constructor: false,
                ..
            } = &remapper.kind
            {
                let outer = remapper
                    .parent
                    .and_then(FieldRemapper::new_lambda_name)
                    .unwrap_or(&owner);
                receiver = Some(Box::new(StackValue::Field {
                    ty: AsmType::object(outer),
                    owner: new_owner.clone(),
                    name: CAPTURED_THIS_FIELD.to_string(),
                    is_static: false,
                    receiver,
                }));
            }
            current = remapper.parent;
        }
        StackValue::Field {
            ty,
            owner,
            name,
            is_static: false,
            receiver,
        }
    }

    /// Replaces the placeholders of `list` this level can answer: reads
    /// (`GETSTATIC`) and the stores default lambdas make (`PUTSTATIC`).
    /// Returns the number of placeholders left for an enclosing level.
    pub fn resolve_placeholders(&self, list: &mut InsnList) -> usize {
        let mut unresolved = 0;
        for id in list.ids() {
            let Insn::Field {
                opcode,
                owner,
                name,
                ..
            } = list.get(id)
            else {
                continue;
            };
            if *opcode != GETSTATIC && *opcode != PUTSTATIC {
                continue;
            }
            let Some(field) = unfold_name(name) else {
                continue;
            };
            match self.placeholder_value(owner, field, *opcode == PUTSTATIC) {
                Some(insns) => {
                    for insn in insns {
                        list.insert_before(id, insn);
                    }
                    list.remove(id);
                }
                None => unresolved += 1,
            }
        }
        unresolved
    }

    fn placeholder_value(&self, owner: &str, field: &str, store: bool) -> Option<Vec<Insn>> {
        if field == THIS && !store && self.original_lambda_name() == Some(owner) && self.is_regenerating() {
            return Some(vec![Insn::var(ALOAD, 0)]);
        }
        let Some(info) = self.parameters.find_captured(owner, field) else {
            return self.outer_placeholder_value(owner, field, store);
        };
        let slot = self.parameters.declaration_slot(info);
        let regenerated_owner = match &self.kind {
            FieldRemapperKind::RegeneratedLambda {
                new_owner,
                is_constructor: false,
                ..
            } if !info.is_skipped => Some(new_owner),
            _ => None,
        };
        let Some(new_owner) = regenerated_owner else {
            let opcode = if store { ISTORE } else { ILOAD };
            return Some(vec![Insn::var(info.ty.opcode(opcode), slot)]);
        };

        let field_name = info.new_field_name().unwrap_or(field);
        let desc = info.ty.descriptor();
        if !store {
            return Some(vec![
                Insn::var(ALOAD, 0),
                Insn::field(GETFIELD, new_owner, field_name, desc),
            ]);
        }
        // value is on the stack; slide the receiver under it
        let mut insns = vec![Insn::var(ALOAD, 0)];
        if info.ty.size() == 2 {
            insns.push(Insn::Simple(DUP_X2));
            insns.push(Insn::Simple(POP));
        } else {
            insns.push(Insn::Simple(SWAP));
        }
        insns.push(Insn::field(PUTFIELD, new_owner, field_name, desc));
        Some(insns)
    }
}

impl FieldRemapper<'_> {
    /// A method of a regenerated object reading a capture of the lambda it
    /// was built in. The lambda body lived in the enclosing object's method,
    /// so its value is a field of that object, reached through `this$0`.
    fn outer_placeholder_value(&self, owner: &str, field: &str, store: bool) -> Option<Vec<Insn>> {
        if store
            || !matches!(
                self.kind,
                FieldRemapperKind::RegeneratedLambda {
                    is_constructor: false,
                    ..
                }
            )
        {
            return None;
        }
        let (level, info) = self.parent?.find_field(owner, field)?;
        let value = match (&level.kind, &info.remap_value) {
            (FieldRemapperKind::RegeneratedLambda { .. }, _) => level.captured_value(info)?,
            (_, Some(value @ StackValue::Field { receiver: None, is_static: false, .. })) => value.clone(),
            _ => return None,
        };
        let mut insns = Vec::new();
        self.through_outer_objects(level, value).put(&info.ty, &mut insns);
        Some(insns)
    }
}

/// `[GETFIELD this$0]* GETFIELD x` following the `ALOAD 0` at `start`.
fn field_access_chain(list: &InsnList, start: InsnId) -> Vec<InsnId> {
    let mut chain = Vec::new();
    let mut cursor = list.next(start);
    while let Some(id) = cursor {
        match list.get(id) {
            Insn::Field {
                opcode: GETFIELD,
                name,
                ..
            } => {
                chain.push(id);
                if !crate::insn::markers::is_this0(name) {
                    break;
                }
            }
            _ => break,
        }
        cursor = list.next(id);
    }
    chain
}

/// Folded placeholders still present in `list`.
pub fn has_placeholders(list: &InsnList) -> bool {
    list.iter().any(|(_, insn)| {
        matches!(insn, Insn::Field { opcode: GETSTATIC | PUTSTATIC, name, .. }
            if unfold_name(name).is_some())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CapturedParamDesc, ParametersBuilder};

    fn lambda_params() -> Parameters {
        let mut builder = ParametersBuilder::new();
        builder.add_this(AsmType::java_object(), true);
        builder.add_next_parameter(AsmType::Int, false);
        builder.add_captured_param(CapturedParamDesc::new("A$1", "$x", AsmType::Long), "$x", false);
        builder.build_parameters()
    }

    #[test]
    fn test_lambda_field_read_becomes_slot_load() {
        let params = lambda_params();
        let root_params = ParametersBuilder::new().build_parameters();
        let root = FieldRemapper::root(&root_params);
        let lambda = FieldRemapper::new(
            FieldRemapperKind::InlinedLambda {
                lambda_name: "A$1".into(),
            },
            &params,
            Some(&root),
        );
        let mut list = InsnList::from(vec![
            Insn::var(ALOAD, 0),
            Insn::field(GETFIELD, "A$1", "$x", "J"),
            Insn::Simple(LRETURN),
        ]);
        lambda.fold_field_access_chains(&mut list);
        assert_eq!(
            list.to_vec()[0],
            Insn::field(GETSTATIC, "A$1", fold_name("$x"), "J")
        );
        assert_eq!(lambda.resolve_placeholders(&mut list), 0);
        assert_eq!(list.to_vec(), [Insn::var(LLOAD, 2), Insn::Simple(LRETURN)]);
    }

    #[test]
    fn test_outer_chain_folded_by_parent() {
        let params = lambda_params();
        let root_params = ParametersBuilder::new().build_parameters();
        let root = FieldRemapper::root(&root_params);
        let lambda = FieldRemapper::new(
            FieldRemapperKind::InlinedLambda {
                lambda_name: "A$1".into(),
            },
            &params,
            Some(&root),
        );
        let object_params = ParametersBuilder::new().build_parameters();
        let object = FieldRemapper::new(
            FieldRemapperKind::RegeneratedLambda {
                old_owner: "A$1$1".into(),
                new_owner: "B$inlined$1".into(),
                is_constructor: false,
                recaptured_lambdas: FxHashSet::default(),
            },
            &object_params,
            Some(&lambda),
        );
        let mut list = InsnList::from(vec![
            Insn::var(ALOAD, 0),
            Insn::field(GETFIELD, "A$1$1", "this$0", "LA$1;"),
            Insn::field(GETFIELD, "A$1", "$x", "J"),
        ]);
        object.fold_field_access_chains(&mut list);
        assert_eq!(list.to_vec(), [Insn::field(GETSTATIC, "A$1", fold_name("$x"), "J")]);
        // not the object's field: left for the lambda level
        assert_eq!(object.resolve_placeholders(&mut list), 1);
        assert!(has_placeholders(&list));
    }

    #[test]
    fn test_regenerated_field_read() {
        let mut builder = ParametersBuilder::new();
        builder.add_this(AsmType::object("A$1"), false);
        builder.add_captured_param(
            CapturedParamDesc::new("A$1", "$s", AsmType::object("java/lang/String")),
            "$s",
            false,
        );
        let params = builder.build_parameters();
        let remapper = FieldRemapper::new(
            FieldRemapperKind::RegeneratedLambda {
                old_owner: "A$1".into(),
                new_owner: "B$1".into(),
                is_constructor: false,
                recaptured_lambdas: FxHashSet::default(),
            },
            &params,
            None,
        );
        let mut list = InsnList::from(vec![Insn::field(
            GETSTATIC,
            "A$1",
            fold_name("$s"),
            "Ljava/lang/String;",
        )]);
        assert_eq!(remapper.resolve_placeholders(&mut list), 0);
        assert_eq!(
            list.to_vec(),
            [
                Insn::var(ALOAD, 0),
                Insn::field(GETFIELD, "B$1", "$s", "Ljava/lang/String;")
            ]
        );
        let info = params.find_captured("A$1", "$s").unwrap();
        assert_eq!(
            remapper.captured_value(info),
            Some(StackValue::field(AsmType::object("java/lang/String"), "B$1", "$s"))
        );
    }

    #[test]
    fn test_root_does_not_fold() {
        let params = ParametersBuilder::new().build_parameters();
        let root = FieldRemapper::root(&params);
        let mut list = InsnList::from(vec![
            Insn::var(ALOAD, 0),
            Insn::field(GETFIELD, "A", "$x", "I"),
        ]);
        root.fold_field_access_chains(&mut list);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_store_placeholder_becomes_slot_store() {
        let mut builder = ParametersBuilder::new();
        builder.add_next_parameter(AsmType::Int, false);
        builder.add_captured_param(CapturedParamDesc::new("A$d$1", "$n", AsmType::Long), "$n", false);
        let params = builder.build_parameters();
        let root = FieldRemapper::root(&params);
        let mut list = InsnList::from(vec![
            Insn::var(LLOAD, 4),
            Insn::field(PUTSTATIC, "A$d$1", fold_name("$n"), "J"),
        ]);
        assert_eq!(root.resolve_placeholders(&mut list), 0);
        assert_eq!(list.to_vec(), [Insn::var(LLOAD, 4), Insn::var(LSTORE, 1)]);
    }

    #[test]
    fn test_outer_this_placeholder() {
        let params = ParametersBuilder::new().build_parameters();
        let object = FieldRemapper::new(
            FieldRemapperKind::RegeneratedLambda {
                old_owner: "A$1".into(),
                new_owner: "B$1".into(),
                is_constructor: false,
                recaptured_lambdas: FxHashSet::default(),
            },
            &params,
            None,
        );
        let mut list = InsnList::from(vec![Insn::field(GETSTATIC, "A$1", fold_name(THIS), "LA$1;")]);
        assert_eq!(object.resolve_placeholders(&mut list), 0);
        assert_eq!(list.to_vec(), [Insn::var(ALOAD, 0)]);
    }

    #[test]
    fn test_captured_value_through_nested_object() {
        let mut builder = ParametersBuilder::new();
        builder.add_this(AsmType::object("A$1"), false);
        builder.add_captured_param(CapturedParamDesc::new("L$1", "$x", AsmType::Int), "$x$inlined", false);
        let outer_params = builder.build_parameters();
        let outer = FieldRemapper::new(
            FieldRemapperKind::RegeneratedLambda {
                old_owner: "A$1".into(),
                new_owner: "B$1".into(),
                is_constructor: false,
                recaptured_lambdas: FxHashSet::default(),
            },
            &outer_params,
            None,
        );
        let inner_params = ParametersBuilder::new().build_parameters();
        let inner = FieldRemapper::new(
            FieldRemapperKind::RegeneratedLambda {
                old_owner: "A$1$1".into(),
                new_owner: "B$1$1".into(),
                is_constructor: false,
                recaptured_lambdas: FxHashSet::default(),
            },
            &inner_params,
            Some(&outer),
        );
        let (level, info) = inner.find_field("L$1", "$x").unwrap();
        let value = inner.captured_value_from(level, info).unwrap();
        let mut out = Vec::new();
        value.put(&AsmType::Int, &mut out);
        assert_eq!(
            out,
            [
                Insn::var(ALOAD, 0),
                Insn::field(GETFIELD, "B$1$1", "this$0", "LB$1;"),
                Insn::field(GETFIELD, "B$1", "$x$inlined", "I"),
            ]
        );
    }
}
