//! Mutable instruction lists.
//!
//! Instructions live in an [`id_arena::Arena`] and are linked into a doubly
//! linked sequence, so insertion and removal at a cursor never move other
//! nodes and an [`InsnId`] stays valid for as long as the node is linked.
//! Labels are plain identities ([`LabelId`]); jumps, line numbers and regions
//! refer to labels, never to nodes.

use crate::insn::opcodes::*;
use crate::insn::types::AsmType;
use id_arena::{Arena, Id};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

static NEXT_LABEL: AtomicU32 = AtomicU32::new(1);

/// Identity of a jump target or region boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(u32);

impl LabelId {
    /// A label that no other list has seen.
    pub fn fresh() -> Self {
        LabelId(NEXT_LABEL.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Operand of `LDC`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Type(AsmType),
}

impl Constant {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn ty(&self) -> AsmType {
        match self {
            Constant::Int(_) => AsmType::Int,
            Constant::Long(_) => AsmType::Long,
            Constant::Float(_) => AsmType::Float,
            Constant::Double(_) => AsmType::Double,
            Constant::String(_) => AsmType::object("java/lang/String"),
            Constant::Type(_) => AsmType::object("java/lang/Class"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Insn {
    Label(LabelId),
    LineNumber {
        line: i32,
        start: LabelId,
    },
    /// Zero-operand instruction.
    Simple(u8),
    /// `BIPUSH`, `SIPUSH`, `NEWARRAY`.
    Int {
        opcode: u8,
        operand: i32,
    },
    Var {
        opcode: u8,
        var: usize,
    },
    Iinc {
        var: usize,
        incr: i32,
    },
    /// `NEW`, `ANEWARRAY`, `CHECKCAST`, `INSTANCEOF`; operand is an internal name.
    Type {
        opcode: u8,
        desc: String,
    },
    Field {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
    },
    Method {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
        itf: bool,
    },
    Jump {
        opcode: u8,
        label: LabelId,
    },
    Ldc(Constant),
    TableSwitch {
        min: i32,
        max: i32,
        default: LabelId,
        labels: Vec<LabelId>,
    },
    LookupSwitch {
        default: LabelId,
        keys: Vec<i32>,
        labels: Vec<LabelId>,
    },
}

impl Insn {
    pub fn var(opcode: u8, var: usize) -> Self {
        Insn::Var { opcode, var }
    }

    pub fn jump(opcode: u8, label: LabelId) -> Self {
        Insn::Jump { opcode, label }
    }

    pub fn type_insn(opcode: u8, desc: impl Into<String>) -> Self {
        Insn::Type {
            opcode,
            desc: desc.into(),
        }
    }

    pub fn field(
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Insn::Field {
            opcode,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    pub fn method(
        opcode: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Insn::Method {
            opcode,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
            itf: opcode == INVOKEINTERFACE,
        }
    }

    pub fn ldc_string(value: impl Into<String>) -> Self {
        Insn::Ldc(Constant::String(value.into()))
    }

    /// Shortest instruction pushing an int constant.
    pub fn int_const(value: i32) -> Self {
        if let Some(opcode) = int_const_opcode(value) {
            Insn::Simple(opcode)
        } else if (i8::MIN as i32..=i8::MAX as i32).contains(&value) {
            Insn::Int {
                opcode: BIPUSH,
                operand: value,
            }
        } else if (i16::MIN as i32..=i16::MAX as i32).contains(&value) {
            Insn::Int {
                opcode: SIPUSH,
                operand: value,
            }
        } else {
            Insn::Ldc(Constant::Int(value))
        }
    }

    /// Value pushed by an int-constant instruction, if this is one.
    pub fn int_value(&self) -> Option<i32> {
        match self {
            Insn::Simple(op) => int_const_value(*op),
            Insn::Int { opcode, operand } if *opcode == BIPUSH || *opcode == SIPUSH => {
                Some(*operand)
            }
            Insn::Ldc(Constant::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Opcode of a real instruction; `None` for labels and line numbers.
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Insn::Label(_) | Insn::LineNumber { .. } => None,
            Insn::Simple(op) => Some(*op),
            Insn::Int { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Type { opcode, .. }
            | Insn::Field { opcode, .. }
            | Insn::Method { opcode, .. }
            | Insn::Jump { opcode, .. } => Some(*opcode),
            Insn::Iinc { .. } => Some(IINC),
            Insn::Ldc(_) => Some(LDC),
            Insn::TableSwitch { .. } => Some(TABLESWITCH),
            Insn::LookupSwitch { .. } => Some(LOOKUPSWITCH),
        }
    }

    /// Labels, line numbers and `NOP` have no runtime effect.
    pub fn is_meaningful(&self) -> bool {
        !matches!(
            self,
            Insn::Label(_) | Insn::LineNumber { .. } | Insn::Simple(NOP)
        )
    }

    pub fn as_label(&self) -> Option<LabelId> {
        match self {
            Insn::Label(label) => Some(*label),
            _ => None,
        }
    }

    pub fn is_method_call(&self, owner: &str, name: &str) -> bool {
        matches!(self, Insn::Method { owner: o, name: n, .. } if o == owner && n == name)
    }

    pub fn is_return(&self) -> bool {
        matches!(self.opcode(), Some(op) if is_return(op))
    }

    /// Instructions after which control never falls through.
    pub fn is_terminal(&self) -> bool {
        match self.opcode() {
            Some(op) => {
                is_return(op)
                    || op == ATHROW
                    || op == GOTO
                    || op == TABLESWITCH
                    || op == LOOKUPSWITCH
            }
            None => false,
        }
    }

    /// Every label this instruction refers to, excluding its own identity.
    pub fn jump_targets(&self) -> Vec<LabelId> {
        match self {
            Insn::Jump { label, .. } => vec![*label],
            Insn::TableSwitch {
                default, labels, ..
            }
            | Insn::LookupSwitch {
                default, labels, ..
            } => {
                let mut all = vec![*default];
                all.extend(labels.iter().copied());
                all
            }
            _ => Vec::new(),
        }
    }

    /// Rewrites every label this instruction holds, its own identity included.
    pub fn map_labels(&mut self, mut f: impl FnMut(LabelId) -> LabelId) {
        match self {
            Insn::Label(label) => *label = f(*label),
            Insn::LineNumber { start, .. } => *start = f(*start),
            Insn::Jump { label, .. } => *label = f(*label),
            Insn::TableSwitch {
                default, labels, ..
            }
            | Insn::LookupSwitch {
                default, labels, ..
            } => {
                *default = f(*default);
                for label in labels.iter_mut() {
                    *label = f(*label);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Label(label) => write!(f, "{label}:"),
            Insn::LineNumber { line, start } => write!(f, "LINENUMBER {line} {start}"),
            Insn::Simple(op) => write!(f, "OP {op}"),
            Insn::Int { opcode, operand } => write!(f, "OP {opcode} {operand}"),
            Insn::Var { opcode, var } => write!(f, "VAR {opcode} {var}"),
            Insn::Iinc { var, incr } => write!(f, "IINC {var} {incr}"),
            Insn::Type { opcode, desc } => write!(f, "TYPE {opcode} {desc}"),
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } => write!(f, "FIELD {opcode} {owner}.{name} : {desc}"),
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                ..
            } => write!(f, "INVOKE {opcode} {owner}.{name}{desc}"),
            Insn::Jump { opcode, label } => write!(f, "JUMP {opcode} {label}"),
            Insn::Ldc(constant) => write!(f, "LDC {constant:?}"),
            Insn::TableSwitch { min, max, .. } => write!(f, "TABLESWITCH {min}..{max}"),
            Insn::LookupSwitch { keys, .. } => write!(f, "LOOKUPSWITCH {keys:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    insn: Insn,
    prev: Option<InsnId>,
    next: Option<InsnId>,
    linked: bool,
}

pub type InsnId = Id<Node>;

/// A doubly linked instruction sequence backed by an arena.
#[derive(Debug, Clone, Default)]
pub struct InsnList {
    nodes: Arena<Node>,
    first: Option<InsnId>,
    last: Option<InsnId>,
    len: usize,
    indices: OnceLock<FxHashMap<InsnId, usize>>,
}

impl InsnList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<InsnId> {
        self.first
    }

    pub fn last(&self) -> Option<InsnId> {
        self.last
    }

    pub fn next(&self, id: InsnId) -> Option<InsnId> {
        self.nodes[id].next
    }

    pub fn prev(&self, id: InsnId) -> Option<InsnId> {
        self.nodes[id].prev
    }

    pub fn get(&self, id: InsnId) -> &Insn {
        &self.nodes[id].insn
    }

    pub fn get_mut(&mut self, id: InsnId) -> &mut Insn {
        &mut self.nodes[id].insn
    }

    pub fn contains(&self, id: InsnId) -> bool {
        self.nodes.get(id).is_some_and(|node| node.linked)
    }

    /// Replaces the instruction at `id` in place, returning the old one.
    pub fn set(&mut self, id: InsnId, insn: Insn) -> Insn {
        std::mem::replace(&mut self.nodes[id].insn, insn)
    }

    pub fn push(&mut self, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        self.link_after(self.last, id);
        id
    }

    pub fn push_front(&mut self, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        self.link_after(None, id);
        id
    }

    pub fn insert_before(&mut self, anchor: InsnId, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        let prev = self.nodes[anchor].prev;
        self.link_after(prev, id);
        id
    }

    pub fn insert_after(&mut self, anchor: InsnId, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        self.link_after(Some(anchor), id);
        id
    }

    /// Moves every instruction of `list` in front of `anchor`.
    pub fn insert_list_before(&mut self, anchor: InsnId, list: InsnList) {
        let mut prev = self.nodes[anchor].prev;
        for insn in list.into_vec() {
            let id = self.alloc(insn);
            self.link_after(prev, id);
            prev = Some(id);
        }
    }

    /// Moves every instruction of `list` behind `anchor` (or to the front
    /// when `anchor` is `None`).
    pub fn insert_list_after(&mut self, anchor: Option<InsnId>, list: InsnList) {
        let mut prev = anchor;
        for insn in list.into_vec() {
            let id = self.alloc(insn);
            self.link_after(prev, id);
            prev = Some(id);
        }
    }

    pub fn append(&mut self, list: InsnList) {
        self.insert_list_after(self.last, list);
    }

    /// Unlinks `id`; the node itself stays in the arena.
    pub fn remove(&mut self, id: InsnId) -> Insn {
        let (prev, next) = {
            let node = &self.nodes[id];
            debug_assert!(node.linked, "removing an unlinked instruction");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.last = prev,
        }
        self.len -= 1;
        self.invalidate();
        let node = &mut self.nodes[id];
        node.prev = None;
        node.next = None;
        node.linked = false;
        node.insn.clone()
    }

    pub fn clear(&mut self) {
        *self = InsnList::new();
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.first,
            remaining: self.len,
        }
    }

    /// Snapshot of the linked ids, safe to hold across mutation.
    pub fn ids(&self) -> Vec<InsnId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn to_vec(&self) -> Vec<Insn> {
        self.iter().map(|(_, insn)| insn.clone()).collect()
    }

    pub fn into_vec(self) -> Vec<Insn> {
        self.to_vec()
    }

    /// Position of `id` in the sequence. Positions are cached until the next
    /// structural mutation.
    pub fn index_of(&self, id: InsnId) -> usize {
        let indices = self.indices.get_or_init(|| {
            self.iter()
                .enumerate()
                .map(|(index, (id, _))| (id, index))
                .collect()
        });
        indices.get(&id).copied().unwrap_or(usize::MAX)
    }

    /// Node defining `label`, if it is part of this list.
    pub fn find_label(&self, label: LabelId) -> Option<InsnId> {
        self.iter()
            .find(|(_, insn)| insn.as_label() == Some(label))
            .map(|(id, _)| id)
    }

    /// Positions of every label defined in this list.
    pub fn label_positions(&self) -> FxHashMap<LabelId, usize> {
        self.iter()
            .enumerate()
            .filter_map(|(index, (_, insn))| insn.as_label().map(|label| (label, index)))
            .collect()
    }

    /// Redirects every reference to `from` (jumps, switches, line numbers)
    /// to `to`. The definition of `from` is left in place.
    pub fn chain_label(&mut self, from: LabelId, to: LabelId) {
        let ids = self.ids();
        for id in ids {
            let insn = &mut self.nodes[id].insn;
            if matches!(insn, Insn::Label(_)) {
                continue;
            }
            insn.map_labels(|label| if label == from { to } else { label });
        }
    }

    fn alloc(&mut self, insn: Insn) -> InsnId {
        self.nodes.alloc(Node {
            insn,
            prev: None,
            next: None,
            linked: false,
        })
    }

    fn link_after(&mut self, prev: Option<InsnId>, id: InsnId) {
        let next = match prev {
            Some(p) => self.nodes[p].next,
            None => self.first,
        };
        {
            let node = &mut self.nodes[id];
            node.prev = prev;
            node.next = next;
            node.linked = true;
        }
        match prev {
            Some(p) => self.nodes[p].next = Some(id),
            None => self.first = Some(id),
        }
        match next {
            Some(n) => self.nodes[n].prev = Some(id),
            None => self.last = Some(id),
        }
        self.len += 1;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.indices = OnceLock::new();
    }
}

impl From<Vec<Insn>> for InsnList {
    fn from(insns: Vec<Insn>) -> Self {
        let mut list = InsnList::new();
        for insn in insns {
            list.push(insn);
        }
        list
    }
}

impl FromIterator<Insn> for InsnList {
    fn from_iter<I: IntoIterator<Item = Insn>>(iter: I) -> Self {
        let mut list = InsnList::new();
        for insn in iter {
            list.push(insn);
        }
        list
    }
}

impl PartialEq for InsnList {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self
                .iter()
                .zip(other.iter())
                .all(|((_, a), (_, b))| a == b)
    }
}

impl Serialize for InsnList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(|(_, insn)| insn))
    }
}

impl<'de> Deserialize<'de> for InsnList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Insn>::deserialize(deserializer).map(InsnList::from)
    }
}

pub struct Iter<'a> {
    list: &'a InsnList,
    cursor: Option<InsnId>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InsnId, &'a Insn);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = &self.list.nodes[id];
        self.cursor = node.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((id, &node.insn))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}
