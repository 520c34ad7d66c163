//! Dataflow graph of operation nodes.
//!
//! Operations are stored in a tombstoned [`Arena`] and referenced by stable
//! [`OpId`] handles. A [`Value`] is an edge: either a result of an operation
//! or an entry argument of one of its regions. Use lists are derived by
//! scanning live operations, so operand retargeting is trivially consistent:
//! after [`Graph::set_operand`] returns, every subsequent use query observes
//! the new edge.

use std::collections::BTreeMap;

use crate::arena::{Arena, Handle};
use crate::error::IrError;
use crate::types::ValueType;

/// Identifies an operation kind, `"namespace.name"` by convention.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct OpKind(pub &'static str);

impl OpKind {
    /// The namespace prefix (everything before the first `.`).
    pub fn namespace(self) -> &'static str {
        self.0.split('.').next().unwrap_or(self.0)
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// An entry in an operation's open attribute map.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    BoolArray(Vec<bool>),
    Str(String),
}

/// A nested sub-graph owned by an operation.
///
/// Entry arguments are typed; the body is an ordered list of operations.
#[derive(Clone, Debug, Default)]
pub struct Region {
    /// Types of the region's entry arguments.
    pub args: Vec<ValueType>,
    /// Operations in the region body, in definition order.
    pub body: Vec<OpId>,
}

impl Region {
    /// Creates an empty region with the given entry argument types.
    pub fn new(args: Vec<ValueType>) -> Self {
        Self {
            args,
            body: Vec::new(),
        }
    }
}

/// A handle to an [`Operation`] in a [`Graph`].
pub type OpId = Handle<Operation>;

/// An operation node: kind, ordered operand/result edges, nested regions,
/// and an open attribute map.
#[derive(Clone, Debug)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<Value>,
    pub results: Vec<ValueType>,
    pub regions: Vec<Region>,
    pub attrs: BTreeMap<&'static str, Attribute>,
    /// Owning operation and region index, `None` for top-level ops.
    parent: Option<(OpId, u32)>,
}

impl Operation {
    /// Creates a detached operation of the given kind.
    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            operands: Vec::new(),
            results: Vec::new(),
            regions: Vec::new(),
            attrs: BTreeMap::new(),
            parent: None,
        }
    }

    /// Adds an operand edge.
    pub fn with_operand(mut self, value: Value) -> Self {
        self.operands.push(value);
        self
    }

    /// Adds operand edges.
    pub fn with_operands(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.operands.extend(values);
        self
    }

    /// Adds a result edge of the given type.
    pub fn with_result(mut self, ty: ValueType) -> Self {
        self.results.push(ty);
        self
    }

    /// Adds a nested region.
    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    /// Sets an attribute.
    pub fn with_attr(mut self, key: &'static str, value: Attribute) -> Self {
        self.attrs.insert(key, value);
        self
    }

    /// Reads an attribute.
    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        self.attrs.get(key)
    }
}

/// A value edge: the result of exactly one operation, or an entry argument
/// of exactly one region.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Value {
    Result { op: OpId, index: u32 },
    Argument { op: OpId, region: u32, index: u32 },
}

impl Value {
    /// The `index`-th result of `op`.
    pub fn result(op: OpId, index: u32) -> Self {
        Self::Result { op, index }
    }

    /// The `index`-th entry argument of `op`'s `region`-th region.
    pub fn argument(op: OpId, region: u32, index: u32) -> Self {
        Self::Argument { op, region, index }
    }

    /// The defining operation, if this value is an operation result.
    pub fn defining_op(self) -> Option<OpId> {
        match self {
            Self::Result { op, .. } => Some(op),
            Self::Argument { .. } => None,
        }
    }

    /// Returns `true` if this value is a region entry argument.
    pub fn is_argument(self) -> bool {
        matches!(self, Self::Argument { .. })
    }
}

/// One (operation, operand position) pair holding a value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct OpOperand {
    pub op: OpId,
    pub index: u32,
}

/// A graph of operations with a single top-level block.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    ops: Arena<Operation>,
    top: Vec<OpId>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the operation behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if the operation was erased.
    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id]
    }

    /// Mutable access to the operation behind `id`.
    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id]
    }

    /// Returns `true` if `id` refers to a live (non-erased) operation.
    pub fn is_live(&self, id: OpId) -> bool {
        self.ops.is_live(id)
    }

    /// Top-level operations in definition order.
    pub fn top_ops(&self) -> &[OpId] {
        &self.top
    }

    /// The owning operation and region index, `None` for top-level ops.
    pub fn parent_of(&self, id: OpId) -> Option<(OpId, u32)> {
        self.ops[id].parent
    }

    /// Returns `true` if `op` is `ancestor` or nested (transitively) inside it.
    pub fn is_ancestor(&self, ancestor: OpId, op: OpId) -> bool {
        let mut cur = Some(op);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.ops[id].parent.map(|(p, _)| p);
        }
        false
    }

    /// Appends an operation to the top-level block.
    pub fn append_top(&mut self, op: Operation) -> OpId {
        let id = self.attach(op, None);
        self.top.push(id);
        id
    }

    /// Appends an operation to the body of `owner`'s `region`-th region.
    pub fn append_in_region(&mut self, owner: OpId, region: u32, op: Operation) -> OpId {
        let id = self.attach(op, Some((owner, region)));
        self.ops[owner].regions[region as usize].body.push(id);
        id
    }

    /// Prepends an operation to the body of `owner`'s `region`-th region.
    pub fn prepend_in_region(&mut self, owner: OpId, region: u32, op: Operation) -> OpId {
        let id = self.attach(op, Some((owner, region)));
        self.ops[owner].regions[region as usize].body.insert(0, id);
        id
    }

    /// Inserts an operation immediately before `anchor`, in the same block.
    pub fn insert_before(&mut self, anchor: OpId, op: Operation) -> OpId {
        self.insert_relative(anchor, op, 0)
    }

    /// Inserts an operation immediately after `anchor`, in the same block.
    pub fn insert_after(&mut self, anchor: OpId, op: Operation) -> OpId {
        self.insert_relative(anchor, op, 1)
    }

    fn insert_relative(&mut self, anchor: OpId, op: Operation, offset: usize) -> OpId {
        let parent = self.ops[anchor].parent;
        let id = self.attach(op, parent);
        let block = match parent {
            None => &mut self.top,
            Some((owner, region)) => &mut self.ops[owner].regions[region as usize].body,
        };
        let pos = block
            .iter()
            .position(|&o| o == anchor)
            .unwrap_or_else(|| panic!("anchor {anchor:?} not found in its block"));
        block.insert(pos + offset, id);
        id
    }

    fn attach(&mut self, mut op: Operation, parent: Option<(OpId, u32)>) -> OpId {
        op.parent = parent;
        let id = self.ops.append(op);
        // Adopt ops already listed in nested region bodies.
        let regions = self.ops[id].regions.len();
        for r in 0..regions {
            let body = self.ops[id].regions[r].body.clone();
            for child in body {
                self.ops[child].parent = Some((id, r as u32));
            }
        }
        id
    }

    /// The static type of a value.
    pub fn value_type(&self, value: Value) -> &ValueType {
        match value {
            Value::Result { op, index } => &self.ops[op].results[index as usize],
            Value::Argument { op, region, index } => {
                &self.ops[op].regions[region as usize].args[index as usize]
            }
        }
    }

    /// The operation that owns a value: its defining operation for results,
    /// the region-owning operation for entry arguments.
    pub fn owner_of(&self, value: Value) -> OpId {
        match value {
            Value::Result { op, .. } | Value::Argument { op, .. } => op,
        }
    }

    /// All result values of an operation, in order.
    pub fn results_of(&self, id: OpId) -> Vec<Value> {
        (0..self.ops[id].results.len())
            .map(|i| Value::result(id, i as u32))
            .collect()
    }

    /// The value held by an operand slot.
    pub fn operand_value(&self, operand: OpOperand) -> Value {
        self.ops[operand.op].operands[operand.index as usize]
    }

    /// All operand slots currently holding `value`, in deterministic
    /// (handle, position) order.
    pub fn uses_of(&self, value: Value) -> Vec<OpOperand> {
        let mut uses = Vec::new();
        for (id, op) in self.ops.iter() {
            for (i, &v) in op.operands.iter().enumerate() {
                if v == value {
                    uses.push(OpOperand {
                        op: id,
                        index: i as u32,
                    });
                }
            }
        }
        uses
    }

    /// Returns `true` if any live operation uses `value`.
    pub fn has_uses(&self, value: Value) -> bool {
        self.ops
            .iter()
            .any(|(_, op)| op.operands.contains(&value))
    }

    /// Retargets one operand slot. This is the single redirect primitive:
    /// use lists are derived, so the retarget is atomic with respect to
    /// every later query.
    ///
    /// The new value must keep the operand's type category (tensor stays
    /// tensor, buffer stays buffer).
    pub fn set_operand(&mut self, operand: OpOperand, value: Value) {
        debug_assert_eq!(
            std::mem::discriminant(self.value_type(self.operand_value(operand))),
            std::mem::discriminant(self.value_type(value)),
            "set_operand must preserve the operand's type category"
        );
        self.ops[operand.op].operands[operand.index as usize] = value;
    }

    /// Redirects every use of `old` to `new`.
    pub fn replace_all_uses(&mut self, old: Value, new: Value) {
        for operand in self.uses_of(old) {
            self.set_operand(operand, new);
        }
    }

    /// Erases an operation (and, recursively, its nested regions) from the
    /// graph.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if any result or region argument still has
    /// uses outside the erased subtree.
    pub fn erase_op(&mut self, id: OpId) {
        // Detach from the containing block first.
        match self.ops[id].parent {
            None => self.top.retain(|&o| o != id),
            Some((owner, region)) => {
                if self.ops.is_live(owner) {
                    self.ops[owner].regions[region as usize]
                        .body
                        .retain(|&o| o != id);
                }
            }
        }
        self.erase_subtree(id);
    }

    fn erase_subtree(&mut self, id: OpId) {
        let nested: Vec<OpId> = self.ops[id]
            .regions
            .iter()
            .flat_map(|r| r.body.iter().copied())
            .collect();
        for child in nested {
            self.erase_subtree(child);
        }
        self.ops.retire(id);
        #[cfg(debug_assertions)]
        {
            for (_, op) in self.ops.iter() {
                for &v in &op.operands {
                    debug_assert!(
                        self.owner_of(v) != id,
                        "erased operation {id:?} still has uses"
                    );
                }
            }
        }
    }

    /// Replaces an operation: redirects all uses of its results to the
    /// given replacement values, then erases it.
    ///
    /// # Panics
    ///
    /// Panics if the number of replacements does not match the number of
    /// results.
    pub fn replace_op(&mut self, id: OpId, replacements: &[Value]) {
        assert_eq!(
            replacements.len(),
            self.ops[id].results.len(),
            "expected one replacement value per result"
        );
        for (i, &new) in replacements.iter().enumerate() {
            self.replace_all_uses(Value::result(id, i as u32), new);
        }
        self.erase_op(id);
    }

    /// All live operations in definition (pre-)order: each operation before
    /// the contents of its regions.
    pub fn walk(&self) -> Vec<OpId> {
        let mut out = Vec::new();
        for &id in &self.top {
            self.walk_into(id, &mut out);
        }
        out
    }

    fn walk_into(&self, id: OpId, out: &mut Vec<OpId>) {
        out.push(id);
        for region in &self.ops[id].regions {
            for &child in &region.body {
                self.walk_into(child, out);
            }
        }
    }

    /// Checks structural invariants: every operand references a live value
    /// with a valid index, and every live operation is attached to exactly
    /// one block whose parent link matches.
    pub fn verify(&self) -> Result<(), IrError> {
        for (id, op) in self.ops.iter() {
            for &value in &op.operands {
                let owner = self.owner_of(value);
                if !self.ops.is_live(owner) {
                    return Err(IrError::DeadOperand {
                        op: op.kind.0.to_string(),
                    });
                }
                let valid = match value {
                    Value::Result { op: o, index } => {
                        (index as usize) < self.ops[o].results.len()
                    }
                    Value::Argument { op: o, region, index } => {
                        let regions = &self.ops[o].regions;
                        (region as usize) < regions.len()
                            && (index as usize) < regions[region as usize].args.len()
                    }
                };
                if !valid {
                    return Err(IrError::BadValueIndex {
                        op: op.kind.0.to_string(),
                    });
                }
            }
            let attached = match op.parent {
                None => self.top.contains(&id),
                Some((owner, region)) => {
                    self.ops.is_live(owner)
                        && self.ops[owner]
                            .regions
                            .get(region as usize)
                            .is_some_and(|r| r.body.contains(&id))
                }
            };
            if !attached {
                return Err(IrError::DetachedOp {
                    op: op.kind.0.to_string(),
                });
            }
        }
        Ok(())
    }
}
