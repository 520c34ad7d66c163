//! The conflict resolver: inserting allocations and copies so every
//! operand can be rewritten in place afterwards, plus the tensor/buffer
//! rewrite helpers built on it.

use std::collections::HashSet;

use tapir_ir::{
    Attribute, Graph, OpId, OpOperand, Operation, TensorType, Value, ValueType,
};

use crate::buffer_type::buffer_type;
use crate::error::BufferizeError;
use crate::ops;
use crate::options::BufferizationOptions;
use crate::state::AnalysisState;

/// Where newly created operations go, relative to an anchor.
#[derive(Clone, Copy, Debug)]
pub enum InsertPos {
    Before(OpId),
    After(OpId),
}

impl InsertPos {
    fn insert(self, graph: &mut Graph, op: Operation) -> OpId {
        match self {
            Self::Before(anchor) => graph.insert_before(anchor, op),
            Self::After(anchor) => graph.insert_after(anchor, op),
        }
    }
}

/// Creates an allocation sized like `value` at `position`, seeded with a
/// copy of it when `copy` is set, and returns the allocated tensor.
///
/// Sizing asks the defining operation to reify its dynamic extents first;
/// only if that is unavailable are per-dimension probes synthesized.
/// Unseeded allocations additionally record the storage space the copied
/// value would have taken.
pub fn allocate_tensor_for_value(
    graph: &mut Graph,
    value: Value,
    escape: bool,
    copy: bool,
    options: &BufferizationOptions,
    position: InsertPos,
) -> Result<Value, BufferizeError> {
    let mut cursor = position;
    let (source, scalar, shape) = match graph.value_type(value).clone() {
        ValueType::Tensor(t) => {
            let Some(shape) = t.shape else {
                return Err(BufferizeError::UnsupportedRank {
                    op: graph.op(graph.owner_of(value)).kind.0.to_string(),
                });
            };
            (value, t.scalar, shape)
        }
        ValueType::Buffer(b) => {
            let Some(shape) = b.shape.clone() else {
                return Err(BufferizeError::UnsupportedRank {
                    op: graph.op(graph.owner_of(value)).kind.0.to_string(),
                });
            };
            let view = cursor.insert(graph, ops::to_tensor(&b, value));
            cursor = InsertPos::After(view);
            (Value::result(view, 0), b.scalar, shape)
        }
        ValueType::Index => panic!("cannot allocate a tensor for index value {value}"),
    };
    let tensor_ty = TensorType::ranked(scalar, shape.clone());

    let mut dynamic_sizes = Vec::new();
    if !copy {
        let dyn_dims = shape.dynamic_dims();
        if !dyn_dims.is_empty() {
            let mut reified = None;
            if let Some(def) = source.defining_op() {
                let kind = graph.op(def).kind;
                if let Some(imp) = options.registry.get(kind) {
                    reified = imp.reify_result_shape(graph, source);
                }
            }
            match reified {
                Some(sizes) => {
                    if sizes.len() != dyn_dims.len() {
                        return Err(BufferizeError::ShapeReification {
                            op: graph.op(graph.owner_of(source)).kind.0.to_string(),
                            expected: dyn_dims.len(),
                            got: sizes.len(),
                        });
                    }
                    dynamic_sizes = sizes;
                }
                None => {
                    for d in dyn_dims {
                        let probe = cursor.insert(graph, ops::dim(source, d));
                        cursor = InsertPos::After(probe);
                        dynamic_sizes.push(Value::result(probe, 0));
                    }
                }
            }
        }
    }

    let mut alloc_op = ops::alloc_tensor(tensor_ty, dynamic_sizes, copy.then_some(source))
        .with_attr(ops::ESCAPE_ATTR, Attribute::BoolArray(vec![escape]));
    if !copy {
        let ty = buffer_type(graph, source, options)?;
        alloc_op = alloc_op.with_attr(ops::MEMORY_SPACE_ATTR, Attribute::Int(ty.space.0 as i64));
    }
    let alloc = cursor.insert(graph, alloc_op);
    log::debug!(
        "allocated tensor for {value} (copy: {copy}, escape: {escape})"
    );
    Ok(Value::result(alloc, 0))
}

/// Resolves all out-of-place operands of `op` by inserting allocations
/// and copies, so a later rewrite can treat every remaining operand as
/// in place. Returns `true` if anything was inserted.
///
/// Out-of-place operands are normally copied before the operation. When
/// the operation's result does not hold written data and the operand
/// has exactly one alias (itself aliased by no other operand), the copy
/// is taken of the result instead, after the operation, and the
/// result's other users are redirected to the copy.
///
/// Each inserted allocation carries an escape bit: once all uses are
/// retargeted, its result is an allocation-site value, so the yield
/// analysis is precise for it.
pub fn resolve_op_operand_conflicts(
    graph: &mut Graph,
    op: OpId,
    state: &AnalysisState,
) -> Result<bool, BufferizeError> {
    let options = state.options();
    let mut out_of_place_operands = Vec::new();
    let mut copied_operands = HashSet::new();
    let mut out_of_place_results = Vec::new();
    let mut copied_results = HashSet::new();

    for i in 0..graph.op(op).operands.len() {
        let operand = OpOperand {
            op,
            index: i as u32,
        };
        let value = graph.operand_value(operand);
        if !graph.value_type(value).is_tensor() {
            continue;
        }
        if state.is_in_place(graph, operand) {
            continue;
        }
        if graph.value_type(value).is_unranked() {
            return Err(BufferizeError::UnsupportedRank {
                op: graph.op(op).kind.0.to_string(),
            });
        }

        let aliasing = state.aliasing_results(graph, operand);
        let one_to_one = aliasing.len() == 1
            && !state.value_writes_memory(graph, aliasing[0].result)
            && state.aliasing_operands(graph, aliasing[0].result).len() == 1
            && !graph.value_type(aliasing[0].result).is_unranked();
        if one_to_one {
            // The result holds no written data of its own; it is only an
            // alias. Copying the (possibly narrower) result keeps the
            // aliasing operation reading the original data.
            let result = aliasing[0].result;
            out_of_place_results.push(result);
            if !state.can_omit_copy(graph, operand) {
                copied_results.insert(result);
            }
        } else {
            out_of_place_operands.push(operand);
            if !state.can_omit_copy(graph, operand) {
                copied_operands.insert(operand);
            }
        }
    }

    let changed = !out_of_place_operands.is_empty() || !out_of_place_results.is_empty();

    // Operand copies go before the operation.
    for operand in out_of_place_operands {
        let value = graph.operand_value(operand);
        log::debug!(
            "out-of-place operand {} of {}",
            operand.index,
            graph.op(op).kind
        );
        let replacement = allocate_tensor_for_value(
            graph,
            value,
            false,
            copied_operands.contains(&operand),
            options,
            InsertPos::Before(op),
        )?;
        graph.set_operand(operand, replacement);
        tag_escape(graph, replacement, state);
    }

    // Result copies go after the operation; users other than the copy
    // itself (and any extent probes it made) move to the copy.
    for result in out_of_place_results {
        log::debug!("out-of-place result {result} of {}", graph.op(op).kind);
        let replacement = allocate_tensor_for_value(
            graph,
            result,
            false,
            copied_results.contains(&result),
            options,
            InsertPos::After(op),
        )?;
        let Value::Result { op: copy_def, .. } = replacement else {
            unreachable!("allocation is an operation result");
        };
        for use_ in graph.uses_of(result) {
            if use_.op == copy_def || graph.op(use_.op).kind == ops::TENSOR_DIM {
                continue;
            }
            graph.set_operand(use_, replacement);
        }
        tag_escape(graph, replacement, state);
    }

    Ok(changed)
}

/// Records the escape decision for a just-inserted allocation. Called
/// after use retargeting, so the yield analysis sees the final uses.
fn tag_escape(graph: &mut Graph, allocated: Value, state: &AnalysisState) {
    let escape =
        !state.options().create_deallocs || state.is_yielded(graph, allocated);
    let Value::Result { op: alloc, .. } = allocated else {
        unreachable!("allocation is an operation result");
    };
    graph
        .op_mut(alloc)
        .attrs
        .insert(ops::ESCAPE_ATTR, Attribute::BoolArray(vec![escape]));
}

/// Resolves the operand conflicts of one operation under a fresh
/// analysis state. Returns `true` if anything was inserted.
pub fn bufferize_op(
    graph: &mut Graph,
    op: OpId,
    options: &BufferizationOptions,
) -> Result<bool, BufferizeError> {
    let state = AnalysisState::new(options);
    resolve_op_operand_conflicts(graph, op, &state)
}

/// The buffer holding `value`. Folds through tensor views of existing
/// buffers; otherwise inserts a reinterpret right after the value's
/// definition.
pub fn get_buffer(
    graph: &mut Graph,
    value: Value,
    options: &BufferizationOptions,
) -> Result<Value, BufferizeError> {
    debug_assert!(graph.value_type(value).is_tensor());
    if let Some(def) = value.defining_op() {
        if graph.op(def).kind == ops::TO_TENSOR {
            return Ok(graph.op(def).operands[0]);
        }
    }
    let ty = buffer_type(graph, value, options)?;
    let tensor_rank = graph
        .value_type(value)
        .as_tensor()
        .and_then(TensorType::rank);
    if let (Some(tr), Some(br)) = (tensor_rank, ty.rank()) {
        if tr != br {
            return Err(BufferizeError::InvalidRewriteRank {
                tensor_rank: tr,
                buffer_rank: br,
            });
        }
    }
    let reinterpret = ops::to_buffer(ty, value);
    let id = match value {
        Value::Result { op: def, .. } => graph.insert_after(def, reinterpret),
        Value::Argument { op: owner, region, .. } => {
            graph.prepend_in_region(owner, region, reinterpret)
        }
    };
    Ok(Value::result(id, 0))
}

/// Replaces `op` with the given values, one per result. Buffer values
/// standing in for tensor results are wrapped in a tensor view so the
/// remaining users keep their types.
pub fn replace_op_with_bufferized_values(graph: &mut Graph, op: OpId, values: &[Value]) {
    assert_eq!(
        values.len(),
        graph.op(op).results.len(),
        "expected one replacement value per result"
    );
    let mut replacements = Vec::with_capacity(values.len());
    for (i, &new) in values.iter().enumerate() {
        let old = Value::result(op, i as u32);
        let old_is_tensor = graph.value_type(old).is_tensor();
        let replacement = match (old_is_tensor, graph.value_type(new).clone()) {
            (true, ValueType::Buffer(b)) => {
                let adapter = ops::to_tensor(&b, new);
                Value::result(graph.insert_before(op, adapter), 0)
            }
            _ => new,
        };
        replacements.push(replacement);
    }
    graph.replace_op(op, &replacements);
}
