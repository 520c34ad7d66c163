//! Buffer type inference: the concrete buffer type a tensor value will
//! take, before any rewrite happens.

use std::collections::HashMap;

use tapir_ir::{BufferType, Graph, Layout, Value};

use crate::error::BufferizeError;
use crate::interface::BufferRelation;
use crate::options::{BufferizationOptions, FunctionArgLayout};
use crate::state::AnalysisState;

/// Types already decided for values currently being inferred. Passing a
/// value's own prospective type here breaks inference cycles through
/// region arguments.
pub type BufferTypeMap = HashMap<Value, BufferType>;

/// Infers the buffer type `value` will take under `options`.
pub fn buffer_type(
    graph: &Graph,
    value: Value,
    options: &BufferizationOptions,
) -> Result<BufferType, BufferizeError> {
    buffer_type_with_pinned(graph, value, options, &BufferTypeMap::new())
}

/// [`buffer_type`] with a set of already-decided types.
pub fn buffer_type_with_pinned(
    graph: &Graph,
    value: Value,
    options: &BufferizationOptions,
    pinned: &BufferTypeMap,
) -> Result<BufferType, BufferizeError> {
    debug_assert!(graph.value_type(value).is_tensor());
    if let Some(ty) = pinned.get(&value) {
        return Ok(ty.clone());
    }
    let owner = graph.owner_of(value);
    if let Some(imp) = options.bufferizable_op(graph.op(owner)) {
        return imp.buffer_type(graph, value, options, pinned);
    }
    unknown_buffer_type(graph, value, options, pinned)
}

/// Fallback for values no capability implementation can type: a fully
/// dynamic layout in the default storage space. Function-boundary entry
/// arguments honor the configured argument layout instead.
pub(crate) fn unknown_buffer_type(
    graph: &Graph,
    value: Value,
    options: &BufferizationOptions,
    pinned: &BufferTypeMap,
) -> Result<BufferType, BufferizeError> {
    let tensor = graph
        .value_type(value)
        .as_tensor()
        .cloned()
        .unwrap_or_else(|| panic!("buffer type queried for non-tensor value {value}"));
    let owner = graph.owner_of(value);
    let space = options
        .default_memory_space
        .ok_or_else(|| BufferizeError::UnknownMemorySpace {
            op: graph.op(owner).kind.0.to_string(),
        })?;
    let is_function_arg =
        value.is_argument() && graph.op(owner).kind.namespace() == "func";
    let layout = if is_function_arg {
        match options.function_arg_layout {
            FunctionArgLayout::StaticIdentity => Layout::Identity,
            FunctionArgLayout::FullyDynamic => Layout::FullyDynamic,
            FunctionArgLayout::Inferred => {
                if let Some(ty) = equivalent_operand_type(graph, value, options, pinned)? {
                    return Ok(ty);
                }
                Layout::FullyDynamic
            }
        }
    } else {
        Layout::FullyDynamic
    };
    Ok(BufferType::of_tensor(&tensor, layout, space))
}

/// The buffer type of the single `Equivalent` aliasing operand of `value`,
/// if it has one. Equivalent values share their exact buffer type.
fn equivalent_operand_type(
    graph: &Graph,
    value: Value,
    options: &BufferizationOptions,
    pinned: &BufferTypeMap,
) -> Result<Option<BufferType>, BufferizeError> {
    let state = AnalysisState::new(options);
    let aliases = state.aliasing_operands(graph, value);
    if let [alias] = aliases.as_slice() {
        if alias.relation == BufferRelation::Equivalent {
            let source = graph.operand_value(alias.operand);
            return buffer_type_with_pinned(graph, source, options, pinned).map(Some);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures::{self, VIEW, WRITE};
    use crate::interface::{AliasingOperand, AliasingResult, BufferizableOp};
    use crate::ops;
    use tapir_ir::{
        MemorySpace, OpKind, OpOperand, Operation, Region, Scalar, Shape, TensorType, ValueType,
    };

    #[test]
    fn allocation_results_get_identity_layout() {
        let mut g = Graph::new();
        let alloc = g.append_top(fixtures::alloc_4());
        let options = fixtures::options();
        let ty = buffer_type(&g, tapir_ir::Value::result(alloc, 0), &options).unwrap();
        assert_eq!(ty.layout, Layout::Identity);
        assert_eq!(ty.space, MemorySpace::DEFAULT);
        assert_eq!(ty.rank(), Some(1));
    }

    #[test]
    fn equivalent_results_forward_the_operand_type() {
        let mut g = Graph::new();
        let alloc = g.append_top(fixtures::alloc_4());
        let write = g.append_top(
            Operation::new(WRITE)
                .with_operand(tapir_ir::Value::result(alloc, 0))
                .with_result(fixtures::tensor_4()),
        );
        let options = fixtures::options();
        // The write aliases its operand Equivalent, so it inherits the
        // allocation's identity layout.
        let ty = buffer_type(&g, tapir_ir::Value::result(write, 0), &options).unwrap();
        assert_eq!(ty.layout, Layout::Identity);
    }

    #[test]
    fn non_equivalent_results_fall_back_to_dynamic_layout() {
        let mut g = Graph::new();
        let alloc = g.append_top(fixtures::alloc_4());
        let view = g.append_top(
            Operation::new(VIEW)
                .with_operand(tapir_ir::Value::result(alloc, 0))
                .with_result(fixtures::tensor_4()),
        );
        let options = fixtures::options();
        let ty = buffer_type(&g, tapir_ir::Value::result(view, 0), &options).unwrap();
        assert_eq!(ty.layout, Layout::FullyDynamic);
    }

    #[test]
    fn pinned_types_short_circuit() {
        let mut g = Graph::new();
        let alloc = g.append_top(fixtures::alloc_4());
        let value = tapir_ir::Value::result(alloc, 0);
        let options = fixtures::options();

        let mut pinned = BufferTypeMap::new();
        let forced = BufferType::of_tensor(
            &TensorType::ranked(Scalar::F32, Shape::fixed(&[4])),
            Layout::FullyDynamic,
            MemorySpace(3),
        );
        pinned.insert(value, forced.clone());
        let ty = buffer_type_with_pinned(&g, value, &options, &pinned).unwrap();
        assert_eq!(ty, forced);
    }

    #[test]
    fn function_arguments_honor_the_layout_strategy() {
        let mut g = Graph::new();
        let func = g.append_top(
            Operation::new(OpKind("func.func")).with_region(Region::new(vec![ValueType::Tensor(
                TensorType::ranked(Scalar::F32, Shape::all_dynamic(2)),
            )])),
        );
        let arg = tapir_ir::Value::argument(func, 0, 0);

        let mut options = fixtures::options();
        let ty = buffer_type(&g, arg, &options).unwrap();
        assert_eq!(ty.layout, Layout::FullyDynamic);

        options.function_arg_layout = FunctionArgLayout::StaticIdentity;
        let ty = buffer_type(&g, arg, &options).unwrap();
        assert_eq!(ty.layout, Layout::Identity);
    }

    #[test]
    fn inferred_layout_follows_equivalent_operands() {
        const BODY: OpKind = OpKind("func.body");

        // A boundary op whose region argument is equivalent to its first
        // operand, like an outlined function over a known buffer.
        #[derive(Debug)]
        struct Body;

        impl BufferizableOp for Body {
            fn aliasing_results(
                &self,
                _graph: &Graph,
                _operand: OpOperand,
                _state: &AnalysisState,
            ) -> Vec<AliasingResult> {
                Vec::new()
            }

            fn aliasing_operands(
                &self,
                _graph: &Graph,
                value: Value,
                _state: &AnalysisState,
            ) -> Vec<AliasingOperand> {
                let Value::Argument { op, .. } = value else {
                    return Vec::new();
                };
                vec![AliasingOperand {
                    operand: OpOperand { op, index: 0 },
                    relation: BufferRelation::Equivalent,
                    definite: true,
                }]
            }

            fn reads_memory(
                &self,
                _graph: &Graph,
                _operand: OpOperand,
                _state: &AnalysisState,
            ) -> bool {
                false
            }

            fn writes_memory(
                &self,
                _graph: &Graph,
                _operand: OpOperand,
                _state: &AnalysisState,
            ) -> bool {
                false
            }
        }

        let mut g = Graph::new();
        let alloc = g.append_top(fixtures::alloc_4());
        let body = g.append_top(
            Operation::new(BODY)
                .with_operand(tapir_ir::Value::result(alloc, 0))
                .with_region(Region::new(vec![fixtures::tensor_4()])),
        );
        let arg = tapir_ir::Value::argument(body, 0, 0);

        let mut options = fixtures::options();
        options.allow_function_boundaries = true;
        options.registry.register(BODY, Arc::new(Body));
        options.function_arg_layout = FunctionArgLayout::Inferred;

        // The argument is equivalent to the allocation it receives, so it
        // inherits the allocation's identity layout.
        let ty = buffer_type(&g, arg, &options).unwrap();
        assert_eq!(ty.layout, Layout::Identity);

        // With nothing to infer from, an argument falls back to the fully
        // dynamic layout.
        let plain = g.append_top(
            Operation::new(OpKind("func.func"))
                .with_region(Region::new(vec![fixtures::tensor_4()])),
        );
        let ty = buffer_type(&g, tapir_ir::Value::argument(plain, 0, 0), &options).unwrap();
        assert_eq!(ty.layout, Layout::FullyDynamic);
    }

    #[test]
    fn missing_default_space_is_an_error() {
        let mut g = Graph::new();
        let src = fixtures::source(&mut g);
        let opaque = g.append_top(
            Operation::new(OpKind("mystery.op"))
                .with_operand(src)
                .with_result(fixtures::tensor_4()),
        );
        let mut options = fixtures::options();
        options.default_memory_space = None;
        let err = buffer_type(&g, tapir_ir::Value::result(opaque, 0), &options).unwrap_err();
        assert!(matches!(err, BufferizeError::UnknownMemorySpace { .. }));
    }

    #[test]
    fn allocation_with_space_attr_uses_it() {
        let mut g = Graph::new();
        let mut op = fixtures::alloc_4();
        op.attrs.insert(
            ops::MEMORY_SPACE_ATTR,
            tapir_ir::Attribute::Int(2),
        );
        let alloc = g.append_top(op);
        let options = fixtures::options();
        let ty = buffer_type(&g, tapir_ir::Value::result(alloc, 0), &options).unwrap();
        assert_eq!(ty.space, MemorySpace(2));
    }
}
