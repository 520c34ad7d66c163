//! Operation kinds with known memory behavior, shared by unit tests.

use std::sync::Arc;

use tapir_ir::{
    Graph, OpId, OpKind, OpOperand, Operation, Scalar, Shape, TensorType, Value, ValueType,
};

use crate::interface::{AliasingResult, BufferRelation, BufferizableOp, OpRegistry};
use crate::ops;
use crate::options::BufferizationOptions;
use crate::state::AnalysisState;

/// Reads and overwrites its operand, result equivalent to it.
pub(crate) const WRITE: OpKind = OpKind("test.write");
/// Overwrites its operand without reading it, result equivalent to it.
pub(crate) const FILL: OpKind = OpKind("test.fill");
/// Reads its operands, no results.
pub(crate) const READ: OpKind = OpKind("test.read");
/// Forwards a view of its operand without touching memory.
pub(crate) const VIEW: OpKind = OpKind("test.view");
/// Reads two operands, result may alias either.
pub(crate) const MERGE: OpKind = OpKind("test.merge");
/// Overwrites its operand without reading it; the buffer is consumed, no
/// result aliases it.
pub(crate) const STORE: OpKind = OpKind("test.store");
/// Owns one region whose body may run many times.
pub(crate) const LOOP: OpKind = OpKind("test.loop");

fn equivalent_result(operand: OpOperand) -> Vec<AliasingResult> {
    vec![AliasingResult {
        result: Value::result(operand.op, 0),
        relation: BufferRelation::Equivalent,
        definite: true,
    }]
}

fn unknown_result(operand: OpOperand) -> Vec<AliasingResult> {
    vec![AliasingResult {
        result: Value::result(operand.op, 0),
        relation: BufferRelation::Unknown,
        definite: true,
    }]
}

#[derive(Debug)]
struct Write;

impl BufferizableOp for Write {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        equivalent_result(operand)
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        true
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        true
    }
}

#[derive(Debug)]
struct Fill;

impl BufferizableOp for Fill {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        equivalent_result(operand)
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        true
    }
}

#[derive(Debug)]
struct Read;

impl BufferizableOp for Read {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        _operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        Vec::new()
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        true
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }
}

#[derive(Debug)]
struct View;

impl BufferizableOp for View {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        unknown_result(operand)
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn is_pure_alias(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        true
    }
}

#[derive(Debug)]
struct Merge;

impl BufferizableOp for Merge {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        unknown_result(operand)
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        true
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }
}

#[derive(Debug)]
struct Store;

impl BufferizableOp for Store {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        _operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        Vec::new()
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        true
    }
}

#[derive(Debug)]
struct Loop;

impl BufferizableOp for Loop {
    fn aliasing_results(
        &self,
        _graph: &Graph,
        _operand: OpOperand,
        _state: &AnalysisState,
    ) -> Vec<AliasingResult> {
        Vec::new()
    }

    fn reads_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn writes_memory(&self, _graph: &Graph, _operand: OpOperand, _state: &AnalysisState) -> bool {
        false
    }

    fn is_repeated_region(&self, _graph: &Graph, _op: OpId, _region: u32) -> bool {
        true
    }
}

pub(crate) fn registry() -> OpRegistry {
    let mut registry = ops::core_registry();
    registry.register(WRITE, Arc::new(Write));
    registry.register(FILL, Arc::new(Fill));
    registry.register(READ, Arc::new(Read));
    registry.register(VIEW, Arc::new(View));
    registry.register(MERGE, Arc::new(Merge));
    registry.register(STORE, Arc::new(Store));
    registry.register(LOOP, Arc::new(Loop));
    registry
}

pub(crate) fn options() -> BufferizationOptions {
    BufferizationOptions {
        registry: registry(),
        ..BufferizationOptions::default()
    }
}

pub(crate) fn tensor_ty_4() -> TensorType {
    TensorType::ranked(Scalar::F32, Shape::fixed(&[4]))
}

pub(crate) fn tensor_4() -> ValueType {
    ValueType::Tensor(tensor_ty_4())
}

pub(crate) fn alloc_4() -> Operation {
    ops::alloc_tensor(tensor_ty_4(), Vec::new(), None)
}

/// Appends a fresh allocation and returns its result.
pub(crate) fn source(g: &mut Graph) -> Value {
    Value::result(g.append_top(alloc_4()), 0)
}
