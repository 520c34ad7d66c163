//! Configuration for buffer assignment: the operation filter, global
//! policy knobs, the capability registry, and emission callbacks.

use std::fmt;
use std::sync::Arc;

use tapir_ir::{Attribute, BufferType, Graph, MemorySpace, OpId, OpKind, Operation, Value, ValueType};

use crate::error::BufferizeError;
use crate::interface::{BufferizableOp, OpRegistry};
use crate::ops;
use crate::state::AnalysisState;

/// Predicate over operations, used by filter rules.
pub type OpPredicate = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

/// Callback emitting a buffer allocation. Receives the graph, the anchor
/// to insert before, the buffer type, the dynamic extent values, and the
/// requested alignment; returns the allocated buffer value. A failure
/// reason is surfaced as [`BufferizeError::Callback`].
pub type AllocationFn = Box<
    dyn Fn(&mut Graph, OpId, &BufferType, &[Value], u64) -> Result<Value, String> + Send + Sync,
>;

/// Callback emitting a deallocation of `buffer` before the anchor. A
/// failure reason is surfaced as [`BufferizeError::Callback`].
pub type DeallocationFn =
    Box<dyn Fn(&mut Graph, OpId, Value) -> Result<(), String> + Send + Sync>;

/// Callback emitting a buffer copy (`from`, then `to`) before the anchor.
/// A failure reason is surfaced as [`BufferizeError::Callback`].
pub type CopyFn =
    Box<dyn Fn(&mut Graph, OpId, Value, Value) -> Result<(), String> + Send + Sync>;

/// Callback seeding extension state when an [`AnalysisState`] is created.
pub type StateInitFn = Box<dyn for<'a> Fn(&mut AnalysisState<'a>) + Send + Sync>;

enum FilterRule {
    Allow(OpPredicate),
    Deny(OpPredicate),
}

/// An allow/deny filter over operations.
///
/// An operation is allowed when no DENY rule matches it and, if at least
/// one ALLOW rule exists, some ALLOW rule matches it. With no rules at
/// all, everything is allowed.
#[derive(Default)]
pub struct OpFilter {
    rules: Vec<FilterRule>,
}

impl OpFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an ALLOW rule.
    pub fn allow(&mut self, predicate: OpPredicate) -> &mut Self {
        self.rules.push(FilterRule::Allow(predicate));
        self
    }

    /// Adds a DENY rule.
    pub fn deny(&mut self, predicate: OpPredicate) -> &mut Self {
        self.rules.push(FilterRule::Deny(predicate));
        self
    }

    /// Adds an ALLOW rule matching one operation kind.
    pub fn allow_kind(&mut self, kind: OpKind) -> &mut Self {
        self.allow(Arc::new(move |op| op.kind == kind))
    }

    /// Adds a DENY rule matching one operation kind.
    pub fn deny_kind(&mut self, kind: OpKind) -> &mut Self {
        self.deny(Arc::new(move |op| op.kind == kind))
    }

    /// Adds an ALLOW rule matching a whole namespace.
    pub fn allow_namespace(&mut self, namespace: &'static str) -> &mut Self {
        self.allow(Arc::new(move |op| op.kind.namespace() == namespace))
    }

    fn has_allow_rule(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r, FilterRule::Allow(_)))
    }

    /// Evaluates the filter for one operation.
    pub fn is_op_allowed(&self, op: &Operation) -> bool {
        for rule in &self.rules {
            if let FilterRule::Deny(p) = rule {
                if p(op) {
                    return false;
                }
            }
        }
        if !self.has_allow_rule() {
            return true;
        }
        self.rules.iter().any(|r| match r {
            FilterRule::Allow(p) => p(op),
            FilterRule::Deny(_) => false,
        })
    }
}

impl fmt::Debug for OpFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (allows, denies) = self.rules.iter().fold((0, 0), |(a, d), r| match r {
            FilterRule::Allow(_) => (a + 1, d),
            FilterRule::Deny(_) => (a, d + 1),
        });
        f.debug_struct("OpFilter")
            .field("allow_rules", &allows)
            .field("deny_rules", &denies)
            .finish()
    }
}

/// Layout assumed for tensor arguments of function-boundary operations.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FunctionArgLayout {
    /// Accept any caller layout (runtime offset and strides).
    #[default]
    FullyDynamic,
    /// Require the canonical contiguous layout.
    StaticIdentity,
    /// Infer the layout from an equivalent aliasing value; arguments with
    /// nothing to infer from fall back to [`FunctionArgLayout::FullyDynamic`].
    Inferred,
}

/// Global policy and configuration for buffer assignment.
pub struct BufferizationOptions {
    /// Whether function-boundary operations (the `func` namespace) take
    /// part in buffer assignment. Off by default.
    pub allow_function_boundaries: bool,
    /// Whether deallocations are emitted for buffers that do not escape.
    pub create_deallocs: bool,
    /// Storage space assumed when none can be inferred. `None` makes such
    /// inference an error.
    pub default_memory_space: Option<MemorySpace>,
    /// Alignment in bytes requested for emitted allocations.
    pub buffer_alignment: u64,
    /// Layout assumed for function-boundary tensor arguments.
    pub function_arg_layout: FunctionArgLayout,
    /// Allow/deny filter consulted before any capability dispatch.
    pub filter: OpFilter,
    /// Capability implementations, keyed by operation kind.
    pub registry: OpRegistry,
    /// Override for allocation emission.
    pub allocation_fn: Option<AllocationFn>,
    /// Override for deallocation emission.
    pub deallocation_fn: Option<DeallocationFn>,
    /// Override for copy emission.
    pub copy_fn: Option<CopyFn>,
    /// Hooks run when a new [`AnalysisState`] is created.
    pub state_initializers: Vec<StateInitFn>,
}

impl Default for BufferizationOptions {
    fn default() -> Self {
        Self {
            allow_function_boundaries: false,
            create_deallocs: true,
            default_memory_space: Some(MemorySpace::DEFAULT),
            buffer_alignment: 64,
            function_arg_layout: FunctionArgLayout::default(),
            filter: OpFilter::new(),
            registry: ops::core_registry(),
            allocation_fn: None,
            deallocation_fn: None,
            copy_fn: None,
            state_initializers: Vec::new(),
        }
    }
}

impl fmt::Debug for BufferizationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferizationOptions")
            .field("allow_function_boundaries", &self.allow_function_boundaries)
            .field("create_deallocs", &self.create_deallocs)
            .field("default_memory_space", &self.default_memory_space)
            .field("buffer_alignment", &self.buffer_alignment)
            .field("function_arg_layout", &self.function_arg_layout)
            .field("filter", &self.filter)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl BufferizationOptions {
    /// Returns `true` if `op` passes the filter and the function-boundary
    /// policy.
    pub fn is_op_allowed(&self, op: &Operation) -> bool {
        if !self.allow_function_boundaries && op.kind.namespace() == "func" {
            return false;
        }
        self.filter.is_op_allowed(op)
    }

    /// The capability implementation for `op`, if the operation is both
    /// registered and allowed. This is the only dispatch point; filtered
    /// operations look opaque to every query.
    pub fn bufferizable_op(&self, op: &Operation) -> Option<&dyn BufferizableOp> {
        if !self.is_op_allowed(op) {
            return None;
        }
        self.registry.get(op.kind)
    }

    /// Emits a buffer allocation before `anchor` and returns the buffer.
    pub fn create_alloc(
        &self,
        graph: &mut Graph,
        anchor: OpId,
        ty: &BufferType,
        dynamic_sizes: &[Value],
    ) -> Result<Value, BufferizeError> {
        if let Some(f) = &self.allocation_fn {
            return f(graph, anchor, ty, dynamic_sizes, self.buffer_alignment)
                .map_err(|reason| BufferizeError::Callback { reason });
        }
        let alloc = graph.insert_before(
            anchor,
            Operation::new(ops::BUFFER_ALLOC)
                .with_operands(dynamic_sizes.iter().copied())
                .with_result(ValueType::Buffer(ty.clone()))
                .with_attr(
                    ops::ALIGNMENT_ATTR,
                    Attribute::Int(self.buffer_alignment as i64),
                ),
        );
        Ok(Value::result(alloc, 0))
    }

    /// Emits a deallocation of `buffer` before `anchor`.
    pub fn create_dealloc(
        &self,
        graph: &mut Graph,
        anchor: OpId,
        buffer: Value,
    ) -> Result<(), BufferizeError> {
        if let Some(f) = &self.deallocation_fn {
            return f(graph, anchor, buffer).map_err(|reason| BufferizeError::Callback { reason });
        }
        graph.insert_before(anchor, Operation::new(ops::BUFFER_DEALLOC).with_operand(buffer));
        Ok(())
    }

    /// Emits a copy of `from` into `to` before `anchor`.
    pub fn create_copy(
        &self,
        graph: &mut Graph,
        anchor: OpId,
        from: Value,
        to: Value,
    ) -> Result<(), BufferizeError> {
        if let Some(f) = &self.copy_fn {
            return f(graph, anchor, from, to).map_err(|reason| BufferizeError::Callback { reason });
        }
        graph.insert_before(
            anchor,
            Operation::new(ops::BUFFER_COPY)
                .with_operand(from)
                .with_operand(to),
        );
        Ok(())
    }
}
