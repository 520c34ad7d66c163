//! tapir intermediate representation.
//!
//! An arena-based dataflow IR for tensor programs: operation nodes with
//! ordered operand/result edges, nested regions, and an open attribute map.
//! Handles are stable across erasure, so rewrite passes can mutate the
//! graph while other components hold references into it.

pub mod arena;
mod display;
mod error;
mod graph;
mod types;

pub use arena::{Arena, Handle};
pub use display::dump_graph;
pub use error::IrError;
pub use graph::{Attribute, Graph, OpId, OpKind, OpOperand, Operation, Region, Value};
pub use types::{
    BufferType, Bytes, Dim, Layout, MemorySpace, Scalar, ScalarKind, Shape, TensorType, ValueType,
};
