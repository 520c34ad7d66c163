//! Textual dump of graphs and types, for logs and test diagnostics.

use std::fmt;

use crate::graph::{Attribute, Graph, OpId, Value};
use crate::types::{BufferType, Dim, Layout, MemorySpace, Scalar, ScalarKind, Shape, TensorType, ValueType};

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "b",
            Self::Sint => "i",
            Self::Uint => "u",
            Self::Float => "f",
            Self::BFloat => "bf",
        })
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, u32::from(self.width) * 8)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Dynamic => f.write_str("?"),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in &self.dims {
            write!(f, "{dim}x")?;
        }
        Ok(())
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity",
            Self::FullyDynamic => "strided",
        })
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space{}", self.0)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Some(shape) => write!(f, "tensor<{}{}>", shape, self.scalar),
            None => write!(f, "tensor<*{}>", self.scalar),
        }
    }
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Some(shape) => write!(
                f,
                "buffer<{}{}, {}, {}>",
                shape, self.scalar, self.layout, self.space
            ),
            None => write!(f, "buffer<*{}, {}>", self.scalar, self.space),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor(t) => t.fmt(f),
            Self::Buffer(b) => b.fmt(f),
            Self::Index => f.write_str("index"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Result { op, index } => write!(f, "%{}#{}", op.index(), index),
            Self::Argument { op, region, index } => {
                write!(f, "%arg{}.{}.{}", op.index(), region, index)
            }
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::BoolArray(bits) => {
                f.write_str("[")?;
                for (i, b) in bits.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{b}")?;
                }
                f.write_str("]")
            }
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Renders the whole graph, one operation per line, regions indented.
pub fn dump_graph(graph: &Graph) -> String {
    let mut out = String::new();
    for &id in graph.top_ops() {
        dump_op(graph, id, 0, &mut out);
    }
    out
}

fn dump_op(graph: &Graph, id: OpId, indent: usize, out: &mut String) {
    use std::fmt::Write;

    let op = graph.op(id);
    let pad = "  ".repeat(indent);
    let _ = write!(out, "{pad}");
    if !op.results.is_empty() {
        for i in 0..op.results.len() {
            if i > 0 {
                let _ = write!(out, ", ");
            }
            let _ = write!(out, "{}", Value::result(id, i as u32));
        }
        let _ = write!(out, " = ");
    }
    let _ = write!(out, "{}(", op.kind);
    for (i, v) in op.operands.iter().enumerate() {
        if i > 0 {
            let _ = write!(out, ", ");
        }
        let _ = write!(out, "{v}");
    }
    let _ = write!(out, ")");
    if !op.attrs.is_empty() {
        let _ = write!(out, " {{");
        for (i, (k, v)) in op.attrs.iter().enumerate() {
            if i > 0 {
                let _ = write!(out, ", ");
            }
            let _ = write!(out, "{k} = {v}");
        }
        let _ = write!(out, "}}");
    }
    if !op.results.is_empty() {
        let _ = write!(out, " : ");
        for (i, ty) in op.results.iter().enumerate() {
            if i > 0 {
                let _ = write!(out, ", ");
            }
            let _ = write!(out, "{ty}");
        }
    }
    let _ = writeln!(out);
    for (r, region) in op.regions.iter().enumerate() {
        let _ = writeln!(out, "{pad}region {r} ({} args) {{", region.args.len());
        for &child in &region.body {
            dump_op(graph, child, indent + 1, out);
        }
        let _ = writeln!(out, "{pad}}}");
    }
}
