//! Type system for the tapir IR.

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar element type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
    /// Brain floating point.
    BFloat,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I8: Self = Self {
        kind: ScalarKind::Sint,
        width: 1,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };
    pub const BF16: Self = Self {
        kind: ScalarKind::BFloat,
        width: 2,
    };
}

/// One extent of a shaped type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Dim {
    /// Statically known extent.
    Fixed(u64),
    /// Extent known only at runtime.
    Dynamic,
}

impl Dim {
    /// Returns `true` for [`Dim::Dynamic`].
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

/// The ordered extents of a ranked shaped type.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct Shape {
    pub dims: Vec<Dim>,
}

impl Shape {
    /// A fully static shape from fixed extents.
    pub fn fixed(dims: &[u64]) -> Self {
        Self {
            dims: dims.iter().map(|&d| Dim::Fixed(d)).collect(),
        }
    }

    /// A shape of `rank` dynamic extents.
    pub fn all_dynamic(rank: usize) -> Self {
        Self {
            dims: vec![Dim::Dynamic; rank],
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns `true` if no dimension is dynamic.
    pub fn is_fully_static(&self) -> bool {
        self.dims.iter().all(|d| !d.is_dynamic())
    }

    /// Indices of the dynamic dimensions, in order.
    pub fn dynamic_dims(&self) -> Vec<usize> {
        self.dims
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_dynamic())
            .map(|(i, _)| i)
            .collect()
    }
}

/// Buffer layout description.
///
/// `Identity` is the canonical row-major contiguous layout. `FullyDynamic`
/// is a strided layout with runtime offset and strides; it is compatible
/// with any in-memory arrangement of the same shape and is the conservative
/// choice when the layout cannot be inferred.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum Layout {
    #[default]
    Identity,
    FullyDynamic,
}

/// An opaque storage-space tag carried by buffer types.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct MemorySpace(pub u32);

impl MemorySpace {
    /// The default storage space.
    pub const DEFAULT: Self = Self(0);
}

/// An abstract immutable tensor value type.
///
/// `shape == None` means the tensor is unranked (rank itself unknown).
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct TensorType {
    pub scalar: Scalar,
    pub shape: Option<Shape>,
}

impl TensorType {
    /// A ranked tensor type.
    pub fn ranked(scalar: Scalar, shape: Shape) -> Self {
        Self {
            scalar,
            shape: Some(shape),
        }
    }

    /// An unranked tensor type.
    pub fn unranked(scalar: Scalar) -> Self {
        Self {
            scalar,
            shape: None,
        }
    }

    /// Rank, if the tensor is ranked.
    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Shape::rank)
    }
}

/// A concrete mutable buffer type.
///
/// `shape == None` means the buffer is unranked; unranked buffers carry no
/// meaningful layout (the field is `Identity` by convention).
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct BufferType {
    pub scalar: Scalar,
    pub shape: Option<Shape>,
    pub layout: Layout,
    pub space: MemorySpace,
}

impl BufferType {
    /// Rank, if the buffer is ranked.
    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Shape::rank)
    }

    /// Buffer type for a tensor with the given layout and storage space.
    /// Unranked tensors map to unranked buffers with no layout.
    pub fn of_tensor(tensor: &TensorType, layout: Layout, space: MemorySpace) -> Self {
        match &tensor.shape {
            Some(shape) => Self {
                scalar: tensor.scalar,
                shape: Some(shape.clone()),
                layout,
                space,
            },
            None => Self {
                scalar: tensor.scalar,
                shape: None,
                layout: Layout::Identity,
                space,
            },
        }
    }
}

/// The static type of a [`crate::Value`].
///
/// A value's tensor/buffer category never changes once assigned; rewrites
/// that switch a value from tensor to buffer replace the value instead.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum ValueType {
    /// Abstract tensor (pre buffer assignment).
    Tensor(TensorType),
    /// Concrete buffer (post buffer assignment).
    Buffer(BufferType),
    /// A shape extent value.
    Index,
}

impl ValueType {
    /// Returns `true` for tensor-typed values (ranked or unranked).
    pub fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor(_))
    }

    /// Returns `true` for buffer-typed values (ranked or unranked).
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }

    /// Returns `true` for unranked tensors or buffers.
    pub fn is_unranked(&self) -> bool {
        match self {
            Self::Tensor(t) => t.shape.is_none(),
            Self::Buffer(b) => b.shape.is_none(),
            Self::Index => false,
        }
    }

    /// The tensor type, if this is a tensor.
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Self::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// The buffer type, if this is a buffer.
    pub fn as_buffer(&self) -> Option<&BufferType> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }
}
