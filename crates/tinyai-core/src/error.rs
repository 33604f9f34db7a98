use crate::shape::Shape;

// Error: Every failure mode of the tensor/autograd core
//
// The core never recovers silently. An operation either returns a fully
// valid Tensor/Var or one of these errors. Variants are grouped into four
// families, exposed through `Error::kind()`:
//
//   Shape        incompatible or invalid shapes (broadcast, reshape, matmul...)
//   Domain       mathematically undefined input (log of x <= 0, x / ~0, ...)
//   Index        multi-index rank mismatch or out-of-range coordinate
//   GraphUsage   misuse of the autograd graph (released nodes, stale handles)

/// The four error families of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Shape,
    Domain,
    Index,
    GraphUsage,
}

/// All errors that can occur within tinyai-core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two shapes are not broadcast-compatible for an elementwise op.
    #[error("{op}: shapes {lhs} and {rhs} are not broadcast-compatible")]
    BroadcastMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// Shape mismatch where an exact match is required.
    #[error("{op}: expected shape {expected}, got {got}")]
    ShapeMismatch {
        op: &'static str,
        expected: Shape,
        got: Shape,
    },

    /// Element count mismatch when creating a tensor from a buffer.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error("cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements")]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// Matrix multiplication inner dimensions disagree.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Operation requires a 2-D tensor.
    #[error("{op} requires a matrix, got shape {shape}")]
    NotAMatrix { op: &'static str, shape: Shape },

    /// Axis index out of range for the tensor's rank.
    #[error("axis {axis} out of range for tensor with {rank} dimensions")]
    AxisOutOfRange { axis: usize, rank: usize },

    /// Permutation is not a bijection on 0..rank.
    #[error("invalid permutation {order:?} for tensor with {rank} dimensions")]
    InvalidPermutation { order: Vec<usize>, rank: usize },

    /// The unbound placeholder reached a place that needs a concrete size.
    #[error("shape {0} contains an unbound dimension")]
    UnboundDimension(String),

    /// Any other shape problem.
    #[error("shape error: {0}")]
    Shape(String),

    /// Divisor within machine epsilon of zero.
    #[error("{op}: division by a value within epsilon of zero ({value}) at element {index}")]
    DivisionByZero {
        op: &'static str,
        value: f64,
        index: usize,
    },

    /// Input outside an operation's mathematical domain.
    #[error("{op}: input {value} at element {index} is outside the domain ({reason})")]
    Domain {
        op: &'static str,
        value: f64,
        index: usize,
        reason: &'static str,
    },

    /// Invalid scalar argument (e.g. clip with min > max).
    #[error("{op}: invalid argument: {reason}")]
    InvalidArgument { op: &'static str, reason: String },

    /// Multi-index has the wrong number of coordinates.
    #[error("index rank mismatch: tensor has {expected} dimensions, got {got} indices")]
    IndexRankMismatch { expected: usize, got: usize },

    /// Coordinate out of range.
    #[error("index {index:?} out of range for shape {shape}")]
    IndexOutOfRange { index: Vec<usize>, shape: Shape },

    /// Backward reached a node whose creator was released.
    #[error("node {node} was released from the graph; run a fresh forward pass")]
    GraphReleased { node: usize },

    /// Handle belongs to a different graph epoch (or to no live node).
    #[error("stale variable handle {node} (epoch {epoch}, graph is at epoch {current})")]
    StaleHandle {
        node: usize,
        epoch: u32,
        current: u32,
    },

    /// backward() on a non-scalar root without an explicit seed.
    #[error("backward() on non-scalar root of shape {shape} needs an explicit seed gradient")]
    NonScalarBackward { shape: Shape },

    /// Any other misuse of the graph.
    #[error("graph usage error: {0}")]
    Graph(String),
}

impl Error {
    /// The family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BroadcastMismatch { .. }
            | Error::ShapeMismatch { .. }
            | Error::ElementCountMismatch { .. }
            | Error::ReshapeElementMismatch { .. }
            | Error::MatmulShapeMismatch { .. }
            | Error::NotAMatrix { .. }
            | Error::AxisOutOfRange { .. }
            | Error::InvalidPermutation { .. }
            | Error::UnboundDimension(_)
            | Error::Shape(_) => ErrorKind::Shape,
            Error::DivisionByZero { .. } | Error::Domain { .. } | Error::InvalidArgument { .. } => {
                ErrorKind::Domain
            }
            Error::IndexRankMismatch { .. } | Error::IndexOutOfRange { .. } => ErrorKind::Index,
            Error::GraphReleased { .. }
            | Error::StaleHandle { .. }
            | Error::NonScalarBackward { .. }
            | Error::Graph(_) => ErrorKind::GraphUsage,
        }
    }

    /// Create a generic shape error from a message.
    pub fn shape(s: impl Into<String>) -> Self {
        Error::Shape(s.into())
    }

    /// Create a generic graph-usage error from a message.
    pub fn graph(s: impl Into<String>) -> Self {
        Error::Graph(s.into())
    }
}

/// Convenience Result type used throughout tinyai-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted shape error.
/// Usage: `bail_shape!("flatten of {} failed", shape)`
#[macro_export]
macro_rules! bail_shape {
    ($($arg:tt)*) => {
        return Err($crate::Error::Shape(format!($($arg)*)))
    };
}
