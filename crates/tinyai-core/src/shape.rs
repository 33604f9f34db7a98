use std::fmt;

use crate::error::{Error, Result};

// Shape: N-dimensional shape of a concrete tensor
//
// A Shape is an immutable, ordered list of dimension sizes:
//   - Scalar: Shape([])            0 dimensions, 1 element
//   - Row:    Shape([1, 5])        the default for 1-D literals
//   - Matrix: Shape([3, 4])        2 dimensions, 12 elements
//   - Batch:  Shape([2, 3, 4])     3 dimensions, 24 elements
//
// Every dimension is a concrete size. The "unbound" placeholder used in layer
// signatures lives in `declared::DeclaredShape` and must be resolved before a
// Tensor can be built from it.
//
// BROADCASTING (NumPy rules):
//   1. Align shapes from the trailing dimension.
//   2. A pair of dims is compatible if equal or one of them is 1.
//   3. Missing leading dims are treated as 1.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// Create a shape from a slice of dimension sizes.
    pub fn of(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }

    /// The rank-0 shape of a scalar.
    pub fn scalar() -> Self {
        Shape(vec![])
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 2 for matrix, ...).
    pub fn dim_num(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements: the product of all dimensions.
    /// The empty product makes a scalar shape hold exactly 1 element.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    /// Size of a specific dimension.
    pub fn dimension(&self, i: usize) -> Result<usize> {
        self.0.get(i).copied().ok_or(Error::AxisOutOfRange {
            axis: i,
            rank: self.dim_num(),
        })
    }

    pub fn is_matrix(&self) -> bool {
        self.0.len() == 2
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Row count of a matrix shape.
    pub fn row(&self) -> Result<usize> {
        self.require_matrix("row")?;
        Ok(self.0[0])
    }

    /// Column count of a matrix shape.
    pub fn column(&self) -> Result<usize> {
        self.require_matrix("column")?;
        Ok(self.0[1])
    }

    pub(crate) fn require_matrix(&self, op: &'static str) -> Result<()> {
        if self.is_matrix() {
            Ok(())
        } else {
            Err(Error::NotAMatrix {
                op,
                shape: self.clone(),
            })
        }
    }

    /// Compute the contiguous (row-major / C-order) strides for this shape.
    ///
    /// For shape [2, 3, 4], strides are [12, 4, 1].
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.dim_num()];
        if self.dim_num() > 0 {
            strides[self.dim_num() - 1] = 1;
            for i in (0..self.dim_num() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    // Broadcasting

    /// Compute the shape produced by broadcasting `self` with `other`.
    ///
    /// Examples:
    ///   [3, 4] and [4]       → [3, 4]
    ///   [2, 1] and [1, 3]    → [2, 3]
    ///   [5, 3, 1] and [3, 4] → [5, 3, 4]
    ///   [3] and [4]          → Error (3 ≠ 4 and neither is 1)
    pub fn broadcast_shape_with(&self, other: &Shape) -> Result<Shape> {
        let l = self.dims();
        let r = other.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };

            if ld == rd || rd == 1 {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else {
                return Err(Error::BroadcastMismatch {
                    op: "broadcast",
                    lhs: self.clone(),
                    rhs: other.clone(),
                });
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }

    /// Whether `self` can be expanded to `target` by broadcasting alone
    /// (i.e. without changing `target`).
    pub fn broadcastable_to(&self, target: &Shape) -> bool {
        let s = self.dims();
        let t = target.dims();
        if s.len() > t.len() {
            return false;
        }
        let offset = t.len() - s.len();
        s.iter()
            .enumerate()
            .all(|(i, &d)| d == t[i + offset] || d == 1)
    }

    /// Strides that read `self`'s contiguous buffer as if it had shape
    /// `target`. Broadcast dimensions (size 1 expanded, or missing leading
    /// dims) get stride 0 so the single element repeats.
    ///
    /// Callers must check `broadcastable_to` first.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let self_dims = self.dims();
        let target_dims = target.dims();
        let self_strides = self.stride_contiguous();

        let mut result = vec![0usize; target_dims.len()];
        let offset = target_dims.len() - self_dims.len();

        for i in 0..self_dims.len() {
            if self_dims[i] == target_dims[i + offset] {
                result[i + offset] = self_strides[i];
            }
        }
        result
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// Convenient From implementations
// These let you write: Shape::from((3, 4)) instead of Shape::new(vec![3, 4])

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize,)> for Shape {
    fn from((d0,): (usize,)) -> Self {
        Shape(vec![d0])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(s: &Shape) -> Self {
        s.clone()
    }
}
