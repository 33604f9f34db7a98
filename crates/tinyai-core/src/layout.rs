use crate::error::{Error, Result};
use crate::shape::Shape;

// Layout: A strided read pattern over a contiguous buffer
//
// Tensors always own a contiguous row-major buffer. A Layout describes how to
// READ that buffer as if it had another shape, without copying first:
//
//   - broadcast: a [1, 3] buffer read as [2, 3] uses strides [0, 1], so
//     every row sees the same three elements (stride 0 = repeat)
//   - permute:   a [2, 3] buffer read as [3, 2] uses strides [1, 3]
//
// Walking a Layout in logical (row-major) order yields the source offsets to
// gather from; collecting them produces the new contiguous buffer. This is
// how broadcast_to, elementwise broadcasting and permute materialize results.

/// Shape plus per-dimension strides into a contiguous source buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
}

impl Layout {
    /// Row-major layout: reading it yields 0, 1, 2, ...
    pub fn contiguous(shape: Shape) -> Self {
        let strides = shape.stride_contiguous();
        Layout { shape, strides }
    }

    /// Read a buffer of shape `src` as the larger shape `target`.
    pub fn broadcast(src: &Shape, target: &Shape) -> Result<Self> {
        if !src.broadcastable_to(target) {
            return Err(Error::BroadcastMismatch {
                op: "broadcast_to",
                lhs: src.clone(),
                rhs: target.clone(),
            });
        }
        Ok(Layout {
            shape: target.clone(),
            strides: src.broadcast_strides(target),
        })
    }

    /// Reorder dimensions: output dim `i` is source dim `order[i]`.
    /// `order` must be a permutation of `0..rank`.
    pub fn permute(src: &Shape, order: &[usize]) -> Result<Self> {
        let rank = src.dim_num();
        let mut seen = vec![false; rank];
        let valid = order.len() == rank
            && order.iter().all(|&d| {
                if d >= rank || seen[d] {
                    false
                } else {
                    seen[d] = true;
                    true
                }
            });
        if !valid {
            return Err(Error::InvalidPermutation {
                order: order.to_vec(),
                rank,
            });
        }
        let src_strides = src.stride_contiguous();
        Ok(Layout {
            shape: Shape::new(order.iter().map(|&d| src.dims()[d]).collect()),
            strides: order.iter().map(|&d| src_strides[d]).collect(),
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.stride_contiguous()
    }

    /// Source offset of one multi-index.
    pub fn flat_index(&self, index: &[usize]) -> usize {
        index.iter().zip(&self.strides).map(|(i, s)| i * s).sum()
    }

    /// Source offsets for every element of `shape`, in row-major order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter {
            current: vec![0; self.shape.dim_num()],
            dims: self.shape.dims().to_vec(),
            strides: self.strides.clone(),
            offset: 0,
            remaining: self.shape.size(),
        }
    }

    /// Gather `src` through this layout into a new contiguous buffer.
    pub fn gather(&self, src: &[f64]) -> Vec<f64> {
        if self.is_contiguous() {
            return src[..self.shape.size()].to_vec();
        }
        self.strided_indices().map(|i| src[i]).collect()
    }
}

// StridedIter: odometer over the logical index space
//
// `offset` is kept incrementally: bumping dim i adds strides[i]; wrapping it
// back to 0 subtracts (dims[i] - 1) * strides[i].

/// Iterator yielding source offsets for each element of a Layout.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    remaining: usize,
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let out = self.offset;
        self.remaining -= 1;
        if self.remaining > 0 {
            for i in (0..self.dims.len()).rev() {
                self.current[i] += 1;
                if self.current[i] < self.dims[i] {
                    self.offset += self.strides[i];
                    break;
                }
                self.offset -= (self.dims[i] - 1) * self.strides[i];
                self.current[i] = 0;
            }
        }
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}
