use std::fmt;

use crate::error::{Error, Result};
use crate::shape::Shape;

mod index;
mod ops;
mod random;
mod reduce;

// Tensor: dense N-dimensional array
//
// A Tensor owns a contiguous row-major buffer of f64 plus its Shape, with the
// invariant `data.len() == shape.size()` established by every constructor.
//
// VALUE SEMANTICS:
//
//   Arithmetic, reductions and shape transforms take `&self` and return a
//   freshly allocated Tensor, so results never alias their inputs. The few
//   in-place operations (`set`, `set_item`, `add_at`, `add_to`,
//   `add_assign_tensor`) take `&mut self`; the borrow checker guarantees
//   exclusive access while they run.
//
// LAYOUT OF THIS MODULE:
//
//   mod.rs     construction, accessors, conversions, element access
//   ops.rs     elementwise arithmetic, unary math, comparisons, transforms, dot
//   reduce.rs  axis reductions, broadcast_to / sum_to, softmax
//   index.rs   matrix gather/scatter (get_item, set_item, add_at, add_to)
//   random.rs  seeded uniform / normal factories

/// A dense, row-major N-dimensional array of `f64`.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f64>,
    shape: Shape,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={}, data={:?})", self.shape, self.data)
    }
}

impl Tensor {
    // Internal constructor: callers guarantee the length invariant.
    pub(crate) fn from_parts(data: Vec<f64>, shape: Shape) -> Self {
        debug_assert_eq!(data.len(), shape.size());
        Tensor { data, shape }
    }

    // Creation methods

    /// Create a tensor from a flat buffer and a shape.
    pub fn new(data: Vec<f64>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.size() {
            return Err(Error::ElementCountMismatch {
                expected: shape.size(),
                got: data.len(),
                shape,
            });
        }
        Ok(Tensor { data, shape })
    }

    /// Create a tensor by copying a flat slice.
    pub fn from_slice(data: &[f64], shape: impl Into<Shape>) -> Result<Self> {
        Self::new(data.to_vec(), shape)
    }

    /// A rank-0 tensor holding one value.
    pub fn scalar(value: f64) -> Self {
        Tensor {
            data: vec![value],
            shape: Shape::scalar(),
        }
    }

    /// A 1-D literal becomes a `[1, n]` row, the layout layers expect.
    pub fn from_row(data: &[f64]) -> Self {
        Tensor {
            data: data.to_vec(),
            shape: Shape::from((1, data.len())),
        }
    }

    /// Build a `[rows, C]` matrix from a nested literal.
    ///
    /// ```ignore
    /// let m = Tensor::from_2d(&[[1.0, 2.0], [3.0, 4.0]]);
    /// ```
    pub fn from_2d<const C: usize>(rows: &[[f64; C]]) -> Self {
        let data: Vec<f64> = rows.iter().flatten().copied().collect();
        Tensor {
            data,
            shape: Shape::from((rows.len(), C)),
        }
    }

    /// Build a `[n, R, C]` tensor from a nested literal.
    pub fn from_3d<const R: usize, const C: usize>(blocks: &[[[f64; C]; R]]) -> Self {
        let data: Vec<f64> = blocks.iter().flatten().flatten().copied().collect();
        Tensor {
            data,
            shape: Shape::from((blocks.len(), R, C)),
        }
    }

    /// Build a `[n, P, R, C]` tensor from a nested literal.
    pub fn from_4d<const P: usize, const R: usize, const C: usize>(
        blocks: &[[[[f64; C]; R]; P]],
    ) -> Self {
        let data: Vec<f64> = blocks
            .iter()
            .flatten()
            .flatten()
            .flatten()
            .copied()
            .collect();
        Tensor {
            data,
            shape: Shape::from((blocks.len(), P, R, C)),
        }
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: impl Into<Shape>, value: f64) -> Self {
        let shape = shape.into();
        Tensor {
            data: vec![value; shape.size()],
            shape,
        }
    }

    /// A tensor with this tensor's shape, filled with `value`.
    pub fn like(&self, value: f64) -> Self {
        Self::full(self.shape.clone(), value)
    }

    pub fn zeros_like(&self) -> Self {
        self.like(0.0)
    }

    pub fn ones_like(&self) -> Self {
        self.like(1.0)
    }

    /// Identity matrix. The shape must be a square matrix.
    pub fn eye(shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        shape.require_matrix("eye")?;
        let n = shape.dims()[0];
        if shape.dims()[1] != n {
            crate::bail_shape!("eye requires a square shape, got {}", shape);
        }
        let mut data = vec![0.0f64; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Ok(Tensor { data, shape })
    }

    /// `num` evenly spaced values from `min` to `max` inclusive, as a `[1, num]` row.
    pub fn lin_space(min: f64, max: f64, num: usize) -> Result<Self> {
        if num == 0 {
            return Err(Error::InvalidArgument {
                op: "lin_space",
                reason: "num must be at least 1".to_string(),
            });
        }
        if num == 1 {
            return Ok(Self::from_row(&[min]));
        }
        let step = (max - min) / (num as f64 - 1.0);
        let data: Vec<f64> = (0..num).map(|i| min + step * i as f64).collect();
        Ok(Self::from_row(&data))
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn dim_num(&self) -> usize {
        self.shape.dim_num()
    }

    pub fn is_matrix(&self) -> bool {
        self.shape.is_matrix()
    }

    /// The raw row-major buffer.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Consume the tensor and return its buffer.
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// First element of the buffer (the value of a scalar-like tensor).
    /// Fails on an empty tensor; use `to_scalar` to also reject tensors
    /// holding more than one element.
    pub fn item(&self) -> Result<f64> {
        self.data.first().copied().ok_or_else(|| Error::IndexOutOfRange {
            index: vec![0],
            shape: self.shape.clone(),
        })
    }

    /// The single value of a one-element tensor.
    pub fn to_scalar(&self) -> Result<f64> {
        if self.data.len() != 1 {
            return Err(Error::ShapeMismatch {
                op: "to_scalar",
                expected: Shape::scalar(),
                got: self.shape.clone(),
            });
        }
        Ok(self.data[0])
    }

    /// Nested rows of a tensor with at most 2 dimensions.
    /// Scalars become `[[v]]` and 1-D tensors a single row.
    pub fn to_matrix(&self) -> Result<Vec<Vec<f64>>> {
        match self.dims() {
            [] => Ok(vec![vec![self.data[0]]]),
            [_] => Ok(vec![self.data.clone()]),
            &[r, c] => Ok(split(&self.data, r, c)),
            _ => Err(Error::NotAMatrix {
                op: "to_matrix",
                shape: self.shape.clone(),
            }),
        }
    }

    pub fn to_3d(&self) -> Result<Vec<Vec<Vec<f64>>>> {
        match self.dims() {
            &[n, r, c] => Ok(split(&self.data, n, r * c)
                .iter()
                .map(|block| split(block, r, c))
                .collect()),
            _ => Err(Error::shape(format!(
                "to_3d requires 3 dimensions, got {}",
                self.shape
            ))),
        }
    }

    pub fn to_4d(&self) -> Result<Vec<Vec<Vec<Vec<f64>>>>> {
        match self.dims() {
            &[n, p, r, c] => Ok(split(&self.data, n, p * r * c)
                .iter()
                .map(|outer| {
                    split(outer, p, r * c)
                        .iter()
                        .map(|block| split(block, r, c))
                        .collect()
                })
                .collect()),
            _ => Err(Error::shape(format!(
                "to_4d requires 4 dimensions, got {}",
                self.shape
            ))),
        }
    }

    // Element access

    fn offset_of(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.dim_num() {
            return Err(Error::IndexRankMismatch {
                expected: self.dim_num(),
                got: index.len(),
            });
        }
        let strides = self.shape.stride_contiguous();
        let mut flat = 0;
        for (axis, (&i, &d)) in index.iter().zip(self.dims()).enumerate() {
            if i >= d {
                return Err(Error::IndexOutOfRange {
                    index: index.to_vec(),
                    shape: self.shape.clone(),
                });
            }
            flat += i * strides[axis];
        }
        Ok(flat)
    }

    /// Read one element by multi-index.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        Ok(self.data[self.offset_of(index)?])
    }

    /// Overwrite one element by multi-index.
    pub fn set(&mut self, value: f64, index: &[usize]) -> Result<()> {
        let flat = self.offset_of(index)?;
        self.data[flat] = value;
        Ok(())
    }

    /// In-place `self += other` for same-shaped tensors (gradient accumulation).
    pub fn add_assign_tensor(&mut self, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                op: "add_assign",
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

/// `count` consecutive chunks of `len` elements each (empty chunks allowed).
fn split(data: &[f64], count: usize, len: usize) -> Vec<Vec<f64>> {
    (0..count).map(|i| data[i * len..(i + 1) * len].to_vec()).collect()
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_level(
            f: &mut fmt::Formatter<'_>,
            data: &[f64],
            dims: &[usize],
            depth: usize,
        ) -> fmt::Result {
            match dims {
                [] => write!(f, "{}", data[0]),
                [_] => {
                    write!(f, "[")?;
                    for (i, v) in data.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", v)?;
                    }
                    write!(f, "]")
                }
                [n, rest @ ..] => {
                    let step: usize = rest.iter().product();
                    write!(f, "[")?;
                    for i in 0..*n {
                        if i > 0 {
                            write!(f, ",\n{}", " ".repeat(depth + 1))?;
                        }
                        write_level(f, &data[i * step..(i + 1) * step], rest, depth + 1)?;
                    }
                    write!(f, "]")
                }
            }
        }
        if self.data.is_empty() {
            return write!(f, "[] shape={}", self.shape);
        }
        write_level(f, &self.data, self.dims(), 0)
    }
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self {
        Tensor::scalar(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_new_checks_length() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap();
        assert_eq!(t.size(), 6);
        let err = Tensor::new(vec![1.0, 2.0], (2, 3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_literal_constructors() {
        let row = Tensor::from_row(&[1.0, 2.0, 3.0]);
        assert_eq!(row.shape(), &Shape::from((1, 3)));

        let m = Tensor::from_2d(&[[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(m.shape(), &Shape::from((2, 2)));
        assert_eq!(m.to_matrix().unwrap(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let c = Tensor::from_3d(&[[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]]);
        assert_eq!(c.shape(), &Shape::from((2, 2, 2)));
        assert_eq!(c.to_3d().unwrap()[1][0], vec![5.0, 6.0]);

        let h = Tensor::from_4d(&[[[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]]]);
        assert_eq!(h.shape(), &Shape::from((1, 2, 2, 2)));
        assert_eq!(h.to_4d().unwrap()[0][1][1], vec![7.0, 8.0]);
    }

    #[test]
    fn test_factories() {
        assert!(Tensor::zeros((2, 3)).as_slice().iter().all(|&v| v == 0.0));
        assert!(Tensor::ones((2, 2)).as_slice().iter().all(|&v| v == 1.0));
        let seven = Tensor::from_2d(&[[1.0, 2.0], [3.0, 4.0]]).like(7.0);
        assert_eq!(seven.as_slice(), &[7.0; 4]);

        let eye = Tensor::eye((3, 3)).unwrap();
        assert_eq!(
            eye.to_matrix().unwrap(),
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]
        );
        assert!(Tensor::eye((2, 3)).is_err());
    }

    #[test]
    fn test_lin_space() {
        let t = Tensor::lin_space(0.0, 10.0, 11).unwrap();
        assert_eq!(t.shape(), &Shape::from((1, 11)));
        assert_eq!(t.get(&[0, 5]).unwrap(), 5.0);
        assert_eq!(t.get(&[0, 10]).unwrap(), 10.0);
        assert_eq!(
            Tensor::lin_space(0.0, 1.0, 0).unwrap_err().kind(),
            ErrorKind::Domain
        );
    }

    #[test]
    fn test_get_set() {
        let mut t = Tensor::from_2d(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(t.get(&[1, 1]).unwrap(), 5.0);
        t.set(99.0, &[1, 1]).unwrap();
        assert_eq!(t.get(&[1, 1]).unwrap(), 99.0);
        assert_eq!(t.get(&[1, 0]).unwrap(), 4.0);

        assert_eq!(t.get(&[2, 1]).unwrap_err().kind(), ErrorKind::Index);
        assert_eq!(t.set(1.0, &[1, 3]).unwrap_err().kind(), ErrorKind::Index);
        assert_eq!(t.get(&[1]).unwrap_err().kind(), ErrorKind::Index);
    }

    #[test]
    fn test_scalar_and_item() {
        let s = Tensor::scalar(3.5);
        assert_eq!(s.dim_num(), 0);
        assert_eq!(s.to_scalar().unwrap(), 3.5);
        assert!(Tensor::ones((2, 2)).to_scalar().is_err());
        assert_eq!(s.to_matrix().unwrap(), vec![vec![3.5]]);
        assert_eq!(Tensor::from_row(&[2.0, 7.0]).item().unwrap(), 2.0);
        let empty = Tensor::zeros((4, 0));
        assert_eq!(empty.item().unwrap_err().kind(), ErrorKind::Index);
    }

    #[test]
    fn test_display() {
        let t = Tensor::from_2d(&[[1.0, 2.0], [3.0, 4.0]]);
        let s = t.to_string();
        assert!(s.starts_with("[[1, 2]"));
        assert!(s.contains("[3, 4]]"));
    }
}
