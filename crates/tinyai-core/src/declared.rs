use std::fmt;

use crate::error::{Error, Result};
use crate::shape::Shape;

// Declared shapes: layer signatures with an unbound placeholder
//
// Layers describe their inputs before any data exists, e.g. a linear layer
// takes [Batch, 784] where Batch is unknown until a batch arrives. The
// placeholder is written `-1` in signed form and `Dim::Unbound` here.
//
// A DeclaredShape is never stored inside a Tensor. It is either resolved to a
// concrete Shape (filling every unbound slot) or used to validate a concrete
// Shape that shows up at runtime.
//
//   let sig = DeclaredShape::from_signed(&[-1, 784])?;
//   sig.check(&Shape::from((32, 784)))?;        // ok
//   let s = sig.resolve(32);                      // Shape([32, 784])
//   sig.to_shape()                                // Err(UnboundDimension)

/// A single declared dimension: a concrete size or the unbound placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Fixed(usize),
    Unbound,
}

impl Dim {
    /// Signed sentinel form used by layer configuration: `-1` is unbound.
    pub const UNBOUND_SENTINEL: i64 = -1;

    pub fn is_fixed(&self) -> bool {
        matches!(self, Dim::Fixed(_))
    }

    /// Does a concrete size satisfy this declaration?
    pub fn matches(&self, value: usize) -> bool {
        match self {
            Dim::Fixed(n) => *n == value,
            Dim::Unbound => true,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{}", n),
            Dim::Unbound => write!(f, "?"),
        }
    }
}

/// A shape pattern whose dimensions may be unbound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeclaredShape(Vec<Dim>);

impl DeclaredShape {
    pub fn new(dims: Vec<Dim>) -> Self {
        DeclaredShape(dims)
    }

    /// Parse the signed form: non-negative sizes are fixed, `-1` is unbound,
    /// anything else is rejected.
    pub fn from_signed(dims: &[i64]) -> Result<Self> {
        let mut out = Vec::with_capacity(dims.len());
        for &d in dims {
            if d == Dim::UNBOUND_SENTINEL {
                out.push(Dim::Unbound);
            } else if d >= 0 {
                out.push(Dim::Fixed(d as usize));
            } else {
                return Err(Error::shape(format!(
                    "declared dimension {} in {:?} is negative and not the unbound sentinel",
                    d, dims
                )));
            }
        }
        Ok(DeclaredShape(out))
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn dim_num(&self) -> usize {
        self.0.len()
    }

    /// True when no dimension is unbound.
    pub fn is_concrete(&self) -> bool {
        self.0.iter().all(Dim::is_fixed)
    }

    /// Convert to a concrete Shape. Fails if any dimension is unbound.
    pub fn to_shape(&self) -> Result<Shape> {
        let mut dims = Vec::with_capacity(self.0.len());
        for d in &self.0 {
            match d {
                Dim::Fixed(n) => dims.push(*n),
                Dim::Unbound => return Err(Error::UnboundDimension(self.to_string())),
            }
        }
        Ok(Shape::new(dims))
    }

    /// Fill every unbound dimension with `value`.
    pub fn resolve(&self, value: usize) -> Shape {
        Shape::new(
            self.0
                .iter()
                .map(|d| match d {
                    Dim::Fixed(n) => *n,
                    Dim::Unbound => value,
                })
                .collect(),
        )
    }

    /// Does a concrete shape fit this declaration?
    pub fn matches(&self, shape: &Shape) -> bool {
        self.0.len() == shape.dim_num()
            && self
                .0
                .iter()
                .zip(shape.dims())
                .all(|(d, &v)| d.matches(v))
    }

    /// Validate a concrete shape against this declaration.
    pub fn check(&self, shape: &Shape) -> Result<()> {
        if self.matches(shape) {
            Ok(())
        } else {
            Err(Error::shape(format!(
                "shape {} does not match declared shape {}",
                shape, self
            )))
        }
    }
}

impl From<&Shape> for DeclaredShape {
    fn from(s: &Shape) -> Self {
        DeclaredShape(s.dims().iter().map(|&d| Dim::Fixed(d)).collect())
    }
}

impl fmt::Display for DeclaredShape {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_from_signed() {
        let d = DeclaredShape::from_signed(&[-1, 784]).unwrap();
        assert_eq!(d.dims(), &[Dim::Unbound, Dim::Fixed(784)]);
        assert!(!d.is_concrete());
        assert!(DeclaredShape::from_signed(&[-2, 3]).is_err());
    }

    #[test]
    fn test_unbound_never_materializes() {
        let d = DeclaredShape::from_signed(&[-1, 4]).unwrap();
        let err = d.to_shape().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
        assert_eq!(d.resolve(8), Shape::from((8, 4)));
    }

    #[test]
    fn test_matches_and_check() {
        let d = DeclaredShape::from_signed(&[-1, 3]).unwrap();
        assert!(d.matches(&Shape::from((10, 3))));
        assert!(!d.matches(&Shape::from((10, 4))));
        assert!(!d.matches(&Shape::from(3)));
        assert!(d.check(&Shape::from((2, 4))).is_err());
    }

    #[test]
    fn test_display() {
        let d = DeclaredShape::from_signed(&[-1, 3]).unwrap();
        assert_eq!(d.to_string(), "[?, 3]");
    }
}
