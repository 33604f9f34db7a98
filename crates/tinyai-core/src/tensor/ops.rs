use std::borrow::Cow;

use super::Tensor;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;

// Elementwise and structural operations
//
// Binary ops broadcast both operands to the common shape first (NumPy rules,
// see shape.rs), then combine element by element. An operand already at the
// output shape is read in place; a broadcast operand is gathered through a
// stride-0 Layout.
//
// Numeric domain is checked BEFORE computing: log of x <= 0, sqrt of x < 0
// and division by |x| < EPSILON all fail with the offending element instead
// of letting NaN or Inf leak into the result.

/// sqrt(2 / pi), the constant of the tanh GELU approximation.
const GELU_C: f64 = 0.797_884_560_802_865_4;
const GELU_K: f64 = 0.044_715;

impl Tensor {
    // Helpers

    pub(crate) fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor::from_parts(self.data.iter().map(|&x| f(x)).collect(), self.shape.clone())
    }

    /// Map after validating every element; the first invalid element is reported.
    fn map_in_domain(
        &self,
        op: &'static str,
        reason: &'static str,
        invalid: impl Fn(f64) -> bool,
        f: impl Fn(f64) -> f64,
    ) -> Result<Tensor> {
        if let Some((index, &value)) = self.data.iter().enumerate().find(|&(_, &x)| invalid(x)) {
            return Err(Error::Domain {
                op,
                value,
                index,
                reason,
            });
        }
        Ok(self.map(f))
    }

    /// This tensor's buffer read as `target` (which must be a broadcast of it).
    pub(crate) fn expanded(&self, target: &Shape) -> Result<Cow<'_, [f64]>> {
        if &self.shape == target {
            return Ok(Cow::Borrowed(&self.data));
        }
        let layout = Layout::broadcast(&self.shape, target)?;
        Ok(Cow::Owned(layout.gather(&self.data)))
    }

    fn broadcast_pair(
        &self,
        rhs: &Tensor,
        op: &'static str,
    ) -> Result<(Shape, Cow<'_, [f64]>, Vec<f64>)> {
        let shape = self
            .shape
            .broadcast_shape_with(&rhs.shape)
            .map_err(|_| Error::BroadcastMismatch {
                op,
                lhs: self.shape.clone(),
                rhs: rhs.shape.clone(),
            })?;
        let lhs = self.expanded(&shape)?;
        let rhs = rhs.expanded(&shape)?.into_owned();
        Ok((shape, lhs, rhs))
    }

    fn zip_broadcast(
        &self,
        rhs: &Tensor,
        op: &'static str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Tensor> {
        let (shape, l, r) = self.broadcast_pair(rhs, op)?;
        let data = l.iter().zip(&r).map(|(&a, &b)| f(a, b)).collect();
        Ok(Tensor::from_parts(data, shape))
    }

    // Arithmetic

    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, "add", |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, "sub", |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, "mul", |a, b| a * b)
    }

    /// Elementwise division. Fails if any (broadcast) divisor is within
    /// `f64::EPSILON` of zero.
    pub fn div(&self, rhs: &Tensor) -> Result<Tensor> {
        let (shape, l, r) = self.broadcast_pair(rhs, "div")?;
        if let Some((index, &value)) = r.iter().enumerate().find(|&(_, &b)| b.abs() < f64::EPSILON) {
            return Err(Error::DivisionByZero {
                op: "div",
                value,
                index,
            });
        }
        let data = l.iter().zip(&r).map(|(&a, &b)| a / b).collect();
        Ok(Tensor::from_parts(data, shape))
    }

    pub fn add_num(&self, value: f64) -> Tensor {
        self.map(|x| x + value)
    }

    pub fn sub_num(&self, value: f64) -> Tensor {
        self.map(|x| x - value)
    }

    pub fn mul_num(&self, value: f64) -> Tensor {
        self.map(|x| x * value)
    }

    pub fn div_num(&self, value: f64) -> Result<Tensor> {
        if value.abs() < f64::EPSILON {
            return Err(Error::DivisionByZero {
                op: "div_num",
                value,
                index: 0,
            });
        }
        Ok(self.map(|x| x / value))
    }

    // Unary math

    pub fn neg(&self) -> Tensor {
        self.map(|x| -x)
    }

    pub fn abs(&self) -> Tensor {
        self.map(f64::abs)
    }

    pub fn square(&self) -> Tensor {
        self.map(|x| x * x)
    }

    /// Elementwise power. Fails where the result would be NaN or infinite
    /// (negative base with fractional exponent, zero to a negative power).
    pub fn pow(&self, exponent: f64) -> Result<Tensor> {
        self.map_in_domain(
            "pow",
            "power is undefined or infinite for this base",
            |x| {
                let y = x.powf(exponent);
                x.is_finite() && !y.is_finite()
            },
            |x| x.powf(exponent),
        )
    }

    pub fn sqrt(&self) -> Result<Tensor> {
        self.map_in_domain("sqrt", "sqrt requires non-negative input", |x| x < 0.0, f64::sqrt)
    }

    pub fn exp(&self) -> Tensor {
        self.map(f64::exp)
    }

    pub fn log(&self) -> Result<Tensor> {
        self.map_in_domain("log", "log requires positive input", |x| x <= 0.0, f64::ln)
    }

    pub fn sin(&self) -> Tensor {
        self.map(f64::sin)
    }

    pub fn cos(&self) -> Tensor {
        self.map(f64::cos)
    }

    pub fn tanh(&self) -> Tensor {
        self.map(f64::tanh)
    }

    /// Logistic sigmoid. Only ever exponentiates a non-positive number, so
    /// large |x| saturates to 0 or 1 instead of overflowing.
    pub fn sigmoid(&self) -> Tensor {
        self.map(|x| {
            if x >= 0.0 {
                1.0 / (1.0 + (-x).exp())
            } else {
                let e = x.exp();
                e / (1.0 + e)
            }
        })
    }

    pub fn relu(&self) -> Tensor {
        self.map(|x| x.max(0.0))
    }

    /// GELU, tanh approximation:
    /// `0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))`
    pub fn gelu(&self) -> Tensor {
        self.map(|x| 0.5 * x * (1.0 + (GELU_C * (x + GELU_K * x * x * x)).tanh()))
    }

    /// Derivative of `gelu` at each element.
    pub(crate) fn gelu_derivative(&self) -> Tensor {
        self.map(|x| {
            let t = (GELU_C * (x + GELU_K * x * x * x)).tanh();
            0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * GELU_C * (1.0 + 3.0 * GELU_K * x * x)
        })
    }

    /// 1 where `x > threshold`, else 0.
    pub fn mask(&self, threshold: f64) -> Tensor {
        self.map(|x| if x > threshold { 1.0 } else { 0.0 })
    }

    /// Elementwise `max(x, floor)`.
    pub fn maximum(&self, floor: f64) -> Tensor {
        self.map(|x| x.max(floor))
    }

    /// Clamp every element to `[min, max]`.
    pub fn clip(&self, min: f64, max: f64) -> Result<Tensor> {
        if min > max {
            return Err(Error::InvalidArgument {
                op: "clip",
                reason: format!("min {} is greater than max {}", min, max),
            });
        }
        Ok(self.map(|x| x.clamp(min, max)))
    }

    // Comparisons (0/1 valued, broadcast shape)

    pub fn eq(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, "eq", |a, b| if a == b { 1.0 } else { 0.0 })
    }

    pub fn gt(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, "gt", |a, b| if a > b { 1.0 } else { 0.0 })
    }

    pub fn lt(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_broadcast(rhs, "lt", |a, b| if a < b { 1.0 } else { 0.0 })
    }

    /// True when every element is strictly greater than its counterpart.
    pub fn is_lar(&self, rhs: &Tensor) -> Result<bool> {
        let (_, l, r) = self.broadcast_pair(rhs, "is_lar")?;
        Ok(l.iter().zip(&r).all(|(a, b)| a > b))
    }

    // Shape transforms (always copy into a fresh contiguous buffer)

    /// Swap the two axes of a matrix.
    pub fn transpose(&self) -> Result<Tensor> {
        self.shape.require_matrix("transpose")?;
        self.permute(&[1, 0])
    }

    /// Reorder axes: output axis `i` is input axis `order[i]`.
    pub fn permute(&self, order: &[usize]) -> Result<Tensor> {
        let layout = Layout::permute(&self.shape, order)?;
        let data = layout.gather(&self.data);
        Ok(Tensor::from_parts(data, layout.shape().clone()))
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        if shape.size() != self.size() {
            return Err(Error::ReshapeElementMismatch {
                src: self.size(),
                dst: shape.size(),
                dst_shape: shape,
            });
        }
        Ok(Tensor::from_parts(self.data.clone(), shape))
    }

    /// Flatten into a `[1, size]` row.
    pub fn flatten(&self) -> Tensor {
        Tensor::from_parts(self.data.clone(), Shape::from((1, self.size())))
    }

    // Linear algebra

    /// Matrix product `[m, k] x [k, n] -> [m, n]`.
    pub fn dot(&self, rhs: &Tensor) -> Result<Tensor> {
        self.shape.require_matrix("dot")?;
        rhs.shape.require_matrix("dot")?;
        let (m, k1) = (self.dims()[0], self.dims()[1]);
        let (k2, n) = (rhs.dims()[0], rhs.dims()[1]);
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        let mut out = vec![0.0f64; m * n];
        // i-k-j loop order keeps the inner loop on contiguous rows of both.
        for i in 0..m {
            let row = &self.data[i * k1..(i + 1) * k1];
            let out_row = &mut out[i * n..(i + 1) * n];
            for (k, &a) in row.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                let rhs_row = &rhs.data[k * n..(k + 1) * n];
                for (o, &b) in out_row.iter_mut().zip(rhs_row) {
                    *o += a * b;
                }
            }
        }
        Ok(Tensor::from_parts(out, Shape::from((m, n))))
    }
}
