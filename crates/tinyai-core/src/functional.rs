// Differentiable operations on graph variables
//
// One thin method per primitive: each builds the matching `Op` and appends
// it with `Graph::apply`. Composite helpers (sub_num, div_num, linear,
// mean) are expressed through the primitives so they need no rule of
// their own.

use crate::error::{Error, Result};
use crate::graph::{Graph, Var};
use crate::op::{BinaryOp, Op, ReduceOp, UnaryOp};
use crate::shape::Shape;

impl Graph {
    // Binary arithmetic (broadcasting)

    pub fn add(&mut self, a: Var, b: Var) -> Result<Var> {
        self.apply(Op::Binary(BinaryOp::Add), &[a, b])
    }

    pub fn sub(&mut self, a: Var, b: Var) -> Result<Var> {
        self.apply(Op::Binary(BinaryOp::Sub), &[a, b])
    }

    pub fn mul(&mut self, a: Var, b: Var) -> Result<Var> {
        self.apply(Op::Binary(BinaryOp::Mul), &[a, b])
    }

    pub fn div(&mut self, a: Var, b: Var) -> Result<Var> {
        self.apply(Op::Binary(BinaryOp::Div), &[a, b])
    }

    // Scalar arithmetic

    pub fn add_num(&mut self, x: Var, value: f64) -> Result<Var> {
        self.apply(Op::Affine { mul: 1.0, add: value }, &[x])
    }

    pub fn sub_num(&mut self, x: Var, value: f64) -> Result<Var> {
        self.add_num(x, -value)
    }

    pub fn mul_num(&mut self, x: Var, value: f64) -> Result<Var> {
        self.apply(Op::Affine { mul: value, add: 0.0 }, &[x])
    }

    pub fn div_num(&mut self, x: Var, value: f64) -> Result<Var> {
        if value.abs() < f64::EPSILON {
            return Err(Error::DivisionByZero {
                op: "div_num",
                value,
                index: 0,
            });
        }
        self.mul_num(x, 1.0 / value)
    }

    // Unary math

    fn unary(&mut self, op: UnaryOp, x: Var) -> Result<Var> {
        self.apply(Op::Unary(op), &[x])
    }

    pub fn neg(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Neg, x)
    }

    pub fn abs(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Abs, x)
    }

    pub fn square(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Square, x)
    }

    pub fn sqrt(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Sqrt, x)
    }

    pub fn exp(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Exp, x)
    }

    pub fn log(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Log, x)
    }

    pub fn sin(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Sin, x)
    }

    pub fn cos(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Cos, x)
    }

    pub fn tanh(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Tanh, x)
    }

    pub fn sigmoid(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Sigmoid, x)
    }

    pub fn relu(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Relu, x)
    }

    pub fn gelu(&mut self, x: Var) -> Result<Var> {
        self.unary(UnaryOp::Gelu, x)
    }

    pub fn pow(&mut self, x: Var, exponent: f64) -> Result<Var> {
        self.apply(Op::Pow { exponent }, &[x])
    }

    pub fn clip(&mut self, x: Var, min: f64, max: f64) -> Result<Var> {
        self.apply(Op::Clip { min, max }, &[x])
    }

    pub fn softmax(&mut self, x: Var, axis: usize) -> Result<Var> {
        self.apply(Op::Softmax { axis }, &[x])
    }

    // Linear algebra

    /// Matrix product `[m, k] x [k, n]`.
    pub fn matmul(&mut self, a: Var, b: Var) -> Result<Var> {
        self.apply(Op::Matmul, &[a, b])
    }

    /// `x · weight + bias`, with `bias` broadcast over the batch rows.
    pub fn linear(&mut self, x: Var, weight: Var, bias: Option<Var>) -> Result<Var> {
        let y = self.matmul(x, weight)?;
        match bias {
            Some(b) => self.add(y, b),
            None => Ok(y),
        }
    }

    // Shape transforms

    pub fn transpose(&mut self, x: Var) -> Result<Var> {
        self.apply(Op::Transpose, &[x])
    }

    pub fn permute(&mut self, x: Var, order: &[usize]) -> Result<Var> {
        self.apply(
            Op::Permute {
                order: order.to_vec(),
            },
            &[x],
        )
    }

    pub fn reshape(&mut self, x: Var, shape: impl Into<Shape>) -> Result<Var> {
        self.apply(Op::Reshape { shape: shape.into() }, &[x])
    }

    /// Reshape to a `[1, size]` row.
    pub fn flatten(&mut self, x: Var) -> Result<Var> {
        let size = self.value(x)?.size();
        self.reshape(x, (1, size))
    }

    pub fn broadcast_to(&mut self, x: Var, shape: impl Into<Shape>) -> Result<Var> {
        self.apply(Op::BroadcastTo { shape: shape.into() }, &[x])
    }

    pub fn sum_to(&mut self, x: Var, shape: impl Into<Shape>) -> Result<Var> {
        self.apply(Op::SumTo { shape: shape.into() }, &[x])
    }

    // Reductions

    /// Sum of every element as a rank-0 scalar.
    pub fn sum(&mut self, x: Var) -> Result<Var> {
        self.apply(Op::SumAll, &[x])
    }

    /// Mean of every element as a rank-0 scalar.
    pub fn mean(&mut self, x: Var) -> Result<Var> {
        let n = self.value(x)?.size();
        if n == 0 {
            return Err(Error::shape("mean of an empty tensor"));
        }
        let total = self.sum(x)?;
        self.mul_num(total, 1.0 / n as f64)
    }

    fn reduce(&mut self, op: ReduceOp, x: Var, axis: usize) -> Result<Var> {
        self.apply(Op::Reduce { op, axis }, &[x])
    }

    pub fn sum_axis(&mut self, x: Var, axis: usize) -> Result<Var> {
        self.reduce(ReduceOp::Sum, x, axis)
    }

    pub fn mean_axis(&mut self, x: Var, axis: usize) -> Result<Var> {
        self.reduce(ReduceOp::Mean, x, axis)
    }

    pub fn max_axis(&mut self, x: Var, axis: usize) -> Result<Var> {
        self.reduce(ReduceOp::Max, x, axis)
    }

    pub fn min_axis(&mut self, x: Var, axis: usize) -> Result<Var> {
        self.reduce(ReduceOp::Min, x, axis)
    }

    // Indexing

    /// Gather from a matrix; see [`Tensor::get_item`](crate::Tensor::get_item).
    pub fn get_item(
        &mut self,
        x: Var,
        rows: Option<&[usize]>,
        cols: Option<&[usize]>,
    ) -> Result<Var> {
        self.apply(
            Op::GetItem {
                rows: rows.map(<[usize]>::to_vec),
                cols: cols.map(<[usize]>::to_vec),
            },
            &[x],
        )
    }

    // Losses

    /// `mean((pred - target)²)` as a scalar.
    pub fn mean_squared_error(&mut self, pred: Var, target: Var) -> Result<Var> {
        self.apply(Op::MeanSquaredError, &[pred, target])
    }

    /// Mean cross entropy of `[N, C]` logits against `N` class ids.
    pub fn softmax_cross_entropy(&mut self, logits: Var, labels: Var) -> Result<Var> {
        self.apply(Op::SoftmaxCrossEntropy, &[logits, labels])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_linear_forward_and_grads() {
        let mut g = Graph::new();
        let x = g.constant(Tensor::from_2d(&[[1.0, 2.0], [3.0, 4.0]]));
        let w = g.variable(Tensor::from_2d(&[[1.0], [1.0]]));
        let b = g.variable(Tensor::from_2d(&[[0.5]]));
        let y = g.linear(x, w, Some(b)).unwrap();
        assert_eq!(g.value(y).unwrap().as_slice(), &[3.5, 7.5]);

        let loss = g.sum(y).unwrap();
        g.backward(loss).unwrap();
        assert_eq!(g.grad(w).unwrap().unwrap().as_slice(), &[4.0, 6.0]);
        assert_eq!(g.grad(b).unwrap().unwrap().as_slice(), &[2.0]);
        assert!(g.grad(x).unwrap().is_none());
    }

    #[test]
    fn test_scalar_helpers() {
        let mut g = Graph::new();
        let x = g.variable(Tensor::from_row(&[2.0, 4.0]));
        let y = g.sub_num(x, 1.0).unwrap();
        let z = g.div_num(y, 2.0).unwrap();
        assert_eq!(g.value(z).unwrap().as_slice(), &[0.5, 1.5]);
        assert!(g.div_num(z, 0.0).is_err());

        let m = g.mean(z).unwrap();
        g.backward(m).unwrap();
        assert_eq!(g.grad(x).unwrap().unwrap().as_slice(), &[0.25, 0.25]);
    }

    #[test]
    fn test_flatten_and_reshape_grads() {
        let mut g = Graph::new();
        let x = g.variable(Tensor::from_2d(&[[1.0, 2.0], [3.0, 4.0]]));
        let f = g.flatten(x).unwrap();
        assert_eq!(g.value(f).unwrap().shape(), &Shape::from((1, 4)));
        let s = g.square(f).unwrap();
        let loss = g.sum(s).unwrap();
        g.backward(loss).unwrap();
        let gx = g.grad(x).unwrap().unwrap();
        assert_eq!(gx.shape(), &Shape::from((2, 2)));
        assert_eq!(gx.as_slice(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_mse_gradient() {
        let mut g = Graph::new();
        let p = g.variable(Tensor::from_row(&[1.0, 3.0]));
        let t = g.constant(Tensor::from_row(&[0.0, 0.0]));
        let loss = g.mean_squared_error(p, t).unwrap();
        assert_eq!(g.value(loss).unwrap().item().unwrap(), 5.0);
        g.backward(loss).unwrap();
        assert_eq!(g.grad(p).unwrap().unwrap().as_slice(), &[1.0, 3.0]);
    }
}
