// Op: The closed catalog of differentiable primitives
//
// Every non-leaf node in a Graph records the Op that produced it together
// with the handles of its inputs. An Op carries only the parameters of one
// application (an axis, an exponent, a permutation...). Input values and the
// node's own output value live in the graph arena, and backward receives
// them as arguments, so nothing is cached twice.
//
//   forward(inputs)                  -> output
//   backward(grad, inputs, output)   -> one gradient per input, in order
//
// GRADIENT RULES:
//
//   Add/Sub:     grad_a = g,         grad_b = ±g            (then sum_to)
//   Mul:         grad_a = g * b,     grad_b = g * a         (then sum_to)
//   Div:         grad_a = g / b,     grad_b = -g * a / b²   (then sum_to)
//   Matmul:      grad_a = g · bᵀ,    grad_b = aᵀ · g
//   Sigmoid:     g * y * (1 - y)     (y = cached output)
//   Tanh:        g * (1 - y²)
//   Exp:         g * y
//   Relu:        g * [x > 0]
//   Sum/Mean:    broadcast g back over the reduced axis (÷ n for mean)
//   Max/Min:     g routed to the first extremum of each lane
//   Softmax:     y * (g - sum(g * y, axis))
//   BroadcastTo: sum_to(g, input shape), and SumTo the other way round
//   GetItem:     zeros(input shape).add_at(rows, cols, g)
//
// Every binary rule finishes with sum_to: an operand the forward pass
// broadcast must receive the SUM of the gradient over the replicated axes,
// never a raw pass-through.

use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Elementwise binary operations (broadcasting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Elementwise unary operations without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Square,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tanh,
    Sigmoid,
    Relu,
    Gelu,
}

/// Reductions along one axis (the axis is kept at size 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

/// One application of a differentiable primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Binary(BinaryOp),
    Unary(UnaryOp),
    /// `x^exponent`
    Pow { exponent: f64 },
    /// `x * mul + add` (covers add_num, sub_num, mul_num, div_num)
    Affine { mul: f64, add: f64 },
    /// Clamp to `[min, max]`; gradient flows only strictly inside.
    Clip { min: f64, max: f64 },
    /// Matrix product of two 2-D operands.
    Matmul,
    /// 2-D transpose.
    Transpose,
    /// Axis permutation.
    Permute { order: Vec<usize> },
    /// Reshape (and flatten) to `shape`.
    Reshape { shape: Shape },
    BroadcastTo { shape: Shape },
    SumTo { shape: Shape },
    /// Sum of every element to a rank-0 scalar.
    SumAll,
    Reduce { op: ReduceOp, axis: usize },
    Softmax { axis: usize },
    /// Matrix gather; `None` selects every row / column.
    GetItem {
        rows: Option<Vec<usize>>,
        cols: Option<Vec<usize>>,
    },
    /// `mean((pred - target)²)` over every element.
    MeanSquaredError,
    /// Mean over the batch of `-log softmax(logits)[label]`.
    /// Inputs: logits `[N, C]`, labels `[N, 1]` holding class ids.
    SoftmaxCrossEntropy,
}

impl Op {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Binary(BinaryOp::Add) => "add",
            Op::Binary(BinaryOp::Sub) => "sub",
            Op::Binary(BinaryOp::Mul) => "mul",
            Op::Binary(BinaryOp::Div) => "div",
            Op::Unary(u) => match u {
                UnaryOp::Neg => "neg",
                UnaryOp::Abs => "abs",
                UnaryOp::Square => "square",
                UnaryOp::Sqrt => "sqrt",
                UnaryOp::Exp => "exp",
                UnaryOp::Log => "log",
                UnaryOp::Sin => "sin",
                UnaryOp::Cos => "cos",
                UnaryOp::Tanh => "tanh",
                UnaryOp::Sigmoid => "sigmoid",
                UnaryOp::Relu => "relu",
                UnaryOp::Gelu => "gelu",
            },
            Op::Pow { .. } => "pow",
            Op::Affine { .. } => "affine",
            Op::Clip { .. } => "clip",
            Op::Matmul => "matmul",
            Op::Transpose => "transpose",
            Op::Permute { .. } => "permute",
            Op::Reshape { .. } => "reshape",
            Op::BroadcastTo { .. } => "broadcast_to",
            Op::SumTo { .. } => "sum_to",
            Op::SumAll => "sum",
            Op::Reduce { op, .. } => match op {
                ReduceOp::Sum => "sum_axis",
                ReduceOp::Mean => "mean_axis",
                ReduceOp::Max => "max_axis",
                ReduceOp::Min => "min_axis",
            },
            Op::Softmax { .. } => "softmax",
            Op::GetItem { .. } => "get_item",
            Op::MeanSquaredError => "mean_squared_error",
            Op::SoftmaxCrossEntropy => "softmax_cross_entropy",
        }
    }

    /// Number of input tensors the op consumes.
    pub fn arity(&self) -> usize {
        match self {
            Op::Binary(_) | Op::Matmul | Op::MeanSquaredError | Op::SoftmaxCrossEntropy => 2,
            _ => 1,
        }
    }

    fn check_arity(&self, got: usize) -> Result<()> {
        if got != self.arity() {
            return Err(Error::graph(format!(
                "{} takes {} input(s), got {}",
                self.name(),
                self.arity(),
                got
            )));
        }
        Ok(())
    }

    /// Compute the output value from the input values.
    pub fn forward(&self, inputs: &[&Tensor]) -> Result<Tensor> {
        self.check_arity(inputs.len())?;
        let x = inputs[0];
        match self {
            Op::Binary(op) => {
                let y = inputs[1];
                match op {
                    BinaryOp::Add => x.add(y),
                    BinaryOp::Sub => x.sub(y),
                    BinaryOp::Mul => x.mul(y),
                    BinaryOp::Div => x.div(y),
                }
            }
            Op::Unary(op) => match op {
                UnaryOp::Neg => Ok(x.neg()),
                UnaryOp::Abs => Ok(x.abs()),
                UnaryOp::Square => Ok(x.square()),
                UnaryOp::Sqrt => x.sqrt(),
                UnaryOp::Exp => Ok(x.exp()),
                UnaryOp::Log => x.log(),
                UnaryOp::Sin => Ok(x.sin()),
                UnaryOp::Cos => Ok(x.cos()),
                UnaryOp::Tanh => Ok(x.tanh()),
                UnaryOp::Sigmoid => Ok(x.sigmoid()),
                UnaryOp::Relu => Ok(x.relu()),
                UnaryOp::Gelu => Ok(x.gelu()),
            },
            Op::Pow { exponent } => x.pow(*exponent),
            Op::Affine { mul, add } => Ok(x.map(|v| v * mul + add)),
            Op::Clip { min, max } => x.clip(*min, *max),
            Op::Matmul => x.dot(inputs[1]),
            Op::Transpose => x.transpose(),
            Op::Permute { order } => x.permute(order),
            Op::Reshape { shape } => x.reshape(shape),
            Op::BroadcastTo { shape } => x.broadcast_to(shape),
            Op::SumTo { shape } => x.sum_to(shape),
            Op::SumAll => Ok(x.sum()),
            Op::Reduce { op, axis } => match op {
                ReduceOp::Sum => x.sum_axis(*axis),
                ReduceOp::Mean => x.mean_axis(*axis),
                ReduceOp::Max => x.max_axis(*axis),
                ReduceOp::Min => x.min_axis(*axis),
            },
            Op::Softmax { axis } => x.softmax(*axis),
            Op::GetItem { rows, cols } => x.get_item(rows.as_deref(), cols.as_deref()),
            Op::MeanSquaredError => {
                let target = inputs[1];
                require_same_shape("mean_squared_error", x, target)?;
                x.sub(target)?.square().mean()
            }
            Op::SoftmaxCrossEntropy => {
                let labels = class_labels(x, inputs[1])?;
                let c = x.dims()[1];
                let mut total = 0.0;
                for (row, &label) in x.as_slice().chunks(c).zip(&labels) {
                    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let lse = max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
                    total += lse - row[label];
                }
                Ok(Tensor::scalar(total / labels.len() as f64))
            }
        }
    }

    /// Gradients with respect to each input, given the upstream gradient,
    /// the input values and this op's own output value.
    pub fn backward(&self, grad: &Tensor, inputs: &[&Tensor], output: &Tensor) -> Result<Vec<Tensor>> {
        self.check_arity(inputs.len())?;
        let x = inputs[0];
        let grads = match self {
            Op::Binary(op) => {
                let y = inputs[1];
                let (gx, gy) = match op {
                    BinaryOp::Add => (grad.clone(), grad.clone()),
                    BinaryOp::Sub => (grad.clone(), grad.neg()),
                    BinaryOp::Mul => (grad.mul(y)?, grad.mul(x)?),
                    BinaryOp::Div => {
                        // d(x/y)/dy = -(x/y) / y; the forward pass already vetted y
                        let inv = y.map(f64::recip);
                        let gx = grad.mul(&inv)?;
                        let gy = grad.mul(output)?.mul(&inv)?.neg();
                        (gx, gy)
                    }
                };
                vec![gx.sum_to(x.shape())?, gy.sum_to(y.shape())?]
            }
            Op::Unary(op) => vec![unary_grad(*op, grad, x, output)?],
            Op::Pow { exponent } if *exponent == 0.0 => vec![x.zeros_like()],
            Op::Pow { exponent } => {
                let local = x.map(|v| exponent * v.powf(exponent - 1.0));
                vec![grad.mul(&local)?]
            }
            Op::Affine { mul, .. } => vec![grad.mul_num(*mul)],
            Op::Clip { min, max } => {
                let inside = x.map(|v| if v > *min && v < *max { 1.0 } else { 0.0 });
                vec![grad.mul(&inside)?]
            }
            Op::Matmul => {
                let w = inputs[1];
                vec![grad.dot(&w.transpose()?)?, x.transpose()?.dot(grad)?]
            }
            Op::Transpose => vec![grad.transpose()?],
            Op::Permute { order } => {
                let mut inverse = vec![0usize; order.len()];
                for (i, &d) in order.iter().enumerate() {
                    inverse[d] = i;
                }
                vec![grad.permute(&inverse)?]
            }
            Op::Reshape { .. } => vec![grad.reshape(x.shape())?],
            Op::BroadcastTo { .. } => vec![grad.sum_to(x.shape())?],
            Op::SumTo { .. } | Op::SumAll => vec![grad.broadcast_to(x.shape())?],
            Op::Reduce { op, axis } => {
                let spread = grad.broadcast_to(x.shape())?;
                match op {
                    ReduceOp::Sum => vec![spread],
                    ReduceOp::Mean => {
                        let n = x.shape().dimension(*axis)? as f64;
                        vec![spread.mul_num(1.0 / n)]
                    }
                    ReduceOp::Max => vec![spread.mul(&x.extremum_mask(*axis, true)?)?],
                    ReduceOp::Min => vec![spread.mul(&x.extremum_mask(*axis, false)?)?],
                }
            }
            Op::Softmax { axis } => {
                let gy = grad.mul(output)?;
                let dot = gy.sum_axis(*axis)?;
                vec![output.mul(&grad.sub(&dot)?)?]
            }
            Op::GetItem { rows, cols } => {
                let mut gx = x.zeros_like();
                gx.add_at(rows.as_deref(), cols.as_deref(), grad)?;
                vec![gx]
            }
            Op::MeanSquaredError => {
                let target = inputs[1];
                let scale = 2.0 * grad.item()? / x.size() as f64;
                let gx = x.sub(target)?.mul_num(scale);
                let gt = gx.neg();
                vec![gx, gt]
            }
            Op::SoftmaxCrossEntropy => {
                let labels = class_labels(x, inputs[1])?;
                let batch = labels.len() as f64;
                let mut gx = x.softmax(1)?;
                for (i, &label) in labels.iter().enumerate() {
                    let idx = [i, label];
                    gx.set(gx.get(&idx)? - 1.0, &idx)?;
                }
                let gx = gx.mul_num(grad.item()? / batch);
                // Labels are data, not parameters.
                vec![gx, inputs[1].zeros_like()]
            }
        };
        Ok(grads)
    }
}

fn unary_grad(op: UnaryOp, grad: &Tensor, x: &Tensor, y: &Tensor) -> Result<Tensor> {
    match op {
        UnaryOp::Neg => Ok(grad.neg()),
        UnaryOp::Abs => grad.mul(&x.map(|v| {
            if v > 0.0 {
                1.0
            } else if v < 0.0 {
                -1.0
            } else {
                0.0
            }
        })),
        UnaryOp::Square => grad.mul(&x.mul_num(2.0)),
        // d sqrt(x) = 1 / (2 sqrt(x))
        UnaryOp::Sqrt => grad.mul(&y.map(|s| 0.5 / s)),
        UnaryOp::Exp => grad.mul(y),
        UnaryOp::Log => grad.mul(&x.map(f64::recip)),
        UnaryOp::Sin => grad.mul(&x.cos()),
        UnaryOp::Cos => grad.mul(&x.sin().neg()),
        UnaryOp::Tanh => grad.mul(&y.map(|t| 1.0 - t * t)),
        UnaryOp::Sigmoid => grad.mul(&y.map(|s| s * (1.0 - s))),
        UnaryOp::Relu => grad.mul(&x.mask(0.0)),
        UnaryOp::Gelu => grad.mul(&x.gelu_derivative()),
    }
}

fn require_same_shape(op: &'static str, a: &Tensor, b: &Tensor) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            op,
            expected: a.shape().clone(),
            got: b.shape().clone(),
        });
    }
    Ok(())
}

/// Validate `[N, C]` logits against `N` integer class ids in `[0, C)`.
fn class_labels(logits: &Tensor, labels: &Tensor) -> Result<Vec<usize>> {
    logits.shape().require_matrix("softmax_cross_entropy")?;
    let (n, c) = (logits.dims()[0], logits.dims()[1]);
    if labels.size() != n {
        return Err(Error::ShapeMismatch {
            op: "softmax_cross_entropy",
            expected: Shape::from((n, 1)),
            got: labels.shape().clone(),
        });
    }
    if n == 0 {
        return Err(Error::shape("softmax_cross_entropy of an empty batch"));
    }
    labels
        .as_slice()
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if v < 0.0 || v.fract() != 0.0 || v as usize >= c {
                Err(Error::Domain {
                    op: "softmax_cross_entropy",
                    value: v,
                    index: i,
                    reason: "label must be a class index in [0, classes)",
                })
            } else {
                Ok(v as usize)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_slice(a: &[f64], b: &[f64], tol: f64) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn test_add_backward_sums_broadcast_axis() {
        let x = Tensor::ones((2, 3));
        let bias = Tensor::from_row(&[1.0, 2.0, 3.0]);
        let op = Op::Binary(BinaryOp::Add);
        let out = op.forward(&[&x, &bias]).unwrap();
        let grads = op.backward(&out.ones_like(), &[&x, &bias], &out).unwrap();
        assert_eq!(grads[0], Tensor::ones((2, 3)));
        assert_eq!(grads[1].shape(), bias.shape());
        assert_eq!(grads[1].as_slice(), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_div_backward() {
        let a = Tensor::from_row(&[6.0]);
        let b = Tensor::from_row(&[2.0]);
        let op = Op::Binary(BinaryOp::Div);
        let out = op.forward(&[&a, &b]).unwrap();
        let g = op.backward(&out.ones_like(), &[&a, &b], &out).unwrap();
        assert!(approx_slice(g[0].as_slice(), &[0.5], 1e-12));
        assert!(approx_slice(g[1].as_slice(), &[-1.5], 1e-12));
    }

    #[test]
    fn test_backward_accepts_tiny_divisors() {
        // forward accepts |y| above EPSILON; y^2 falls far below it
        let a = Tensor::from_row(&[1.0]);
        let b = Tensor::from_row(&[1e-9]);
        let op = Op::Binary(BinaryOp::Div);
        let out = op.forward(&[&a, &b]).unwrap();
        let g = op.backward(&out.ones_like(), &[&a, &b], &out).unwrap();
        assert!((g[0].as_slice()[0] / 1e9 - 1.0).abs() < 1e-12);
        assert!((g[1].as_slice()[0] / -1e18 - 1.0).abs() < 1e-12);

        let x = Tensor::from_row(&[1e-17]);
        for op in [Op::Unary(UnaryOp::Log), Op::Unary(UnaryOp::Sqrt)] {
            let y = op.forward(&[&x]).unwrap();
            let g = op.backward(&y.ones_like(), &[&x], &y).unwrap();
            assert!(g[0].as_slice()[0].is_finite(), "{}", op.name());
        }
        // sqrt-like power at zero: the slope is infinite, not an error
        let zero = Tensor::zeros(1);
        let pow = Op::Pow { exponent: 0.5 };
        let y = pow.forward(&[&zero]).unwrap();
        assert!(pow.backward(&y.ones_like(), &[&zero], &y).is_ok());
    }

    #[test]
    fn test_matmul_backward_shapes() {
        let a = Tensor::ones((2, 3));
        let b = Tensor::ones((3, 4));
        let out = Op::Matmul.forward(&[&a, &b]).unwrap();
        let g = Op::Matmul.backward(&out.ones_like(), &[&a, &b], &out).unwrap();
        assert_eq!(g[0].shape(), a.shape());
        assert_eq!(g[1].shape(), b.shape());
        assert!(g[0].as_slice().iter().all(|&v| v == 4.0));
        assert!(g[1].as_slice().iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_softmax_backward_of_uniform_grad_is_zero() {
        let x = Tensor::from_2d(&[[1.0, 2.0, 3.0]]);
        let op = Op::Softmax { axis: 1 };
        let y = op.forward(&[&x]).unwrap();
        let g = op.backward(&y.ones_like(), &[&x], &y).unwrap();
        assert!(g[0].as_slice().iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_max_backward_routes_to_first_maximum() {
        let x = Tensor::from_2d(&[[1.0, 5.0, 5.0], [2.0, 0.0, 1.0]]);
        let op = Op::Reduce {
            op: ReduceOp::Max,
            axis: 1,
        };
        let y = op.forward(&[&x]).unwrap();
        let g = op.backward(&y.ones_like(), &[&x], &y).unwrap();
        assert_eq!(g[0].as_slice(), &[0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_get_item_backward_accumulates() {
        let x = Tensor::zeros((2, 2));
        let op = Op::GetItem {
            rows: Some(vec![0, 0]),
            cols: Some(vec![1, 1]),
        };
        let y = op.forward(&[&x]).unwrap();
        let g = op.backward(&y.ones_like(), &[&x], &y).unwrap();
        assert_eq!(g[0].as_slice(), &[0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cross_entropy() {
        let logits = Tensor::from_2d(&[[0.0, 0.0], [0.0, 0.0]]);
        let labels = Tensor::from_2d(&[[0.0], [1.0]]);
        let op = Op::SoftmaxCrossEntropy;
        let loss = op.forward(&[&logits, &labels]).unwrap();
        assert!((loss.item().unwrap() - 2f64.ln()).abs() < 1e-12);
        let g = op.backward(&Tensor::scalar(1.0), &[&logits, &labels], &loss).unwrap();
        assert!(approx_slice(g[0].as_slice(), &[-0.25, 0.25, 0.25, -0.25], 1e-12));

        let bad = Tensor::from_2d(&[[0.0], [2.0]]);
        assert!(op.forward(&[&logits, &bad]).is_err());
    }

    #[test]
    fn test_arity_is_checked() {
        let x = Tensor::ones(2);
        assert!(Op::Matmul.forward(&[&x]).is_err());
        assert!(Op::Unary(UnaryOp::Exp).forward(&[&x, &x]).is_err());
    }
}
