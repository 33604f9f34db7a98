//! Finite-difference gradient checking.
//!
//! Compares the analytic gradient produced by `Graph::backward` against a
//! central-difference estimate. Useful for testing new compositions of
//! graph operations as well as the built-in rules.

use crate::error::{Error, Result};
use crate::graph::{Graph, Var};
use crate::tensor::Tensor;

/// Central-difference gradient of a scalar function of one tensor.
///
/// Each element is perturbed by `±eps` in turn:
/// `(f(x + eps) - f(x - eps)) / (2 * eps)`.
pub fn numerical_grad<F>(f: F, x: &Tensor, eps: f64) -> Result<Tensor>
where
    F: Fn(&Tensor) -> Result<f64>,
{
    let mut probe = x.clone();
    let mut grad = Vec::with_capacity(x.size());
    for i in 0..x.size() {
        let orig = x.as_slice()[i];

        probe.data_mut()[i] = orig + eps;
        let f_plus = f(&probe)?;

        probe.data_mut()[i] = orig - eps;
        let f_minus = f(&probe)?;

        probe.data_mut()[i] = orig;
        grad.push((f_plus - f_minus) / (2.0 * eps));
    }
    Tensor::new(grad, x.shape().clone())
}

/// Largest elementwise absolute difference between two same-shaped tensors.
pub fn max_abs_error(a: &Tensor, b: &Tensor) -> Result<f64> {
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            op: "max_abs_error",
            expected: a.shape().clone(),
            got: b.shape().clone(),
        });
    }
    Ok(a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max))
}

/// Check the gradient of `build` with respect to its input.
///
/// `build` receives a fresh graph and a variable holding the input, and
/// returns any output variable; the output is summed to a scalar before
/// differentiating. Returns the largest deviation between the analytic and
/// the numerical gradient.
pub fn check_gradient<F>(build: F, x: &Tensor, eps: f64) -> Result<f64>
where
    F: Fn(&mut Graph, Var) -> Result<Var>,
{
    let mut graph = Graph::new();
    let input = graph.variable(x.clone());
    let out = build(&mut graph, input)?;
    let loss = graph.sum(out)?;
    graph.backward(loss)?;
    let analytic = graph
        .grad(input)?
        .cloned()
        .unwrap_or_else(|| x.zeros_like());

    let numeric = numerical_grad(
        |probe| {
            let mut g = Graph::new();
            let v = g.constant(probe.clone());
            let out = build(&mut g, v)?;
            Ok(g.value(out)?.as_slice().iter().sum())
        },
        x,
        eps,
    )?;
    max_abs_error(&analytic, &numeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numerical_grad_quadratic() {
        // f(x) = sum(x^2) => df/dx = 2x
        let x = Tensor::from_row(&[1.0, -2.0, 3.0]);
        let g = numerical_grad(|t| t.square().sum().item(), &x, 1e-5).unwrap();
        let expected = Tensor::from_row(&[2.0, -4.0, 6.0]);
        assert!(max_abs_error(&g, &expected).unwrap() < 1e-6);
    }

    #[test]
    fn test_max_abs_error() {
        let a = Tensor::from_row(&[1.0, 2.0, 3.0]);
        let b = Tensor::from_row(&[1.1, 2.0, 2.8]);
        assert!((max_abs_error(&a, &b).unwrap() - 0.2).abs() < 1e-10);
        assert!(max_abs_error(&a, &Tensor::ones(3)).is_err());
    }

    #[test]
    fn test_check_gradient_sin() {
        let x = Tensor::from_row(&[0.1, 0.7, -1.3]);
        let err = check_gradient(|g, v| g.sin(v), &x, 1e-5).unwrap();
        assert!(err < 1e-6);
    }
}
