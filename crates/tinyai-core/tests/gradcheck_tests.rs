// Finite-difference checks for every differentiable primitive
//
// Each test builds a small graph around one op, weights the output by a
// fixed random tensor (so that ops like softmax, whose outputs sum to a
// constant, still have a non-trivial gradient), and compares the analytic
// gradient with central differences.

use tinyai_core::gradcheck::{check_gradient, max_abs_error, numerical_grad};
use tinyai_core::{Graph, Result, Tensor, Var};

const EPS: f64 = 1e-5;
const TOL: f64 = 1e-5;

fn weighted(g: &mut Graph, out: Var) -> Result<Var> {
    let shape = g.value(out)?.shape().clone();
    let w = g.constant(Tensor::rand_normal(shape, 99));
    g.mul(out, w)
}

fn assert_grad_ok<F>(name: &str, build: F, x: &Tensor)
where
    F: Fn(&mut Graph, Var) -> Result<Var>,
{
    let err = check_gradient(
        |g, v| {
            let y = build(g, v)?;
            weighted(g, y)
        },
        x,
        EPS,
    )
    .unwrap_or_else(|e| panic!("{}: {}", name, e));
    assert!(err < TOL, "{}: max abs error {} exceeds {}", name, err, TOL);
}

type BinaryOp = fn(&mut Graph, Var, Var) -> Result<Var>;

// `v op c` with `c` held constant
fn with_rhs(op: BinaryOp, c: Tensor) -> impl Fn(&mut Graph, Var) -> Result<Var> {
    move |g, v| {
        let c = g.constant(c.clone());
        op(g, v, c)
    }
}

// `c op v` with `c` held constant
fn with_lhs(op: BinaryOp, c: Tensor) -> impl Fn(&mut Graph, Var) -> Result<Var> {
    move |g, v| {
        let c = g.constant(c.clone());
        op(g, c, v)
    }
}

fn sample(shape: (usize, usize), seed: u64) -> Tensor {
    Tensor::rand_normal(shape, seed)
}

fn positive(shape: (usize, usize), seed: u64) -> Tensor {
    Tensor::rand_uniform(shape, 0.5, 2.0, seed).expect("valid range")
}

// Binary arithmetic, both operands, with and without broadcasting

#[test]
fn test_add_grad() {
    assert_grad_ok("add lhs", with_rhs(Graph::add, sample((2, 3), 1)), &sample((2, 3), 2));
    assert_grad_ok(
        "add broadcast rhs",
        with_lhs(Graph::add, sample((2, 3), 3)),
        &sample((1, 3), 4),
    );
}

#[test]
fn test_sub_grad() {
    assert_grad_ok(
        "sub broadcast rhs",
        with_lhs(Graph::sub, sample((3, 2), 5)),
        &sample((3, 1), 6),
    );
}

#[test]
fn test_mul_grad() {
    assert_grad_ok("mul lhs", with_rhs(Graph::mul, sample((2, 3), 7)), &sample((2, 3), 8));
    assert_grad_ok(
        "mul broadcast rhs",
        with_lhs(Graph::mul, sample((4, 3), 9)),
        &sample((1, 3), 10),
    );
}

#[test]
fn test_div_grad() {
    assert_grad_ok(
        "div numerator",
        with_rhs(Graph::div, positive((2, 3), 11)),
        &sample((2, 3), 12),
    );
    assert_grad_ok(
        "div denominator",
        with_lhs(Graph::div, sample((2, 3), 13)),
        &positive((2, 3), 14),
    );
    assert_grad_ok(
        "div broadcast denominator",
        with_lhs(Graph::div, sample((3, 2), 15)),
        &positive((1, 2), 16),
    );
}

#[test]
fn test_matmul_grad() {
    assert_grad_ok("matmul lhs", with_rhs(Graph::matmul, sample((3, 4), 17)), &sample((2, 3), 18));
    assert_grad_ok("matmul rhs", with_lhs(Graph::matmul, sample((2, 3), 19)), &sample((3, 4), 20));
}

// Unary math

#[test]
fn test_activation_grads() {
    let x = sample((3, 4), 21);
    assert_grad_ok("sigmoid", |g, v| g.sigmoid(v), &x);
    assert_grad_ok("tanh", |g, v| g.tanh(v), &x);
    assert_grad_ok("exp", |g, v| g.exp(v), &x);
    assert_grad_ok("gelu", |g, v| g.gelu(v), &x);
    assert_grad_ok("sin", |g, v| g.sin(v), &x);
    assert_grad_ok("cos", |g, v| g.cos(v), &x);
    assert_grad_ok("neg", |g, v| g.neg(v), &x);
    assert_grad_ok("square", |g, v| g.square(v), &x);
}

#[test]
fn test_log_sqrt_pow_grads() {
    let x = positive((2, 3), 22);
    assert_grad_ok("log", |g, v| g.log(v), &x);
    assert_grad_ok("sqrt", |g, v| g.sqrt(v), &x);
    assert_grad_ok("pow 3", |g, v| g.pow(v, 3.0), &x);
    assert_grad_ok("pow -0.5", |g, v| g.pow(v, -0.5), &x);
}

#[test]
fn test_piecewise_grads_away_from_kinks() {
    // every element at least 0.2 away from 0 and from the clip bounds
    let x = Tensor::from_2d(&[[-1.3, -0.4, 0.3], [0.7, 1.6, -2.2]]);
    assert_grad_ok("relu", |g, v| g.relu(v), &x);
    assert_grad_ok("abs", |g, v| g.abs(v), &x);
    assert_grad_ok("clip", |g, v| g.clip(v, -1.0, 1.0), &x);
}

#[test]
fn test_affine_grads() {
    let x = sample((2, 2), 23);
    assert_grad_ok("add_num", |g, v| g.add_num(v, 3.0), &x);
    assert_grad_ok("mul_num", |g, v| g.mul_num(v, -2.5), &x);
    assert_grad_ok("div_num", |g, v| g.div_num(v, 4.0), &x);
}

// Reductions and softmax

#[test]
fn test_reduction_grads() {
    let x = sample((3, 4), 24);
    assert_grad_ok("sum_axis 0", |g, v| g.sum_axis(v, 0), &x);
    assert_grad_ok("sum_axis 1", |g, v| g.sum_axis(v, 1), &x);
    assert_grad_ok("mean_axis 0", |g, v| g.mean_axis(v, 0), &x);
    assert_grad_ok("mean_axis 1", |g, v| g.mean_axis(v, 1), &x);
    assert_grad_ok("max_axis 1", |g, v| g.max_axis(v, 1), &x);
    assert_grad_ok("min_axis 0", |g, v| g.min_axis(v, 0), &x);
    assert_grad_ok("sum", |g, v| g.sum(v), &x);
    assert_grad_ok("mean", |g, v| g.mean(v), &x);
}

#[test]
fn test_reduction_grad_3d_middle_axis() {
    let x = Tensor::rand_normal((2, 3, 2), 25);
    assert_grad_ok("sum_axis 3d", |g, v| g.sum_axis(v, 1), &x);
    assert_grad_ok("softmax 3d", |g, v| g.softmax(v, 1), &x);
}

#[test]
fn test_softmax_grad() {
    let x = sample((3, 5), 26);
    assert_grad_ok("softmax axis 1", |g, v| g.softmax(v, 1), &x);
    assert_grad_ok("softmax axis 0", |g, v| g.softmax(v, 0), &x);
}

// Shape transforms and indexing

#[test]
fn test_shape_op_grads() {
    let x = sample((2, 3), 27);
    assert_grad_ok("transpose", |g, v| g.transpose(v), &x);
    assert_grad_ok("reshape", |g, v| g.reshape(v, (3, 2)), &x);
    assert_grad_ok("flatten", |g, v| g.flatten(v), &x);
    assert_grad_ok("broadcast_to", |g, v| g.broadcast_to(v, (4, 2, 3)), &x);
    assert_grad_ok("sum_to", |g, v| g.sum_to(v, (1, 3)), &x);
    let c = Tensor::rand_normal((2, 3, 4), 28);
    assert_grad_ok("permute", |g, v| g.permute(v, &[2, 0, 1]), &c);
}

#[test]
fn test_get_item_grad() {
    let x = sample((4, 3), 29);
    assert_grad_ok(
        "get_item pairs",
        |g, v| g.get_item(v, Some(&[0, 3, 0]), Some(&[1, 2, 1])),
        &x,
    );
    assert_grad_ok("get_item rows", |g, v| g.get_item(v, Some(&[2, 2, 1]), None), &x);
    assert_grad_ok("get_item cols", |g, v| g.get_item(v, None, Some(&[0, 2])), &x);
}

// Losses and compositions

#[test]
fn test_loss_grads() {
    assert_grad_ok(
        "mse",
        with_rhs(Graph::mean_squared_error, sample((3, 2), 30)),
        &sample((3, 2), 31),
    );

    let labels = Tensor::from_2d(&[[2.0], [0.0], [1.0], [2.0]]);
    assert_grad_ok(
        "softmax_cross_entropy",
        with_rhs(Graph::softmax_cross_entropy, labels),
        &sample((4, 3), 32),
    );
}

#[test]
fn test_two_layer_network_grad() {
    let x = sample((4, 3), 33);
    let w2 = sample((5, 2), 34);
    let b1 = sample((1, 5), 35);
    assert_grad_ok(
        "mlp weight",
        |g, w1| {
            let x = g.constant(x.clone());
            let b1 = g.constant(b1.clone());
            let w2 = g.constant(w2.clone());
            let h = g.linear(x, w1, Some(b1))?;
            let h = g.tanh(h)?;
            let y = g.linear(h, w2, None)?;
            g.softmax(y, 1)
        },
        &sample((3, 5), 36),
    );
}

#[test]
fn test_numerical_grad_matches_known_derivative() {
    // d/dx sum(exp(x)) = exp(x)
    let x = sample((2, 2), 37);
    let numeric = numerical_grad(|t| t.exp().sum().item(), &x, EPS).unwrap();
    assert!(max_abs_error(&numeric, &x.exp()).unwrap() < 1e-8);
}
