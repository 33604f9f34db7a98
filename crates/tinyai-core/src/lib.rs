//! # tinyai-core
//!
//! Dense tensors and a reverse-mode automatic-differentiation graph.
//!
//! This crate provides:
//! - [`Tensor`]: dense row-major N-dimensional array of `f64`
//! - [`Shape`] / [`DeclaredShape`]: concrete shapes and layer signatures
//! - [`Graph`] / [`Var`]: arena of autodiff nodes and handles into it
//! - [`Op`]: the closed catalog of differentiable primitives
//! - [`gradcheck`]: finite-difference gradient verification
//!
//! ```ignore
//! use tinyai_core::{Graph, Tensor};
//!
//! let mut g = Graph::new();
//! let a = g.variable(Tensor::from_row(&[2.0]));
//! let b = g.variable(Tensor::from_row(&[3.0]));
//! let ab = g.mul(a, b)?;
//! let c = g.add(ab, a)?;             // c = a * b + a = 8
//! g.backward(c)?;
//! assert_eq!(g.grad(a)?.unwrap().item()?, 4.0); // b + 1
//! ```
// - Shape / DeclaredShape: concrete dims and signatures with unbound slots
// - Layout: strided reads used by broadcast and permute copies
// - Tensor: value type with the full operation set
// - Op / Graph / backprop: the autodiff engine
// - functional: one Graph method per differentiable primitive

pub mod backprop;
pub mod config;
pub mod declared;
pub mod error;
pub mod functional;
pub mod gradcheck;
pub mod graph;
pub mod layout;
pub mod op;
pub mod shape;
pub mod tensor;

pub use config::GraphConfig;
pub use declared::{DeclaredShape, Dim};
pub use error::{Error, ErrorKind, Result};
pub use graph::{Graph, Var};
pub use layout::Layout;
pub use op::{BinaryOp, Op, ReduceOp, UnaryOp};
pub use shape::Shape;
pub use tensor::Tensor;
