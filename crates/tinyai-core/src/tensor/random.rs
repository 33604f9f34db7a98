use rand::rngs::StdRng;
use rand::{thread_rng, Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal, Uniform};

use super::Tensor;
use crate::error::{Error, Result};
use crate::shape::Shape;

// Random factories
//
// A seed of 0 draws from the thread-local generator (non-deterministic);
// any other seed builds a StdRng so the same seed always yields the same
// tensor.

fn sample<D: Distribution<f64>>(shape: Shape, dist: D, seed: u64) -> Tensor {
    let n = shape.size();
    let data: Vec<f64> = if seed == 0 {
        thread_rng().sample_iter(dist).take(n).collect()
    } else {
        StdRng::seed_from_u64(seed).sample_iter(dist).take(n).collect()
    };
    Tensor::from_parts(data, shape)
}

impl Tensor {
    /// Uniform samples from `[min, max)`.
    pub fn rand_uniform(shape: impl Into<Shape>, min: f64, max: f64, seed: u64) -> Result<Tensor> {
        let shape = shape.into();
        if !min.is_finite() || !max.is_finite() || !(max - min).is_finite() {
            return Err(Error::InvalidArgument {
                op: "rand_uniform",
                reason: format!("bounds [{}, {}) must be finite with a finite width", min, max),
            });
        }
        if !(min <= max) {
            return Err(Error::InvalidArgument {
                op: "rand_uniform",
                reason: format!("min {} is greater than max {}", min, max),
            });
        }
        if min == max {
            return Ok(Tensor::full(shape, min));
        }
        Ok(sample(shape, Uniform::new(min, max), seed))
    }

    /// Standard normal samples (mean 0, variance 1).
    pub fn rand_normal(shape: impl Into<Shape>, seed: u64) -> Tensor {
        sample(shape.into(), StandardNormal, seed)
    }
}
