use super::Tensor;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;

// Reductions and the broadcast_to / sum_to pair
//
// AXIS REDUCTIONS KEEP THE AXIS: reducing a [2, 3] tensor over axis 0 gives
// [1, 3], over axis 1 gives [2, 1]. The result therefore always broadcasts
// back against its input, which is what the backward rules rely on.
//
// A tensor of shape [.., n, ..] is viewed as (outer, n, inner): every
// (outer, inner) pair names one lane of n elements along the reduced axis,
// starting at offset `o * n * inner + i` with stride `inner`.
//
// broadcast_to and sum_to are exact adjoints. broadcast_to gathers through a
// stride-0 Layout; sum_to walks the SAME layout and scatter-adds into the
// small buffer, so every element that was replicated is summed back once.

impl Tensor {
    fn lanes(&self, axis: usize) -> Result<(usize, usize, usize)> {
        let dims = self.dims();
        if axis >= dims.len() {
            return Err(Error::AxisOutOfRange {
                axis,
                rank: dims.len(),
            });
        }
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        Ok((outer, dims[axis], inner))
    }

    fn kept_shape(&self, axis: usize) -> Shape {
        let mut dims = self.dims().to_vec();
        dims[axis] = 1;
        Shape::new(dims)
    }

    /// Fold every lane along `axis` to one value.
    fn fold_axis(&self, axis: usize, f: impl Fn(&[f64]) -> f64) -> Result<Tensor> {
        let (outer, n, inner) = self.lanes(axis)?;
        let mut out = Vec::with_capacity(outer * inner);
        let mut lane = vec![0.0f64; n];
        for o in 0..outer {
            for i in 0..inner {
                let base = o * n * inner + i;
                for (k, slot) in lane.iter_mut().enumerate() {
                    *slot = self.data[base + k * inner];
                }
                out.push(f(&lane));
            }
        }
        Ok(Tensor::from_parts(out, self.kept_shape(axis)))
    }

    fn require_nonempty_axis(&self, op: &'static str, axis: usize) -> Result<()> {
        let (_, n, _) = self.lanes(axis)?;
        if n == 0 {
            return Err(Error::shape(format!(
                "{}: axis {} of shape {} is empty",
                op, axis, self.shape
            )));
        }
        Ok(())
    }

    // Full reductions

    /// Sum of all elements as a rank-0 tensor.
    pub fn sum(&self) -> Tensor {
        Tensor::scalar(self.data.iter().sum())
    }

    /// Mean of all elements as a rank-0 tensor.
    pub fn mean(&self) -> Result<Tensor> {
        if self.data.is_empty() {
            return Err(Error::shape("mean of an empty tensor"));
        }
        Ok(Tensor::scalar(self.data.iter().sum::<f64>() / self.data.len() as f64))
    }

    pub fn max_all(&self) -> Result<f64> {
        self.data
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or_else(|| Error::shape("max_all of an empty tensor"))
    }

    pub fn min_all(&self) -> Result<f64> {
        self.data
            .iter()
            .copied()
            .reduce(f64::min)
            .ok_or_else(|| Error::shape("min_all of an empty tensor"))
    }

    // Axis reductions (axis kept at size 1)

    pub fn sum_axis(&self, axis: usize) -> Result<Tensor> {
        self.fold_axis(axis, |lane| lane.iter().sum())
    }

    pub fn mean_axis(&self, axis: usize) -> Result<Tensor> {
        self.require_nonempty_axis("mean_axis", axis)?;
        self.fold_axis(axis, |lane| lane.iter().sum::<f64>() / lane.len() as f64)
    }

    /// Population variance along `axis`.
    pub fn var_axis(&self, axis: usize) -> Result<Tensor> {
        self.require_nonempty_axis("var_axis", axis)?;
        self.fold_axis(axis, |lane| {
            let n = lane.len() as f64;
            let mean = lane.iter().sum::<f64>() / n;
            lane.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n
        })
    }

    pub fn max_axis(&self, axis: usize) -> Result<Tensor> {
        self.require_nonempty_axis("max_axis", axis)?;
        self.fold_axis(axis, |lane| lane.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    pub fn min_axis(&self, axis: usize) -> Result<Tensor> {
        self.require_nonempty_axis("min_axis", axis)?;
        self.fold_axis(axis, |lane| lane.iter().copied().fold(f64::INFINITY, f64::min))
    }

    /// Index of the first maximum along `axis`, stored as f64.
    pub fn arg_max(&self, axis: usize) -> Result<Tensor> {
        self.require_nonempty_axis("arg_max", axis)?;
        self.fold_axis(axis, |lane| first_extremum(lane, |a, b| a > b) as f64)
    }

    /// Index of the first minimum along `axis`, stored as f64.
    pub fn arg_min(&self, axis: usize) -> Result<Tensor> {
        self.require_nonempty_axis("arg_min", axis)?;
        self.fold_axis(axis, |lane| first_extremum(lane, |a, b| a < b) as f64)
    }

    /// One-hot mask (same shape as self) marking the first extremum of every
    /// lane along `axis`. Routes max/min gradients to a single element.
    pub(crate) fn extremum_mask(&self, axis: usize, largest: bool) -> Result<Tensor> {
        let (outer, n, inner) = self.lanes(axis)?;
        let mut mask = vec![0.0f64; self.size()];
        for o in 0..outer {
            for i in 0..inner {
                let base = o * n * inner + i;
                let lane: Vec<f64> = (0..n).map(|k| self.data[base + k * inner]).collect();
                if lane.is_empty() {
                    continue;
                }
                let k = if largest {
                    first_extremum(&lane, |a, b| a > b)
                } else {
                    first_extremum(&lane, |a, b| a < b)
                };
                mask[base + k * inner] = 1.0;
            }
        }
        Ok(Tensor::from_parts(mask, self.shape.clone()))
    }

    /// Numerically stable softmax along `axis`: the lane maximum is
    /// subtracted before exponentiating, so no exponent is ever positive.
    pub fn softmax(&self, axis: usize) -> Result<Tensor> {
        let (outer, n, inner) = self.lanes(axis)?;
        let mut out = vec![0.0f64; self.size()];
        for o in 0..outer {
            for i in 0..inner {
                let base = o * n * inner + i;
                let max = (0..n)
                    .map(|k| self.data[base + k * inner])
                    .fold(f64::NEG_INFINITY, f64::max);
                let mut total = 0.0;
                for k in 0..n {
                    let e = (self.data[base + k * inner] - max).exp();
                    out[base + k * inner] = e;
                    total += e;
                }
                for k in 0..n {
                    out[base + k * inner] /= total;
                }
            }
        }
        Ok(Tensor::from_parts(out, self.shape.clone()))
    }

    // Broadcast / reduce pair

    /// Replicate along broadcast axes to reach `shape`.
    pub fn broadcast_to(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        let data = self.expanded(&shape)?.into_owned();
        Ok(Tensor::from_parts(data, shape))
    }

    /// Sum over the axes that broadcasting `shape` up to `self.shape()`
    /// would create. Exact adjoint of `broadcast_to`.
    pub fn sum_to(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        if shape == self.shape {
            return Ok(self.clone());
        }
        if !shape.broadcastable_to(&self.shape) {
            return Err(Error::BroadcastMismatch {
                op: "sum_to",
                lhs: self.shape.clone(),
                rhs: shape,
            });
        }
        let layout = Layout::broadcast(&shape, &self.shape)?;
        let mut out = vec![0.0f64; shape.size()];
        for (&v, target) in self.data.iter().zip(layout.strided_indices()) {
            out[target] += v;
        }
        Ok(Tensor::from_parts(out, shape))
    }
}

fn first_extremum(lane: &[f64], better: impl Fn(f64, f64) -> bool) -> usize {
    let mut best = 0;
    for (k, &v) in lane.iter().enumerate().skip(1) {
        if better(v, lane[best]) {
            best = k;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample() -> Tensor {
        Tensor::from_2d(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])
    }

    #[test]
    fn test_sum_axis_keeps_dim() {
        let t = sample();
        let s0 = t.sum_axis(0).unwrap();
        assert_eq!(s0.shape(), &Shape::from((1, 3)));
        assert_eq!(s0.as_slice(), &[5.0, 7.0, 9.0]);
        let s1 = t.sum_axis(1).unwrap();
        assert_eq!(s1.shape(), &Shape::from((2, 1)));
        assert_eq!(s1.as_slice(), &[6.0, 15.0]);
        assert_eq!(t.sum().shape(), &Shape::scalar());
        assert_eq!(t.sum().item().unwrap(), 21.0);
        assert_eq!(t.sum_axis(2).unwrap_err().kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_mean_var_max_min() {
        let t = sample();
        assert_eq!(t.mean_axis(0).unwrap().as_slice(), &[2.5, 3.5, 4.5]);
        assert_eq!(t.mean_axis(1).unwrap().as_slice(), &[2.0, 5.0]);
        assert_eq!(t.var_axis(0).unwrap().as_slice(), &[2.25, 2.25, 2.25]);
        assert_eq!(t.max_axis(1).unwrap().as_slice(), &[3.0, 6.0]);
        assert_eq!(t.min_axis(0).unwrap().as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(t.max_all().unwrap(), 6.0);
        assert_eq!(t.min_all().unwrap(), 1.0);
        assert_eq!(t.mean().unwrap().item().unwrap(), 3.5);
    }

    #[test]
    fn test_arg_max_first_occurrence() {
        let t = Tensor::from_2d(&[[1.0, 3.0, 3.0], [7.0, 2.0, 7.0]]);
        let a = t.arg_max(1).unwrap();
        assert_eq!(a.shape(), &Shape::from((2, 1)));
        assert_eq!(a.as_slice(), &[1.0, 0.0]);
        assert_eq!(t.arg_min(0).unwrap().as_slice(), &[0.0, 1.0, 0.0]);
        let m = t.extremum_mask(1, true).unwrap();
        assert_eq!(m.as_slice(), &[0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_reduce_3d_middle_axis() {
        let t = Tensor::new((0..24).map(f64::from).collect(), (2, 3, 4)).unwrap();
        let s = t.sum_axis(1).unwrap();
        assert_eq!(s.shape(), &Shape::from((2, 1, 4)));
        // lane (0, 0): 0 + 4 + 8
        assert_eq!(s.get(&[0, 0, 0]).unwrap(), 12.0);
        // lane (1, 3): 15 + 19 + 23
        assert_eq!(s.get(&[1, 0, 3]).unwrap(), 57.0);
    }

    #[test]
    fn test_softmax_rows_sum_to_one_and_stable() {
        let t = Tensor::from_2d(&[[1.0, 2.0, 3.0], [1e4, -1e4, 0.0]]);
        let s = t.softmax(1).unwrap();
        assert!(s.as_slice().iter().all(|v| v.is_finite()));
        let rows = s.sum_axis(1).unwrap();
        for &r in rows.as_slice() {
            assert!((r - 1.0).abs() < 1e-12);
        }
        assert!((s.get(&[1, 0]).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_broadcast_to_sum_to_adjoint() {
        let bias = Tensor::from_row(&[1.0, 2.0, 3.0]);
        let big = bias.broadcast_to((4, 3)).unwrap();
        assert_eq!(big.shape(), &Shape::from((4, 3)));
        let back = big.sum_to((1, 3)).unwrap();
        assert_eq!(back.as_slice(), &[4.0, 8.0, 12.0]);

        let col = Tensor::from_2d(&[[1.0], [2.0]]);
        let g = Tensor::ones((2, 3));
        assert_eq!(g.sum_to((2, 1)).unwrap().as_slice(), &[3.0, 3.0]);
        assert_eq!(col.broadcast_to((2, 3)).unwrap().as_slice(), &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);

        assert_eq!(g.sum_to(3).unwrap().as_slice(), &[2.0, 2.0, 2.0]);
        assert_eq!(g.sum_to(()).unwrap().item().unwrap(), 6.0);
        assert_eq!(g.sum_to((2, 2)).unwrap_err().kind(), ErrorKind::Shape);
        assert!(g.broadcast_to((2, 4)).is_err());
    }
}
