use super::Tensor;
use crate::error::{Error, Result};
use crate::shape::Shape;

// Matrix indexing: gather (get_item) and its scatter counterparts
//
// Row and column selectors are optional; `None` means "all":
//
//   rows = Some, cols = Some   pairs: element (rows[k], cols[k]) -> [1, n]
//   rows = Some, cols = None   whole rows                        -> [len, C]
//   rows = None, cols = Some   whole columns                     -> [R, len]
//   rows = None, cols = None   every element                     -> [R, C]
//
// All four cases reduce to the same thing: a list of source offsets in
// output order. get_item gathers through it, set_item overwrites through it,
// add_at accumulates through it. Because add_at uses `+=`, a position picked
// twice receives both contributions, which makes add_at the adjoint of
// get_item.

impl Tensor {
    /// Output shape and source offsets selected by a row/column pair.
    pub(crate) fn item_positions(
        &self,
        rows: Option<&[usize]>,
        cols: Option<&[usize]>,
    ) -> Result<(Shape, Vec<usize>)> {
        self.shape.require_matrix("get_item")?;
        let (r, c) = (self.dims()[0], self.dims()[1]);
        let check = |i: usize, j: usize| -> Result<usize> {
            if i >= r || j >= c {
                return Err(Error::IndexOutOfRange {
                    index: vec![i, j],
                    shape: self.shape.clone(),
                });
            }
            Ok(i * c + j)
        };

        match (rows, cols) {
            (Some(rows), Some(cols)) => {
                if rows.len() != cols.len() {
                    return Err(Error::shape(format!(
                        "get_item: {} row indices but {} column indices",
                        rows.len(),
                        cols.len()
                    )));
                }
                let offsets = rows
                    .iter()
                    .zip(cols)
                    .map(|(&i, &j)| check(i, j))
                    .collect::<Result<Vec<_>>>()?;
                Ok((Shape::from((1, rows.len())), offsets))
            }
            (Some(rows), None) => {
                let mut offsets = Vec::with_capacity(rows.len() * c);
                for &i in rows {
                    for j in 0..c {
                        offsets.push(check(i, j)?);
                    }
                }
                Ok((Shape::from((rows.len(), c)), offsets))
            }
            (None, Some(cols)) => {
                let mut offsets = Vec::with_capacity(r * cols.len());
                for i in 0..r {
                    for &j in cols {
                        offsets.push(check(i, j)?);
                    }
                }
                Ok((Shape::from((r, cols.len())), offsets))
            }
            (None, None) => Ok((self.shape.clone(), (0..r * c).collect())),
        }
    }

    /// Gather elements, rows or columns of a matrix.
    pub fn get_item(&self, rows: Option<&[usize]>, cols: Option<&[usize]>) -> Result<Tensor> {
        let (shape, offsets) = self.item_positions(rows, cols)?;
        let data = offsets.iter().map(|&o| self.data[o]).collect();
        Ok(Tensor::from_parts(data, shape))
    }

    /// Overwrite the selected positions with `values` (in output order).
    pub fn set_item(
        &mut self,
        rows: Option<&[usize]>,
        cols: Option<&[usize]>,
        values: &[f64],
    ) -> Result<()> {
        let (shape, offsets) = self.item_positions(rows, cols)?;
        if values.len() != offsets.len() {
            return Err(Error::ElementCountMismatch {
                shape,
                expected: offsets.len(),
                got: values.len(),
            });
        }
        for (&o, &v) in offsets.iter().zip(values) {
            self.data[o] = v;
        }
        Ok(())
    }

    /// Scatter-add `other` into the selected positions. `other` must have the
    /// shape `get_item` would return for the same selectors.
    pub fn add_at(
        &mut self,
        rows: Option<&[usize]>,
        cols: Option<&[usize]>,
        other: &Tensor,
    ) -> Result<()> {
        let (shape, offsets) = self.item_positions(rows, cols)?;
        if other.shape != shape {
            return Err(Error::ShapeMismatch {
                op: "add_at",
                expected: shape,
                got: other.shape.clone(),
            });
        }
        for (&o, &v) in offsets.iter().zip(&other.data) {
            self.data[o] += v;
        }
        Ok(())
    }

    /// In-place block add: `self[row + a, col + b] += other[a, b]`.
    pub fn add_to(&mut self, row: usize, col: usize, other: &Tensor) -> Result<()> {
        self.shape.require_matrix("add_to")?;
        other.shape.require_matrix("add_to")?;
        let (r, c) = (self.dims()[0], self.dims()[1]);
        let (h, w) = (other.dims()[0], other.dims()[1]);
        if row + h > r || col + w > c {
            return Err(Error::IndexOutOfRange {
                index: vec![row + h.saturating_sub(1), col + w.saturating_sub(1)],
                shape: self.shape.clone(),
            });
        }
        for a in 0..h {
            let dst = &mut self.data[(row + a) * c + col..(row + a) * c + col + w];
            for (d, s) in dst.iter_mut().zip(&other.data[a * w..(a + 1) * w]) {
                *d += s;
            }
        }
        Ok(())
    }

    /// Copy of the block `[row_start, row_end) x [col_start, col_end)`.
    pub fn sub_tensor(
        &self,
        row_start: usize,
        row_end: usize,
        col_start: usize,
        col_end: usize,
    ) -> Result<Tensor> {
        self.shape.require_matrix("sub_tensor")?;
        let (r, c) = (self.dims()[0], self.dims()[1]);
        if row_start > row_end || col_start > col_end || row_end > r || col_end > c {
            return Err(Error::IndexOutOfRange {
                index: vec![row_end, col_end],
                shape: self.shape.clone(),
            });
        }
        let w = col_end - col_start;
        let mut data = Vec::with_capacity((row_end - row_start) * w);
        for i in row_start..row_end {
            data.extend_from_slice(&self.data[i * c + col_start..i * c + col_end]);
        }
        Ok(Tensor::from_parts(data, Shape::from((row_end - row_start, w))))
    }
}
