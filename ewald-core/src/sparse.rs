//! Bounding-box sparse arrays.
//!
//! A [`SparseArray`] stores only the smallest axis-aligned box containing
//! every nonzero element of a conceptual dense array. Everything outside
//! `bounds` is exactly zero. Integration profiles are mostly zero outside
//! the angular range a detector covers, so sums over many exposures stay
//! compact.
//!
//! Arithmetic between two sparse arrays works on the union of both boxes
//! and does not re-tighten it afterwards. Arithmetic with a scalar or a
//! dense array goes through the dense form and re-derives a tight box.
#![allow(
    clippy::float_cmp,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc
)]

use crate::arith::BinaryOp;
use crate::error::{Error, Result};
use ndarray::{Array, ArrayBase, ArrayD, Data, Dimension, IntoDimension, Ix1, Ix2, Slice, Zip};
use std::ops::{Add, Div, Mul, Sub};

/// Rank-1 sparse array (integration profiles).
pub type SparseArray1 = SparseArray<Ix1>;
/// Rank-2 sparse array (cake / 2D integration results).
pub type SparseArray2 = SparseArray<Ix2>;

/// Dense values inside a bounding box, zero everywhere else.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseArray<D: Dimension> {
    shape: D,
    bounds: Vec<(usize, usize)>,
    data: Array<f64, D>,
}

impl<D: Dimension> SparseArray<D> {
    /// Builds a sparse array from its dense form, computing the tight box.
    pub fn from_dense<S: Data<Elem = f64>>(dense: &ArrayBase<S, D>) -> Self {
        let bounds = nonzero_bounds(dense);
        let data = dense
            .slice_each_axis(|ax| box_slice(bounds[ax.axis.index()]))
            .to_owned();
        Self {
            shape: dense.raw_dim(),
            bounds,
            data,
        }
    }

    /// Builds a sparse array from a dynamically shaped dense array.
    ///
    /// Fails with [`Error::RankMismatch`] if the rank differs from `D`.
    pub fn from_dyn(dense: ArrayD<f64>) -> Result<Self> {
        let found = dense.ndim();
        let dense = dense.into_dimensionality::<D>().map_err(|_| Error::RankMismatch {
            expected: D::NDIM.unwrap_or(found),
            found,
        })?;
        Ok(Self::from_dense(&dense))
    }

    /// An all-zero array of the given shape.
    pub fn zeros<Sh: IntoDimension<Dim = D>>(shape: Sh) -> Self {
        let shape = shape.into_dimension();
        let ndim = shape.ndim();
        Self {
            data: Array::zeros(D::zeros(ndim)),
            shape,
            bounds: vec![(0, 0); ndim],
        }
    }

    /// Reassembles a sparse array from stored parts without re-deriving
    /// the box.
    ///
    /// Every box must satisfy `start <= end <= shape` and `data` must have
    /// exactly the box's extent along each axis.
    pub fn from_raw_parts(
        data: ArrayD<f64>,
        shape: &[usize],
        bounds: &[(usize, usize)],
    ) -> Result<Self> {
        let found = data.ndim();
        let data = data.into_dimensionality::<D>().map_err(|_| Error::RankMismatch {
            expected: D::NDIM.unwrap_or(found),
            found,
        })?;
        if shape.len() != data.ndim() {
            return Err(Error::RankMismatch {
                expected: data.ndim(),
                found: shape.len(),
            });
        }
        let mut dim = D::zeros(shape.len());
        for (axis, &n) in shape.iter().enumerate() {
            dim[axis] = n;
        }
        let shape = dim;
        if bounds.len() != shape.ndim() {
            return Err(Error::RankMismatch {
                expected: shape.ndim(),
                found: bounds.len(),
            });
        }

        let extent: Vec<usize> = bounds.iter().map(|&(s, e)| e.saturating_sub(s)).collect();
        let valid = bounds
            .iter()
            .zip(shape.slice())
            .all(|(&(s, e), &n)| s <= e && e <= n);
        if !valid || data.shape() != extent.as_slice() {
            return Err(Error::shape_mismatch(&extent, data.shape()));
        }

        Ok(Self {
            shape,
            bounds: bounds.to_vec(),
            data,
        })
    }

    /// Full dense shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.shape.slice()
    }

    /// Full dense shape as a dimension value.
    #[must_use]
    pub fn raw_dim(&self) -> D {
        self.shape.clone()
    }

    /// Per-axis `[start, end)` box.
    #[must_use]
    pub fn bounds(&self) -> &[(usize, usize)] {
        &self.bounds
    }

    /// Dense values covering exactly `bounds`.
    #[must_use]
    pub fn data(&self) -> &Array<f64, D> {
        &self.data
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Number of elements of the full dense array.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.size()
    }

    /// Returns true if the full dense array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the box holds no elements.
    #[must_use]
    pub fn has_empty_box(&self) -> bool {
        self.data.is_empty()
    }

    /// Materializes the full dense array.
    #[must_use]
    pub fn to_dense(&self) -> Array<f64, D> {
        let mut full = Array::zeros(self.shape.clone());
        full.slice_each_axis_mut(|ax| box_slice(self.bounds[ax.axis.index()]))
            .assign(&self.data);
        full
    }

    /// Reads one element of the conceptual dense array.
    ///
    /// Negative indices count from the end of each axis.
    pub fn get(&self, index: &[isize]) -> Result<f64> {
        if index.len() != self.ndim() {
            return Err(Error::RankMismatch {
                expected: self.ndim(),
                found: index.len(),
            });
        }

        let resolved = index
            .iter()
            .zip(self.shape.slice())
            .map(|(&raw, &n)| resolve_index(raw, n))
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| Error::IndexOutOfBounds {
                index: index.to_vec(),
                shape: self.shape().to_vec(),
            })?;

        let mut local = D::zeros(self.ndim());
        for (axis, &i) in resolved.iter().enumerate() {
            let (start, end) = self.bounds[axis];
            if i < start || i >= end {
                return Ok(0.0);
            }
            local[axis] = i - start;
        }
        Ok(self.data[local])
    }

    /// Slices the conceptual dense array, one [`Slice`] per axis.
    ///
    /// Slices lying fully inside the box are served from `data`; any slice
    /// that straddles the box falls back to the dense form. Out-of-range
    /// starts and ends are clamped.
    pub fn slice(&self, slices: &[Slice]) -> Result<Array<f64, D>> {
        if slices.len() != self.ndim() {
            return Err(Error::RankMismatch {
                expected: self.ndim(),
                found: slices.len(),
            });
        }
        if slices.iter().any(|s| s.step == 0) {
            return Err(Error::Config("slice step must be non-zero".to_string()));
        }

        let explicit_end = slices.iter().all(|s| s.end.is_some());
        let clamped: Vec<(usize, usize, isize)> = slices
            .iter()
            .zip(self.shape.slice())
            .map(|(s, &n)| {
                let start = clamp_bound(s.start, n);
                let end = s.end.map_or(n, |e| clamp_bound(e, n)).max(start);
                (start, end, s.step)
            })
            .collect();

        let inside = explicit_end
            && clamped
                .iter()
                .zip(&self.bounds)
                .all(|(&(s, e, _), &(bs, be))| s >= bs && e <= be);

        if inside {
            Ok(self
                .data
                .slice_each_axis(|ax| {
                    let (s, e, step) = clamped[ax.axis.index()];
                    let (bs, _) = self.bounds[ax.axis.index()];
                    Slice::new((s - bs) as isize, Some((e - bs) as isize), step)
                })
                .to_owned())
        } else {
            let full = self.to_dense();
            Ok(full
                .slice_each_axis(|ax| {
                    let (s, e, step) = clamped[ax.axis.index()];
                    Slice::new(s as isize, Some(e as isize), step)
                })
                .to_owned())
        }
    }

    /// Combines two sparse arrays of equal shape over the union of their
    /// boxes.
    ///
    /// The result keeps the union box even where the operation produced
    /// zeros.
    pub fn binary_op(&self, other: &Self, op: BinaryOp) -> Result<Self> {
        if self.shape != other.shape {
            return Err(Error::shape_mismatch(self.shape(), other.shape()));
        }

        let bounds: Vec<(usize, usize)> = self
            .bounds
            .iter()
            .zip(&other.bounds)
            .map(|(a, b)| (a.0.min(b.0), a.1.max(b.1)))
            .collect();

        let lhs = scatter(&self.data, &self.bounds, &bounds);
        let rhs = scatter(&other.data, &other.bounds, &bounds);
        let data = Zip::from(&lhs)
            .and(&rhs)
            .map_collect(|&a, &b| op.apply(a, b));

        Ok(Self {
            shape: self.shape.clone(),
            bounds,
            data,
        })
    }

    /// Applies `op` with a scalar right-hand side.
    #[must_use]
    pub fn scalar_op(&self, rhs: f64, op: BinaryOp) -> Self {
        let dense = self.to_dense().mapv(|a| op.apply(a, rhs));
        Self::from_dense(&dense)
    }

    /// Applies `op` with a dense right-hand side, broadcast to `shape`.
    pub fn dense_op<S, E>(&self, rhs: &ArrayBase<S, E>, op: BinaryOp) -> Result<Self>
    where
        S: Data<Elem = f64>,
        E: Dimension,
    {
        let rhs = rhs
            .broadcast(self.shape.clone())
            .ok_or_else(|| Error::shape_mismatch(self.shape(), rhs.shape()))?;
        let dense = self.to_dense();
        let out = Zip::from(&dense)
            .and(&rhs)
            .map_collect(|&a, &b| op.apply(a, b));
        Ok(Self::from_dense(&out))
    }
}

impl<D: Dimension> Add<f64> for &SparseArray<D> {
    type Output = SparseArray<D>;

    fn add(self, rhs: f64) -> SparseArray<D> {
        self.scalar_op(rhs, BinaryOp::Add)
    }
}

impl<D: Dimension> Sub<f64> for &SparseArray<D> {
    type Output = SparseArray<D>;

    fn sub(self, rhs: f64) -> SparseArray<D> {
        self.scalar_op(rhs, BinaryOp::Sub)
    }
}

impl<D: Dimension> Mul<f64> for &SparseArray<D> {
    type Output = SparseArray<D>;

    fn mul(self, rhs: f64) -> SparseArray<D> {
        self.scalar_op(rhs, BinaryOp::Mul)
    }
}

impl<D: Dimension> Div<f64> for &SparseArray<D> {
    type Output = SparseArray<D>;

    fn div(self, rhs: f64) -> SparseArray<D> {
        self.scalar_op(rhs, BinaryOp::Div)
    }
}

fn box_slice((start, end): (usize, usize)) -> Slice {
    Slice::from(start..end)
}

fn nonzero_bounds<S, D>(arr: &ArrayBase<S, D>) -> Vec<(usize, usize)>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let ndim = arr.ndim();
    let mut lo = vec![usize::MAX; ndim];
    let mut hi = vec![0usize; ndim];
    let mut any = false;

    for (pattern, &value) in arr.indexed_iter() {
        if value == 0.0 {
            continue;
        }
        any = true;
        let index = pattern.into_dimension();
        for (axis, &i) in index.slice().iter().enumerate() {
            lo[axis] = lo[axis].min(i);
            hi[axis] = hi[axis].max(i + 1);
        }
    }

    if !any {
        return vec![(0, 0); ndim];
    }
    lo.into_iter().zip(hi).collect()
}

/// Copies `data`, which covers `from`, into a zero buffer covering `union`.
fn scatter<D: Dimension>(
    data: &Array<f64, D>,
    from: &[(usize, usize)],
    union: &[(usize, usize)],
) -> Array<f64, D> {
    let mut dim = D::zeros(union.len());
    for (axis, &(start, end)) in union.iter().enumerate() {
        dim[axis] = end - start;
    }
    let mut buf = Array::zeros(dim);
    buf.slice_each_axis_mut(|ax| {
        let i = ax.axis.index();
        Slice::from((from[i].0 - union[i].0)..(from[i].1 - union[i].0))
    })
    .assign(data);
    buf
}

fn resolve_index(raw: isize, n: usize) -> Option<usize> {
    let i = if raw < 0 { n as isize + raw } else { raw };
    if i < 0 || i as usize >= n {
        None
    } else {
        Some(i as usize)
    }
}

fn clamp_bound(raw: isize, n: usize) -> usize {
    let i = if raw < 0 { n as isize + raw } else { raw };
    i.clamp(0, n as isize) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, s, Array2, IxDyn};

    fn every_op() -> [BinaryOp; 5] {
        [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::FloorDiv,
        ]
    }

    #[test]
    fn test_roundtrip_1d() {
        for dense in [
            arr1(&[0.0, 0.0, 3.0, 4.0, 0.0]),
            arr1(&[0.0; 6]),
            arr1(&[1.0, 2.0, 3.0]),
            arr1(&[-2.5, 0.0, 0.0, 7.0]),
        ] {
            let sparse = SparseArray1::from_dense(&dense);
            assert_eq!(sparse.to_dense(), dense);
        }
    }

    #[test]
    fn test_roundtrip_2d() {
        let dense = arr2(&[
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 2.0],
            [0.0, 0.0, 0.0, 0.0],
        ]);
        let sparse = SparseArray2::from_dense(&dense);
        assert_eq!(sparse.bounds(), &[(1, 3), (1, 4)]);
        assert_eq!(sparse.data().shape(), &[2, 3]);
        assert_eq!(sparse.to_dense(), dense);

        let full = Array2::from_elem((3, 2), 5.0);
        assert_eq!(SparseArray2::from_dense(&full).to_dense(), full);
    }

    #[test]
    fn test_all_zero_collapses_box() {
        let sparse = SparseArray2::from_dense(&Array2::<f64>::zeros((3, 4)));
        assert_eq!(sparse.bounds(), &[(0, 0), (0, 0)]);
        assert!(sparse.has_empty_box());
        assert_eq!(sparse.shape(), &[3, 4]);
        assert_eq!(sparse.to_dense(), Array2::<f64>::zeros((3, 4)));
    }

    #[test]
    fn test_box_is_tight() {
        let dense = arr2(&[
            [0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 4.0, 0.0, 0.0],
            [0.0, 3.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0],
        ]);
        let sparse = SparseArray2::from_dense(&dense);
        let [(r0, r1), (c0, c1)] = [sparse.bounds()[0], sparse.bounds()[1]];

        for (axis, (start, end)) in [(0usize, (r0, r1)), (1, (c0, c1))] {
            let lane = |i: usize| dense.index_axis(ndarray::Axis(axis), i).to_owned();
            assert!(lane(start).iter().any(|&v| v != 0.0));
            assert!(lane(end - 1).iter().any(|&v| v != 0.0));
            for i in (0..start).chain(end..dense.shape()[axis]) {
                assert!(lane(i).iter().all(|&v| v == 0.0));
            }
        }
    }

    #[test]
    fn test_sum_and_div_scenario() {
        let a = SparseArray1::from_dense(&arr1(&[0.0, 0.0, 3.0, 4.0, 0.0]));
        let b = SparseArray1::from_dense(&arr1(&[0.0, 5.0, 0.0, 0.0, 0.0]));

        let sum = a.binary_op(&b, BinaryOp::Add).unwrap();
        assert_eq!(sum.to_dense(), arr1(&[0.0, 5.0, 3.0, 4.0, 0.0]));
        assert_eq!(sum.bounds(), &[(1, 4)]);

        let quotient = a.binary_op(&b, BinaryOp::Div).unwrap();
        assert_eq!(quotient.to_dense(), arr1(&[0.0; 5]));
        // union box is kept after arithmetic
        assert_eq!(quotient.bounds(), &[(1, 4)]);
    }

    #[test]
    fn test_arithmetic_matches_dense() {
        let a = arr2(&[[0.0, 0.0, 0.0], [0.0, 6.0, -3.0], [0.0, 0.0, 0.0]]);
        let b = arr2(&[[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [2.0, 4.0, 0.0]]);
        let sa = SparseArray2::from_dense(&a);
        let sb = SparseArray2::from_dense(&b);

        for op in every_op() {
            let expected = Zip::from(&a).and(&b).map_collect(|&x, &y| op.apply(x, y));
            let got = sa.binary_op(&sb, op).unwrap().to_dense();
            assert_eq!(got, expected, "operator {op:?}");
        }
    }

    #[test]
    fn test_arithmetic_with_empty_operand() {
        let a = SparseArray1::from_dense(&arr1(&[0.0, 0.0, 0.0, 2.0]));
        let zero = SparseArray1::zeros(4);
        let sum = zero.binary_op(&a, BinaryOp::Add).unwrap();
        assert_eq!(sum.to_dense(), arr1(&[0.0, 0.0, 0.0, 2.0]));
    }

    #[test]
    fn test_shape_mismatch() {
        let a = SparseArray1::from_dense(&arr1(&[1.0, 2.0]));
        let b = SparseArray1::from_dense(&arr1(&[1.0, 2.0, 3.0]));
        let err = a.binary_op(&b, BinaryOp::Add).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_from_dyn_wrong_rank() {
        let dense = ArrayD::<f64>::zeros(IxDyn(&[2, 2]));
        let err = SparseArray1::from_dyn(dense).unwrap_err();
        assert_eq!(
            err,
            Error::RankMismatch {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn test_scalar_ops_retighten() {
        let a = SparseArray1::from_dense(&arr1(&[0.0, 2.0, 4.0, 0.0]));
        let doubled = &a * 2.0;
        assert_eq!(doubled.to_dense(), arr1(&[0.0, 4.0, 8.0, 0.0]));
        assert_eq!(doubled.bounds(), &[(1, 3)]);

        let shifted = &a - 2.0;
        assert_eq!(shifted.to_dense(), arr1(&[-2.0, 0.0, 2.0, -2.0]));
        assert_eq!(shifted.bounds(), &[(0, 4)]);

        let halved = &a / 0.0;
        assert!(halved.has_empty_box());
    }

    #[test]
    fn test_dense_op_broadcasts() {
        let a = SparseArray2::from_dense(&arr2(&[[0.0, 0.0], [1.0, 2.0]]));
        let row = arr1(&[10.0, 0.0]);
        let out = a.dense_op(&row, BinaryOp::Mul).unwrap();
        assert_eq!(out.to_dense(), arr2(&[[0.0, 0.0], [10.0, 0.0]]));
        assert_eq!(out.bounds(), &[(1, 2), (0, 1)]);

        let bad = arr1(&[1.0, 2.0, 3.0]);
        assert!(a.dense_op(&bad, BinaryOp::Add).is_err());
    }

    #[test]
    fn test_get_with_negative_index() {
        let a = SparseArray1::from_dense(&arr1(&[0.0, 0.0, 3.0, 4.0, 0.0]));
        assert_eq!(a.get(&[2]).unwrap(), 3.0);
        assert_eq!(a.get(&[-2]).unwrap(), 4.0);
        assert_eq!(a.get(&[0]).unwrap(), 0.0);
        assert_eq!(a.get(&[-1]).unwrap(), 0.0);
        assert!(matches!(
            a.get(&[5]).unwrap_err(),
            Error::IndexOutOfBounds { .. }
        ));
        assert!(a.get(&[-6]).is_err());

        let b = SparseArray2::from_dense(&arr2(&[[0.0, 0.0], [0.0, 7.0]]));
        assert_eq!(b.get(&[-1, -1]).unwrap(), 7.0);
        assert_eq!(b.get(&[0, 1]).unwrap(), 0.0);
    }

    #[test]
    fn test_slice_inside_and_straddling() {
        let dense = arr1(&[0.0, 0.0, 3.0, 4.0, 5.0, 0.0]);
        let a = SparseArray1::from_dense(&dense);

        let inside = a.slice(&[Slice::new(2, Some(4), 1)]).unwrap();
        assert_eq!(inside, arr1(&[3.0, 4.0]));

        let straddle = a.slice(&[Slice::new(1, Some(4), 1)]).unwrap();
        assert_eq!(straddle, dense.slice(s![1..4]).to_owned());

        let open_end = a.slice(&[Slice::new(-3, None, 1)]).unwrap();
        assert_eq!(open_end, arr1(&[4.0, 5.0, 0.0]));

        let clamped = a.slice(&[Slice::new(4, Some(100), 1)]).unwrap();
        assert_eq!(clamped, arr1(&[5.0, 0.0]));

        assert!(a
            .slice(&[Slice {
                start: 0,
                end: None,
                step: 0
            }])
            .is_err());
    }

    #[test]
    fn test_slice_2d_stepped() {
        let dense = arr2(&[
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 2.0, 3.0],
            [0.0, 4.0, 5.0, 6.0],
        ]);
        let a = SparseArray2::from_dense(&dense);
        let out = a
            .slice(&[Slice::new(1, Some(3), 1), Slice::new(1, Some(4), 2)])
            .unwrap();
        assert_eq!(out, arr2(&[[1.0, 3.0], [4.0, 6.0]]));
    }

    #[test]
    fn test_from_raw_parts_validates() {
        let data = ArrayD::from_shape_vec(IxDyn(&[2]), vec![3.0, 4.0]).unwrap();
        let a = SparseArray1::from_raw_parts(data.clone(), &[5], &[(2, 4)]).unwrap();
        assert_eq!(a.to_dense(), arr1(&[0.0, 0.0, 3.0, 4.0, 0.0]));

        assert!(SparseArray1::from_raw_parts(data.clone(), &[5], &[(2, 5)]).is_err());
        assert!(SparseArray1::from_raw_parts(data.clone(), &[3], &[(2, 4)]).is_err());
        assert!(SparseArray2::from_raw_parts(data, &[5], &[(2, 4)]).is_err());
    }
}
