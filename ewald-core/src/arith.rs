//! Elementwise arithmetic with safe division.
#![allow(clippy::float_cmp)]

use crate::error::{Error, Result};
use ndarray::{Array, ArrayBase, Data, Dimension, Zip};

/// Division that maps every zero divisor and every non-finite quotient to 0.
///
/// `div0(-1.0, 0.0) == 0.0`, `div0(4.0, 2.0) == 2.0`.
#[inline]
#[must_use]
pub fn div0(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return 0.0;
    }
    let q = a / b;
    if q.is_finite() {
        q
    } else {
        0.0
    }
}

/// Elementwise [`div0`] of two arrays of equal shape.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the shapes differ.
pub fn div0_array<S1, S2, D>(a: &ArrayBase<S1, D>, b: &ArrayBase<S2, D>) -> Result<Array<f64, D>>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    D: Dimension,
{
    if a.shape() != b.shape() {
        return Err(Error::shape_mismatch(a.shape(), b.shape()));
    }
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| div0(x, y)))
}

/// Elementwise [`div0`] of an array by a scalar.
#[must_use]
pub fn div0_scalar<S, D>(a: &ArrayBase<S, D>, b: f64) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    a.mapv(|x| div0(x, b))
}

/// Binary operators supported between sparse arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Safe division: `x / 0 == 0`.
    Div,
    /// Safe division truncated toward zero.
    FloorDiv,
}

impl BinaryOp {
    /// Applies the operator to one pair of elements.
    #[inline]
    #[must_use]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => div0(a, b),
            Self::FloorDiv => div0(a, b).trunc(),
        }
    }
}
