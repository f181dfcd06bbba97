//! Equal-width binning and row-parallel histogram accumulation.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use ewald_core::{Error, Result};
use ndarray::Array1;
use rayon::prelude::*;

/// Rows handled by one rayon task. Fixed so partial sums are merged in
/// the same order on every run.
const ROWS_PER_TASK: usize = 64;

/// `npt` equal-width bins over `[lo, hi]`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Bins {
    lo: f64,
    hi: f64,
    width: f64,
    npt: usize,
}

impl Bins {
    pub(crate) fn new(lo: f64, hi: f64, npt: usize) -> Result<Self> {
        if npt == 0 {
            return Err(Error::Engine("number of bins must be positive".into()));
        }
        if !(lo.is_finite() && hi.is_finite() && hi > lo) {
            return Err(Error::Engine(format!("invalid range [{lo}, {hi}]")));
        }
        Ok(Self {
            lo,
            hi,
            width: (hi - lo) / npt as f64,
            npt,
        })
    }

    /// Bins spanning the observed data extent, widened when degenerate.
    pub(crate) fn spanning(extent: Option<(f64, f64)>, npt: usize) -> Result<Self> {
        let (lo, hi) = extent.unwrap_or((0.0, 1.0));
        let hi = if hi > lo { hi } else { lo + 1e-9 * lo.abs().max(1.0) };
        Self::new(lo, hi, npt)
    }

    pub(crate) fn len(&self) -> usize {
        self.npt
    }

    /// Bin holding `x`; the upper edge belongs to the last bin.
    #[inline]
    pub(crate) fn index(&self, x: f64) -> Option<usize> {
        if x < self.lo || x > self.hi || x.is_nan() {
            return None;
        }
        Some((((x - self.lo) / self.width) as usize).min(self.npt - 1))
    }

    pub(crate) fn centers(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.npt, |i| self.lo + (i as f64 + 0.5) * self.width)
    }
}

/// Per-bin signal sums and pixel counts.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Histogram {
    pub(crate) sum: Vec<f64>,
    pub(crate) count: Vec<f64>,
}

impl Histogram {
    pub(crate) fn zeros(len: usize) -> Self {
        Self {
            sum: vec![0.0; len],
            count: vec![0.0; len],
        }
    }

    #[inline]
    fn add(&mut self, bin: usize, value: f64) {
        self.sum[bin] += value;
        self.count[bin] += 1.0;
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        for (a, b) in self.sum.iter_mut().zip(&other.sum) {
            *a += b;
        }
        for (a, b) in self.count.iter_mut().zip(&other.count) {
            *a += b;
        }
    }

    /// Accumulates every pixel of a `rows x cols` image.
    ///
    /// `sample(i, j)` returns the flat bin and corrected value of pixel
    /// `(i, j)`, or `None` to skip it.
    pub(crate) fn accumulate<F>(rows: usize, cols: usize, len: usize, sample: F) -> Self
    where
        F: Fn(usize, usize) -> Option<(usize, f64)> + Sync,
    {
        let partials: Vec<Self> = (0..rows.div_ceil(ROWS_PER_TASK))
            .into_par_iter()
            .map(|task| {
                let mut hist = Self::zeros(len);
                let end = ((task + 1) * ROWS_PER_TASK).min(rows);
                for i in task * ROWS_PER_TASK..end {
                    for j in 0..cols {
                        if let Some((bin, value)) = sample(i, j) {
                            hist.add(bin, value);
                        }
                    }
                }
                hist
            })
            .collect();

        let mut total = Self::zeros(len);
        for partial in &partials {
            total.merge(partial);
        }
        total
    }
}
