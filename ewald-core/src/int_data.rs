//! Integration result containers.
//!
//! `raw` and `pcount` hold the engine's summed signal and pixel counts as
//! sparse arrays; `norm` is always `div0(raw, pcount)`. Exactly one of
//! `ttheta` / `q` comes from the engine, the other is derived through the
//! wavelength (see [`crate::units::radial_axes`]).

use crate::arith::BinaryOp;
use crate::error::{Error, Result};
use crate::sparse::{SparseArray, SparseArray1, SparseArray2};
use crate::units::{radial_axes, RadialUnit};
use ndarray::{Array1, ArrayView1, ArrayView2, Dimension};

/// 1D integration result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntData1d {
    pub raw: Option<SparseArray1>,
    pub pcount: Option<SparseArray1>,
    pub norm: Option<SparseArray1>,
    /// Two-theta axis in degrees.
    pub ttheta: Option<Array1<f64>>,
    /// q axis in inverse angstrom.
    pub q: Option<Array1<f64>>,
}

impl IntData1d {
    /// Packages an engine result.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the radial axis, signal and count
    /// lengths differ, and [`Error::InvalidWavelength`] for a non-positive
    /// wavelength.
    pub fn from_result(
        radial: ArrayView1<'_, f64>,
        unit: RadialUnit,
        sum_signal: ArrayView1<'_, f64>,
        count: ArrayView1<'_, f64>,
        wavelength: Option<f64>,
    ) -> Result<Self> {
        check_same(&[radial.len()], sum_signal.shape())?;
        check_same(sum_signal.shape(), count.shape())?;

        let (ttheta, q) = radial_axes(radial, unit, wavelength)?;
        let raw = SparseArray1::from_dense(&sum_signal);
        let pcount = SparseArray1::from_dense(&count);
        let norm = raw.binary_op(&pcount, BinaryOp::Div)?;
        Ok(Self {
            raw: Some(raw),
            pcount: Some(pcount),
            norm: Some(norm),
            ttheta,
            q,
        })
    }

    /// Returns true if nothing has been integrated into this container.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_none() && self.pcount.is_none()
    }

    /// Folds another result into this running sum.
    ///
    /// `raw` and `pcount` are summed, `norm` is re-derived and the radial
    /// axes are taken from `other`. An empty `other` leaves `self` as is.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the profiles differ in length.
    pub fn accumulate(&mut self, other: &Self) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        let raw = sum(self.raw.as_ref(), other.raw.as_ref())?;
        let pcount = sum(self.pcount.as_ref(), other.pcount.as_ref())?;
        self.norm = ratio(raw.as_ref(), pcount.as_ref())?;
        self.raw = raw;
        self.pcount = pcount;
        self.ttheta.clone_from(&other.ttheta);
        self.q.clone_from(&other.q);
        Ok(())
    }
}

/// 2D integration result, binned over (χ, radial).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntData2d {
    pub raw: Option<SparseArray2>,
    pub pcount: Option<SparseArray2>,
    pub norm: Option<SparseArray2>,
    pub ttheta: Option<Array1<f64>>,
    pub q: Option<Array1<f64>>,
    /// Azimuthal axis in degrees.
    pub chi: Option<Array1<f64>>,
}

impl IntData2d {
    /// Packages a 2D engine result; arrays are shaped `(chi, radial)`.
    ///
    /// # Errors
    /// Same as [`IntData1d::from_result`], checked against
    /// `(chi.len(), radial.len())`.
    pub fn from_result(
        radial: ArrayView1<'_, f64>,
        unit: RadialUnit,
        chi: ArrayView1<'_, f64>,
        sum_signal: ArrayView2<'_, f64>,
        count: ArrayView2<'_, f64>,
        wavelength: Option<f64>,
    ) -> Result<Self> {
        check_same(&[chi.len(), radial.len()], sum_signal.shape())?;
        check_same(sum_signal.shape(), count.shape())?;

        let (ttheta, q) = radial_axes(radial, unit, wavelength)?;
        let raw = SparseArray2::from_dense(&sum_signal);
        let pcount = SparseArray2::from_dense(&count);
        let norm = raw.binary_op(&pcount, BinaryOp::Div)?;
        Ok(Self {
            raw: Some(raw),
            pcount: Some(pcount),
            norm: Some(norm),
            ttheta,
            q,
            chi: Some(chi.to_owned()),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_none() && self.pcount.is_none()
    }

    /// 2D counterpart of [`IntData1d::accumulate`]; also copies `chi`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the maps differ in shape.
    pub fn accumulate(&mut self, other: &Self) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        let raw = sum(self.raw.as_ref(), other.raw.as_ref())?;
        let pcount = sum(self.pcount.as_ref(), other.pcount.as_ref())?;
        self.norm = ratio(raw.as_ref(), pcount.as_ref())?;
        self.raw = raw;
        self.pcount = pcount;
        self.ttheta.clone_from(&other.ttheta);
        self.q.clone_from(&other.q);
        self.chi.clone_from(&other.chi);
        Ok(())
    }
}

fn check_same(expected: &[usize], found: &[usize]) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::shape_mismatch(expected, found))
    }
}

fn sum<D: Dimension>(
    acc: Option<&SparseArray<D>>,
    add: Option<&SparseArray<D>>,
) -> Result<Option<SparseArray<D>>> {
    match (acc, add) {
        (Some(a), Some(b)) => a.binary_op(b, BinaryOp::Add).map(Some),
        (None, b) => Ok(b.cloned()),
        (a, None) => Ok(a.cloned()),
    }
}

fn ratio<D: Dimension>(
    raw: Option<&SparseArray<D>>,
    pcount: Option<&SparseArray<D>>,
) -> Result<Option<SparseArray<D>>> {
    match (raw, pcount) {
        (Some(r), Some(p)) => r.binary_op(p, BinaryOp::Div).map(Some),
        _ => Ok(None),
    }
}
