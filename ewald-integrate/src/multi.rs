//! Composite integration of several images into one shared binning.

use crate::azimuthal::{AzimuthalIntegrator, Integrate1dResult, SourceOptions};
use crate::histogram::{Bins, Histogram};
use ewald_core::{Error, RadialUnit, Result};
use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Settings shared by every geometry of a [`MultiGeometry`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiGeometryArgs {
    pub unit: RadialUnit,
    /// Radial range in `unit`.
    pub radial_range: (f64, f64),
    /// Accepted χ range in degrees.
    pub azimuth_range: (f64, f64),
    /// Overrides the wavelength of every member integrator.
    pub wavelength: Option<f64>,
    /// Intensity reported for bins no pixel fell into.
    pub empty: f64,
}

impl Default for MultiGeometryArgs {
    fn default() -> Self {
        Self {
            unit: RadialUnit::TwoThetaDeg,
            radial_range: (0.0, 180.0),
            azimuth_range: (-180.0, 180.0),
            wavelength: Some(1e-10),
            empty: 0.0,
        }
    }
}

impl MultiGeometryArgs {
    #[must_use]
    pub fn with_unit(mut self, unit: RadialUnit) -> Self {
        self.unit = unit;
        self
    }

    #[must_use]
    pub fn with_radial_range(mut self, lo: f64, hi: f64) -> Self {
        self.radial_range = (lo, hi);
        self
    }

    #[must_use]
    pub fn with_azimuth_range(mut self, lo: f64, hi: f64) -> Self {
        self.azimuth_range = (lo, hi);
        self
    }

    #[must_use]
    pub fn with_wavelength(mut self, wavelength: Option<f64>) -> Self {
        self.wavelength = wavelength;
        self
    }

    #[must_use]
    pub fn with_empty(mut self, empty: f64) -> Self {
        self.empty = empty;
        self
    }
}

/// Per-call options for [`MultiGeometry::integrate1d`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiIntegrateArgs {
    pub npt: usize,
    pub correct_solid_angle: bool,
    pub polarization_factor: Option<f64>,
}

impl Default for MultiIntegrateArgs {
    fn default() -> Self {
        Self {
            npt: 1800,
            correct_solid_angle: true,
            polarization_factor: None,
        }
    }
}

impl MultiIntegrateArgs {
    #[must_use]
    pub fn with_npt(mut self, npt: usize) -> Self {
        self.npt = npt;
        self
    }

    #[must_use]
    pub fn with_correct_solid_angle(mut self, value: bool) -> Self {
        self.correct_solid_angle = value;
        self
    }

    #[must_use]
    pub fn with_polarization_factor(mut self, factor: Option<f64>) -> Self {
        self.polarization_factor = factor;
        self
    }
}

/// Composite integrator over several detector geometries.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiGeometry {
    integrators: Vec<AzimuthalIntegrator>,
    args: MultiGeometryArgs,
}

impl Default for MultiGeometry {
    fn default() -> Self {
        Self::new(Vec::new(), MultiGeometryArgs::default())
    }
}

impl MultiGeometry {
    /// Builds a composite integrator. Member integrators keep their cached
    /// pixel geometry.
    #[must_use]
    pub fn new(mut integrators: Vec<AzimuthalIntegrator>, args: MultiGeometryArgs) -> Self {
        if let Some(wavelength) = args.wavelength {
            for ai in &mut integrators {
                ai.set_wavelength(wavelength);
            }
        }
        Self { integrators, args }
    }

    #[must_use]
    pub fn integrators(&self) -> &[AzimuthalIntegrator] {
        &self.integrators
    }

    #[must_use]
    pub fn args(&self) -> &MultiGeometryArgs {
        &self.args
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.integrators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.integrators.is_empty()
    }

    /// Wavelength used for unit conversion: the override, or the first
    /// member's wavelength.
    #[must_use]
    pub fn wavelength(&self) -> Option<f64> {
        self.args
            .wavelength
            .or_else(|| self.integrators.first().map(AzimuthalIntegrator::wavelength))
    }

    /// Integrates `images[k]` with `integrators[k]` into one profile.
    ///
    /// `masks` must have one entry per image. Each image is divided by its
    /// entry of `normalization_factors` when given.
    ///
    /// # Errors
    /// Returns [`Error::Engine`] if the list lengths differ from the number
    /// of geometries, or for any per-image failure of the underlying
    /// integrator.
    pub fn integrate1d(
        &self,
        images: &[ArrayView2<'_, f64>],
        masks: &[Option<ArrayView2<'_, bool>>],
        normalization_factors: Option<&[f64]>,
        args: &MultiIntegrateArgs,
    ) -> Result<Integrate1dResult> {
        let n = self.integrators.len();
        if images.len() != n || masks.len() != n {
            return Err(Error::Engine(format!(
                "expected {n} images and masks, got {} and {}",
                images.len(),
                masks.len()
            )));
        }
        if let Some(factors) = normalization_factors {
            if factors.len() != n {
                return Err(Error::Engine(format!(
                    "expected {n} normalization factors, got {}",
                    factors.len()
                )));
            }
        }

        let (lo, hi) = self.args.radial_range;
        let bins = Bins::new(lo, hi, args.npt)?;

        let partials: Vec<Histogram> = self
            .integrators
            .par_iter()
            .zip(images.par_iter())
            .zip(masks.par_iter())
            .enumerate()
            .map(|(k, ((ai, image), mask))| {
                let options = SourceOptions {
                    unit: self.args.unit,
                    correct_solid_angle: args.correct_solid_angle,
                    polarization_factor: args.polarization_factor,
                    normalization_factor: normalization_factors.map_or(1.0, |f| f[k]),
                    dummy: None,
                    delta_dummy: None,
                    azimuth_range: Some(self.args.azimuth_range),
                };
                let source = ai.source(*image, *mask, &options)?;
                let (rows, cols) = source.dim();
                Ok(Histogram::accumulate(rows, cols, bins.len(), |i, j| {
                    let (x, _, value) = source.sample(i, j)?;
                    Some((bins.index(x)?, value))
                }))
            })
            .collect::<Result<_>>()?;

        let mut total = Histogram::zeros(bins.len());
        for partial in &partials {
            total.merge(partial);
        }
        Ok(Integrate1dResult::from_histogram(
            &bins,
            self.args.unit,
            total,
            self.args.empty,
        ))
    }
}
