//! Azimuthal integration of a single detector image.
#![allow(clippy::float_cmp)]

use crate::geometry::{polarization, PixelGeometry};
use crate::histogram::{Bins, Histogram};
use ewald_core::units::check_wavelength;
use ewald_core::{div0, Error, Poni, RadialUnit, Result};
use ndarray::{Array1, Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Integrator options that affect the pixel geometry itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Place the χ discontinuity at 0 (χ in `[0, 360)`) instead of ±180.
    pub chi_disc_at_zero: bool,
}

impl IntegratorConfig {
    #[must_use]
    pub fn with_chi_disc_at_zero(mut self, value: bool) -> Self {
        self.chi_disc_at_zero = value;
        self
    }
}

/// Options for [`AzimuthalIntegrator::integrate1d`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Integrate1dArgs {
    /// Number of radial bins.
    pub npt: usize,
    /// Radial range in `unit`; the data extent when `None`.
    pub radial_range: Option<(f64, f64)>,
    pub unit: RadialUnit,
    /// Accepted χ range in degrees.
    pub azimuth_range: Option<(f64, f64)>,
    pub correct_solid_angle: bool,
    pub polarization_factor: Option<f64>,
    /// Pixel value marking "no data".
    pub dummy: Option<f64>,
    /// Tolerance around `dummy`.
    pub delta_dummy: Option<f64>,
}

impl Default for Integrate1dArgs {
    fn default() -> Self {
        Self {
            npt: 10_000,
            radial_range: Some((0.0, 180.0)),
            unit: RadialUnit::TwoThetaDeg,
            azimuth_range: None,
            correct_solid_angle: true,
            polarization_factor: None,
            dummy: None,
            delta_dummy: None,
        }
    }
}

impl Integrate1dArgs {
    #[must_use]
    pub fn with_npt(mut self, npt: usize) -> Self {
        self.npt = npt;
        self
    }

    #[must_use]
    pub fn with_radial_range(mut self, range: Option<(f64, f64)>) -> Self {
        self.radial_range = range;
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: RadialUnit) -> Self {
        self.unit = unit;
        self
    }

    #[must_use]
    pub fn with_azimuth_range(mut self, range: Option<(f64, f64)>) -> Self {
        self.azimuth_range = range;
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

    #[must_use]
    pub fn with_dummy(mut self, dummy: Option<f64>, delta_dummy: Option<f64>) -> Self {
        self.dummy = dummy;
        self.delta_dummy = delta_dummy;
        self
    }
}

/// Options for [`AzimuthalIntegrator::integrate2d`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Integrate2dArgs {
    pub npt_rad: usize,
    pub npt_azim: usize,
    pub radial_range: Option<(f64, f64)>,
    /// χ range in degrees; the full circle when `None`.
    pub azimuth_range: Option<(f64, f64)>,
    pub unit: RadialUnit,
    pub correct_solid_angle: bool,
    pub polarization_factor: Option<f64>,
    pub dummy: Option<f64>,
    pub delta_dummy: Option<f64>,
}

impl Default for Integrate2dArgs {
    fn default() -> Self {
        Self {
            npt_rad: 100,
            npt_azim: 360,
            radial_range: None,
            azimuth_range: None,
            unit: RadialUnit::TwoThetaDeg,
            correct_solid_angle: true,
            polarization_factor: None,
            dummy: None,
            delta_dummy: None,
        }
    }
}

/// Radial profile returned by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Integrate1dResult {
    /// Bin centres in `unit`.
    pub radial: Array1<f64>,
    pub unit: RadialUnit,
    /// Sum of corrected pixel values per bin.
    pub sum_signal: Array1<f64>,
    /// Number of pixels per bin.
    pub count: Array1<f64>,
    pub intensity: Array1<f64>,
}

impl Integrate1dResult {
    pub(crate) fn from_histogram(bins: &Bins, unit: RadialUnit, hist: Histogram, empty: f64) -> Self {
        let sum_signal = Array1::from(hist.sum);
        let count = Array1::from(hist.count);
        let intensity = Zip::from(&sum_signal)
            .and(&count)
            .map_collect(|&s, &c| if c > 0.0 { div0(s, c) } else { empty });
        Self {
            radial: bins.centers(),
            unit,
            sum_signal,
            count,
            intensity,
        }
    }
}

/// Cake (χ × radial) returned by the engine; 2D arrays are
/// `(npt_azim, npt_rad)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Integrate2dResult {
    pub radial: Array1<f64>,
    /// χ bin centres in degrees.
    pub azimuthal: Array1<f64>,
    pub unit: RadialUnit,
    pub sum_signal: Array2<f64>,
    pub count: Array2<f64>,
    pub intensity: Array2<f64>,
}

/// Per-pixel corrections and filters shared by the 1D, 2D and
/// multi-geometry paths.
pub(crate) struct PixelSource<'a, 'm> {
    pub(crate) image: ArrayView2<'a, f64>,
    pub(crate) mask: Option<ArrayView2<'m, bool>>,
    /// Radial position of each pixel in the requested unit.
    pub(crate) radial: Array2<f64>,
    /// χ of each pixel in degrees.
    pub(crate) chi_deg: Array2<f64>,
    /// Divisor applied to each pixel value.
    pub(crate) correction: Array2<f64>,
    pub(crate) dummy: Option<(f64, f64)>,
    pub(crate) azimuth_range: Option<(f64, f64)>,
}

impl PixelSource<'_, '_> {
    /// Radial position, χ and corrected value of a contributing pixel.
    #[inline]
    pub(crate) fn sample(&self, i: usize, j: usize) -> Option<(f64, f64, f64)> {
        if self.mask.is_some_and(|m| m[[i, j]]) {
            return None;
        }
        let value = self.image[[i, j]];
        if !value.is_finite() {
            return None;
        }
        if let Some((dummy, delta)) = self.dummy {
            if (value - dummy).abs() <= delta {
                return None;
            }
        }
        let chi = self.chi_deg[[i, j]];
        if let Some((lo, hi)) = self.azimuth_range {
            if chi < lo || chi > hi {
                return None;
            }
        }
        let correction = self.correction[[i, j]];
        if correction == 0.0 || !correction.is_finite() {
            return None;
        }
        Some((self.radial[[i, j]], chi, value / correction))
    }

    /// Min and max radial position over contributing pixels.
    pub(crate) fn radial_extent(&self) -> Option<(f64, f64)> {
        let (rows, cols) = self.image.dim();
        let mut extent: Option<(f64, f64)> = None;
        for i in 0..rows {
            for j in 0..cols {
                if let Some((x, _, _)) = self.sample(i, j) {
                    extent = Some(extent.map_or((x, x), |(lo, hi)| (lo.min(x), hi.max(x))));
                }
            }
        }
        extent
    }

    pub(crate) fn dim(&self) -> (usize, usize) {
        self.image.dim()
    }
}

/// Pixel options common to every integration call.
pub(crate) struct SourceOptions {
    pub(crate) unit: RadialUnit,
    pub(crate) correct_solid_angle: bool,
    pub(crate) polarization_factor: Option<f64>,
    pub(crate) normalization_factor: f64,
    pub(crate) dummy: Option<f64>,
    pub(crate) delta_dummy: Option<f64>,
    pub(crate) azimuth_range: Option<(f64, f64)>,
}

/// Azimuthal integrator bound to one detector geometry.
///
/// The per-pixel geometry is computed on first use for a given image shape
/// and cached. Clones share the cached geometry.
#[derive(Debug)]
pub struct AzimuthalIntegrator {
    poni: Poni,
    config: IntegratorConfig,
    cache: Mutex<Option<Arc<PixelGeometry>>>,
}

impl Clone for AzimuthalIntegrator {
    fn clone(&self) -> Self {
        Self {
            poni: self.poni.clone(),
            config: self.config.clone(),
            cache: Mutex::new(self.cached()),
        }
    }
}

/// Integrators compare by geometry and configuration, not by cache state.
impl PartialEq for AzimuthalIntegrator {
    fn eq(&self, other: &Self) -> bool {
        self.poni == other.poni && self.config == other.config
    }
}

impl AzimuthalIntegrator {
    #[must_use]
    pub fn new(poni: Poni, config: IntegratorConfig) -> Self {
        Self {
            poni,
            config,
            cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn poni(&self) -> &Poni {
        &self.poni
    }

    #[must_use]
    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Wavelength in metres.
    #[must_use]
    pub fn wavelength(&self) -> f64 {
        self.poni.wavelength
    }

    /// Replaces the wavelength. The pixel geometry does not depend on it,
    /// so the cache is kept.
    pub fn set_wavelength(&mut self, wavelength: f64) {
        self.poni.wavelength = wavelength;
    }

    fn cached(&self) -> Option<Arc<PixelGeometry>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pixel geometry for images of `shape`, computed on first use.
    ///
    /// # Errors
    /// Returns [`Error::Engine`] if the detector has a fixed shape that
    /// differs from `shape`.
    pub fn geometry(&self, shape: (usize, usize)) -> Result<Arc<PixelGeometry>> {
        if let Some([rows, cols]) = self.poni.detector.max_shape {
            if (rows, cols) != shape {
                return Err(Error::Engine(format!(
                    "image shape {shape:?} does not match detector {} shape ({rows}, {cols})",
                    self.poni.detector.name
                )));
            }
        }

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(geometry) = cache.as_ref().filter(|g| g.shape() == shape) {
            return Ok(Arc::clone(geometry));
        }
        log::debug!(
            "computing pixel geometry for {}x{} image (dist={}, detector={})",
            shape.0,
            shape.1,
            self.poni.dist,
            self.poni.detector.name
        );
        let geometry = Arc::new(PixelGeometry::compute(
            &self.poni,
            shape,
            self.config.chi_disc_at_zero,
        ));
        *cache = Some(Arc::clone(&geometry));
        Ok(geometry)
    }

    /// Momentum transfer of every pixel in Å⁻¹.
    ///
    /// # Errors
    /// Returns [`Error::Engine`] for a non-positive wavelength or a shape
    /// rejected by [`AzimuthalIntegrator::geometry`].
    pub fn q_map(&self, shape: (usize, usize)) -> Result<Array2<f64>> {
        let wavelength = self.checked_wavelength(RadialUnit::QInvAngstrom)?;
        Ok(self.geometry(shape)?.radial(RadialUnit::QInvAngstrom, wavelength))
    }

    fn checked_wavelength(&self, unit: RadialUnit) -> Result<f64> {
        match unit {
            RadialUnit::TwoThetaDeg => Ok(self.poni.wavelength),
            RadialUnit::QInvAngstrom => check_wavelength(self.poni.wavelength)
                .map_err(|e| Error::Engine(e.to_string())),
        }
    }

    pub(crate) fn source<'a, 'm>(
        &self,
        image: ArrayView2<'a, f64>,
        mask: Option<ArrayView2<'m, bool>>,
        options: &SourceOptions,
    ) -> Result<PixelSource<'a, 'm>> {
        if let Some(mask) = mask {
            if mask.dim() != image.dim() {
                return Err(Error::Engine(format!(
                    "mask shape {:?} does not match image shape {:?}",
                    mask.shape(),
                    image.shape()
                )));
            }
        }
        if !(options.normalization_factor.is_finite() && options.normalization_factor > 0.0) {
            return Err(Error::Engine(format!(
                "normalization factor must be positive, got {}",
                options.normalization_factor
            )));
        }
        let wavelength = self.checked_wavelength(options.unit)?;
        let geometry = self.geometry(image.dim())?;

        let mut correction = if options.correct_solid_angle {
            geometry.solid_angle().clone()
        } else {
            Array2::ones(image.dim())
        };
        if let Some(factor) = options.polarization_factor {
            Zip::from(&mut correction)
                .and(geometry.tth())
                .and(geometry.chi())
                .for_each(|c, &tth, &chi| *c *= polarization(tth, chi, factor));
        }
        correction *= options.normalization_factor;

        Ok(PixelSource {
            image,
            mask,
            radial: geometry.radial(options.unit, wavelength),
            chi_deg: geometry.chi().mapv(f64::to_degrees),
            correction,
            dummy: options
                .dummy
                .map(|d| (d, options.delta_dummy.unwrap_or(0.0))),
            azimuth_range: options.azimuth_range,
        })
    }

    /// Integrates `image` into a radial profile.
    ///
    /// `mask` marks excluded pixels with `true`. Each pixel value is
    /// divided by its solid angle (optional), polarization (optional) and
    /// `normalization_factor` before binning.
    ///
    /// # Errors
    /// Returns [`Error::Engine`] for shape mismatches, `npt == 0`, an
    /// inverted range, a non-positive normalization factor or a q unit
    /// without a valid wavelength.
    pub fn integrate1d(
        &self,
        image: ArrayView2<'_, f64>,
        mask: Option<ArrayView2<'_, bool>>,
        args: &Integrate1dArgs,
        normalization_factor: Option<f64>,
    ) -> Result<Integrate1dResult> {
        let options = SourceOptions {
            unit: args.unit,
            correct_solid_angle: args.correct_solid_angle,
            polarization_factor: args.polarization_factor,
            normalization_factor: normalization_factor.unwrap_or(1.0),
            dummy: args.dummy,
            delta_dummy: args.delta_dummy,
            azimuth_range: args.azimuth_range,
        };
        let source = self.source(image, mask, &options)?;
        let bins = match args.radial_range {
            Some((lo, hi)) => Bins::new(lo, hi, args.npt)?,
            None => Bins::spanning(source.radial_extent(), args.npt)?,
        };

        let (rows, cols) = source.dim();
        let hist = Histogram::accumulate(rows, cols, bins.len(), |i, j| {
            let (x, _, value) = source.sample(i, j)?;
            Some((bins.index(x)?, value))
        });
        Ok(Integrate1dResult::from_histogram(&bins, args.unit, hist, 0.0))
    }

    /// Integrates `image` into a (χ, radial) cake.
    ///
    /// # Errors
    /// Same conditions as [`AzimuthalIntegrator::integrate1d`].
    pub fn integrate2d(
        &self,
        image: ArrayView2<'_, f64>,
        mask: Option<ArrayView2<'_, bool>>,
        args: &Integrate2dArgs,
    ) -> Result<Integrate2dResult> {
        let options = SourceOptions {
            unit: args.unit,
            correct_solid_angle: args.correct_solid_angle,
            polarization_factor: args.polarization_factor,
            normalization_factor: 1.0,
            dummy: args.dummy,
            delta_dummy: args.delta_dummy,
            azimuth_range: args.azimuth_range,
        };
        let source = self.source(image, mask, &options)?;
        let radial_bins = match args.radial_range {
            Some((lo, hi)) => Bins::new(lo, hi, args.npt_rad)?,
            None => Bins::spanning(source.radial_extent(), args.npt_rad)?,
        };
        let (chi_lo, chi_hi) = args.azimuth_range.unwrap_or(if self.config.chi_disc_at_zero {
            (0.0, 360.0)
        } else {
            (-180.0, 180.0)
        });
        let chi_bins = Bins::new(chi_lo, chi_hi, args.npt_azim)?;

        let (rows, cols) = source.dim();
        let npt_rad = radial_bins.len();
        let hist = Histogram::accumulate(rows, cols, chi_bins.len() * npt_rad, |i, j| {
            let (x, chi, value) = source.sample(i, j)?;
            Some((chi_bins.index(chi)? * npt_rad + radial_bins.index(x)?, value))
        });

        let shape = (chi_bins.len(), npt_rad);
        let to_2d = |v: Vec<f64>| {
            Array2::from_shape_vec(shape, v).map_err(|e| Error::Engine(e.to_string()))
        };
        let sum_signal = to_2d(hist.sum)?;
        let count = to_2d(hist.count)?;
        let intensity = Zip::from(&sum_signal)
            .and(&count)
            .map_collect(|&s, &c| div0(s, c));
        Ok(Integrate2dResult {
            radial: radial_bins.centers(),
            azimuthal: chi_bins.centers(),
            unit: args.unit,
            sum_signal,
            count,
            intensity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ewald_core::{tth_to_q, Detector};

    fn integrator() -> AzimuthalIntegrator {
        let poni = Poni::default()
            .with_dist(0.1)
            .with_poni(5.5e-4, 5.5e-4)
            .with_detector(Detector::generic(1e-4, 1e-4));
        AzimuthalIntegrator::new(poni, IntegratorConfig::default())
    }

    fn flat_args() -> Integrate1dArgs {
        Integrate1dArgs::default()
            .with_npt(20)
            .with_radial_range(None)
            .with_correct_solid_angle(false)
    }

    #[test]
    fn test_flat_image_gives_flat_profile() {
        let ai = integrator();
        let image = Array2::from_elem((11, 11), 3.0);
        let result = ai.integrate1d(image.view(), None, &flat_args(), None).unwrap();

        assert_eq!(result.radial.len(), 20);
        assert_relative_eq!(result.count.sum(), 121.0);
        assert_relative_eq!(result.sum_signal.sum(), 363.0, max_relative = 1e-12);
        for (&c, &i) in result.count.iter().zip(result.intensity.iter()) {
            if c > 0.0 {
                assert_relative_eq!(i, 3.0, max_relative = 1e-12);
            } else {
                assert_eq!(i, 0.0);
            }
        }
    }

    fn counted<'a, 'm>(
        ai: &AzimuthalIntegrator,
        image: ArrayView2<'a, f64>,
        mask: ArrayView2<'m, bool>,
    ) -> (f64, f64) {
        let one = ai
            .integrate1d(image, Some(mask), &flat_args(), None)
            .unwrap();
        let two = ai
            .integrate2d(image, Some(mask), &Integrate2dArgs::default())
            .unwrap();
        (one.count.sum(), two.count.sum())
    }

    #[test]
    fn test_image_and_mask_borrowed_separately() {
        let ai = integrator();
        let image = Array2::from_elem((11, 11), 1.0);
        let counts = {
            let mut mask = Array2::from_elem((11, 11), false);
            mask[[5, 5]] = true;
            counted(&ai, image.view(), mask.view())
        };
        assert_relative_eq!(counts.0, 120.0);
        assert_relative_eq!(counts.1, 120.0);
    }

    #[test]
    fn test_mask_and_dummy_excluded() {
        let ai = integrator();
        let mut image = Array2::from_elem((11, 11), 1.0);
        image[[0, 0]] = -1.0;
        let mut mask = Array2::from_elem((11, 11), false);
        mask[[1, 1]] = true;
        let args = flat_args().with_dummy(Some(-1.0), None);
        let result = ai.integrate1d(image.view(), Some(mask.view()), &args, None).unwrap();
        assert_relative_eq!(result.count.sum(), 119.0);
    }

    #[test]
    fn test_normalization_factor() {
        let ai = integrator();
        let image = Array2::from_elem((11, 11), 4.0);
        let result = ai.integrate1d(image.view(), None, &flat_args(), Some(2.0)).unwrap();
        assert_relative_eq!(result.sum_signal.sum(), 242.0, max_relative = 1e-12);
        assert!(ai.integrate1d(image.view(), None, &flat_args(), Some(0.0)).is_err());
    }

    #[test]
    fn test_radial_range_filters_pixels() {
        let ai = integrator();
        let image = Array2::from_elem((11, 11), 1.0);
        // only the centre pixel lies below 0.05 deg
        let args = flat_args().with_npt(1).with_radial_range(Some((0.0, 0.05)));
        let result = ai.integrate1d(image.view(), None, &args, None).unwrap();
        assert_relative_eq!(result.count[0], 1.0);
    }

    #[test]
    fn test_q_unit_axis() {
        let ai = integrator();
        let image = Array2::from_elem((11, 11), 1.0);
        let args = flat_args().with_unit(RadialUnit::QInvAngstrom).with_npt(1);
        let result = ai.integrate1d(image.view(), None, &args, None).unwrap();
        let max_tth = ai.geometry((11, 11)).unwrap().tth().fold(0.0f64, |a, &b| a.max(b));
        let max_q = tth_to_q(max_tth.to_degrees(), ai.wavelength());
        assert_relative_eq!(result.radial[0], max_q / 2.0, max_relative = 1e-9);
    }

    #[test]
    fn test_q_unit_needs_wavelength() {
        let mut ai = integrator();
        ai.set_wavelength(0.0);
        let image = Array2::from_elem((11, 11), 1.0);
        let args = flat_args().with_unit(RadialUnit::QInvAngstrom);
        let err = ai.integrate1d(image.view(), None, &args, None).unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
    }

    #[test]
    fn test_shape_errors() {
        let ai = integrator();
        let image = Array2::from_elem((11, 11), 1.0);
        let mask = Array2::from_elem((10, 11), false);
        assert!(ai.integrate1d(image.view(), Some(mask.view()), &flat_args(), None).is_err());
        assert!(ai.integrate1d(image.view(), None, &flat_args().with_npt(0), None).is_err());
        let inverted = flat_args().with_radial_range(Some((10.0, 1.0)));
        assert!(ai.integrate1d(image.view(), None, &inverted, None).is_err());

        let fixed = AzimuthalIntegrator::new(
            Poni::default().with_detector(Detector::generic(1e-4, 1e-4).with_max_shape(4, 4)),
            IntegratorConfig::default(),
        );
        assert!(matches!(fixed.geometry((11, 11)), Err(Error::Engine(_))));
    }

    #[test]
    fn test_azimuth_range() {
        let ai = integrator();
        let image = Array2::from_elem((11, 11), 1.0);
        // upper half of the detector (axis 1 positive) has chi in (0, 180)
        let args = flat_args().with_azimuth_range(Some((1.0, 179.0)));
        let result = ai.integrate1d(image.view(), None, &args, None).unwrap();
        assert!(result.count.sum() > 0.0);
        assert!(result.count.sum() < 60.0);
    }

    #[test]
    fn test_clone_shares_geometry() {
        let ai = integrator();
        let first = ai.geometry((11, 11)).unwrap();
        let copy = ai.clone();
        assert!(Arc::ptr_eq(&first, &copy.geometry((11, 11)).unwrap()));
        assert_eq!(copy, ai);
        let other = copy.geometry((5, 5)).unwrap();
        assert_eq!(other.shape(), (5, 5));
    }

    #[test]
    fn test_integrate2d_shape() {
        let ai = integrator();
        let image = Array2::from_elem((11, 11), 2.0);
        let args = Integrate2dArgs {
            npt_rad: 8,
            npt_azim: 4,
            correct_solid_angle: false,
            ..Integrate2dArgs::default()
        };
        let result = ai.integrate2d(image.view(), None, &args).unwrap();
        assert_eq!(result.sum_signal.dim(), (4, 8));
        assert_eq!(result.azimuthal.len(), 4);
        assert_relative_eq!(result.count.sum(), 121.0);
        for (&c, &i) in result.count.iter().zip(result.intensity.iter()) {
            if c > 0.0 {
                assert_relative_eq!(i, 2.0, max_relative = 1e-12);
            }
        }
    }
}
