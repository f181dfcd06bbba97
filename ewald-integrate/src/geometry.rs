//! Per-pixel scattering geometry.
//!
//! Follows the pyFAI convention: axis 1 is the slow (row) axis, axis 2 the
//! fast (column) axis, and the beam travels along +3. Pixel centres are
//! shifted by the PONI offsets, then rotated by `rot1`, `rot2`, `rot3`
//! (around axes 1, 2, 3) into lab coordinates.
#![allow(clippy::cast_precision_loss, clippy::many_single_char_names)]

use ewald_core::{div0, Poni, RadialUnit};
use ndarray::{Array2, Array3};
use rayon::prelude::*;
use std::f64::consts::PI;

/// Lab-frame geometry of every pixel of one image shape.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelGeometry {
    /// Lab coordinates `(t1, t2, t3)` in metres, shape `(3, rows, cols)`.
    positions: Array3<f64>,
    /// Scattering angle 2θ in radians.
    tth: Array2<f64>,
    /// Azimuthal angle χ in radians.
    chi: Array2<f64>,
    /// Solid angle relative to a pixel at normal incidence.
    solid_angle: Array2<f64>,
}

/// Rotation matrix coefficients for `(d1, d2, dist) -> (t1, t2, t3)`.
struct Rotation {
    m: [[f64; 3]; 3],
}

impl Rotation {
    fn new(poni: &Poni) -> Self {
        let (s1, c1) = poni.rot1.sin_cos();
        let (s2, c2) = poni.rot2.sin_cos();
        let (s3, c3) = poni.rot3.sin_cos();
        Self {
            m: [
                [c2 * c3, c3 * s1 * s2 - c1 * s3, -(c1 * c3 * s2 + s1 * s3)],
                [c2 * s3, c1 * c3 + s1 * s2 * s3, -(c1 * s2 * s3 - c3 * s1)],
                [s2, -c2 * s1, c1 * c2],
            ],
        }
    }

    fn apply(&self, d1: f64, d2: f64, dist: f64) -> [f64; 3] {
        let m = &self.m;
        [
            m[0][0] * d1 + m[0][1] * d2 + m[0][2] * dist,
            m[1][0] * d1 + m[1][1] * d2 + m[1][2] * dist,
            m[2][0] * d1 + m[2][1] * d2 + m[2][2] * dist,
        ]
    }
}

impl PixelGeometry {
    /// Computes the geometry for an image of `shape = (rows, cols)`.
    ///
    /// With `chi_disc_at_zero` the azimuth lies in `[0, 2π)`, otherwise in
    /// `(-π, π]`.
    #[must_use]
    pub fn compute(poni: &Poni, shape: (usize, usize), chi_disc_at_zero: bool) -> Self {
        let (rows, cols) = shape;
        let rotation = Rotation::new(poni);
        let pixel1 = poni.detector.pixel1;
        let pixel2 = poni.detector.pixel2;

        // [t1, t2, t3, tth, chi, solid angle] per pixel, row-major
        let pixels: Vec<[f64; 6]> = (0..rows * cols)
            .into_par_iter()
            .map(|k| {
                let (i, j) = (k / cols, k % cols);
                let d1 = (i as f64 + 0.5) * pixel1 - poni.poni1;
                let d2 = (j as f64 + 0.5) * pixel2 - poni.poni2;
                let [t1, t2, t3] = rotation.apply(d1, d2, poni.dist);
                let r = (t1 * t1 + t2 * t2 + t3 * t3).sqrt();
                let tth = (t1 * t1 + t2 * t2).sqrt().atan2(t3);
                let mut chi = t1.atan2(t2);
                if chi_disc_at_zero && chi < 0.0 {
                    chi += 2.0 * PI;
                }
                let solid_angle = div0(t3, r).powi(3);
                [t1, t2, t3, tth, chi, solid_angle]
            })
            .collect();

        let at = |c: usize| Array2::from_shape_fn((rows, cols), |(i, j)| pixels[i * cols + j][c]);
        Self {
            positions: Array3::from_shape_fn((3, rows, cols), |(c, i, j)| pixels[i * cols + j][c]),
            tth: at(3),
            chi: at(4),
            solid_angle: at(5),
        }
    }

    /// Image shape `(rows, cols)` this geometry was computed for.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.tth.dim()
    }

    #[must_use]
    pub fn positions(&self) -> &Array3<f64> {
        &self.positions
    }

    /// 2θ in radians.
    #[must_use]
    pub fn tth(&self) -> &Array2<f64> {
        &self.tth
    }

    /// χ in radians.
    #[must_use]
    pub fn chi(&self) -> &Array2<f64> {
        &self.chi
    }

    #[must_use]
    pub fn solid_angle(&self) -> &Array2<f64> {
        &self.solid_angle
    }

    /// Distance from the sample to each pixel centre, metres.
    #[must_use]
    pub fn radius(&self) -> Array2<f64> {
        let (rows, cols) = self.shape();
        Array2::from_shape_fn((rows, cols), |(i, j)| {
            let p = &self.positions;
            (p[[0, i, j]].powi(2) + p[[1, i, j]].powi(2) + p[[2, i, j]].powi(2)).sqrt()
        })
    }

    /// Radial position of each pixel in `unit`.
    #[must_use]
    pub fn radial(&self, unit: RadialUnit, wavelength: f64) -> Array2<f64> {
        self.tth.mapv(|t| unit.of_two_theta_rad(t, wavelength))
    }

    /// Polarization correction for a beam with polarization factor `factor`.
    #[must_use]
    pub fn polarization(&self, factor: f64) -> Array2<f64> {
        ndarray::Zip::from(&self.tth)
            .and(&self.chi)
            .map_collect(|&tth, &chi| polarization(tth, chi, factor))
    }
}

/// `P = ½(1 + cos²2θ − f·cos2χ·sin²2θ)`.
#[inline]
pub(crate) fn polarization(tth: f64, chi: f64, factor: f64) -> f64 {
    let (s, c) = tth.sin_cos();
    0.5 * (1.0 + c * c - factor * (2.0 * chi).cos() * s * s)
}
