//! Radial units and two-theta / q conversions.
//!
//! Wavelengths are in metres, two-theta in degrees and q in inverse
//! angstrom: `q = 4π / (λ·10¹⁰) · sin(2θ / 2)`.

use crate::error::{Error, Result};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Angstroms in one metre.
pub const ANGSTROM_PER_METRE: f64 = 1.0e10;

/// Radial unit an integration is binned in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadialUnit {
    /// Scattering angle 2θ in degrees.
    #[default]
    #[serde(rename = "2th_deg")]
    TwoThetaDeg,
    /// Momentum transfer q in Å⁻¹.
    #[serde(rename = "q_A^-1")]
    QInvAngstrom,
}

impl RadialUnit {
    /// pyFAI-style unit name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TwoThetaDeg => "2th_deg",
            Self::QInvAngstrom => "q_A^-1",
        }
    }

    /// Converts a scattering angle in radians into this unit.
    ///
    /// `wavelength` is only consulted for q.
    #[must_use]
    pub fn of_two_theta_rad(self, tth_rad: f64, wavelength: f64) -> f64 {
        match self {
            Self::TwoThetaDeg => tth_rad.to_degrees(),
            Self::QInvAngstrom => 4.0 * PI / (wavelength * ANGSTROM_PER_METRE) * (tth_rad / 2.0).sin(),
        }
    }
}

impl fmt::Display for RadialUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RadialUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "2th_deg" => Ok(Self::TwoThetaDeg),
            "q_A^-1" => Ok(Self::QInvAngstrom),
            other => Err(Error::Config(format!("unsupported radial unit {other:?}"))),
        }
    }
}

/// Checks that a wavelength can be used for unit conversion.
///
/// # Errors
/// Returns [`Error::InvalidWavelength`] for non-positive or non-finite values.
pub fn check_wavelength(wavelength: f64) -> Result<f64> {
    if wavelength.is_finite() && wavelength > 0.0 {
        Ok(wavelength)
    } else {
        Err(Error::InvalidWavelength(format!(
            "{wavelength} (must be a positive length in metres)"
        )))
    }
}

/// Two-theta (degrees) to q (Å⁻¹).
#[must_use]
pub fn tth_to_q(tth_deg: f64, wavelength: f64) -> f64 {
    4.0 * PI / (wavelength * ANGSTROM_PER_METRE) * (tth_deg / 2.0).to_radians().sin()
}

/// q (Å⁻¹) to two-theta (degrees).
#[must_use]
pub fn q_to_tth(q: f64, wavelength: f64) -> f64 {
    2.0 * (q * wavelength * ANGSTROM_PER_METRE / (4.0 * PI))
        .asin()
        .to_degrees()
}

/// Derives both radial axes from the engine's native axis.
///
/// Returns `(ttheta, q)`. Without a wavelength only the native axis is
/// populated.
///
/// # Errors
/// Returns [`Error::InvalidWavelength`] if a wavelength is given but is
/// not positive.
pub fn radial_axes(
    radial: ArrayView1<'_, f64>,
    unit: RadialUnit,
    wavelength: Option<f64>,
) -> Result<(Option<Array1<f64>>, Option<Array1<f64>>)> {
    let Some(wavelength) = wavelength else {
        return Ok(match unit {
            RadialUnit::TwoThetaDeg => (Some(radial.to_owned()), None),
            RadialUnit::QInvAngstrom => (None, Some(radial.to_owned())),
        });
    };
    let wavelength = check_wavelength(wavelength)?;

    Ok(match unit {
        RadialUnit::TwoThetaDeg => {
            let q = radial.mapv(|t| tth_to_q(t, wavelength));
            (Some(radial.to_owned()), Some(q))
        }
        RadialUnit::QInvAngstrom => {
            let tth = radial.mapv(|q| q_to_tth(q, wavelength));
            (Some(tth), Some(radial.to_owned()))
        }
    })
}
