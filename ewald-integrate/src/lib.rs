//! ewald-integrate: Azimuthal integration engine for area-detector images.
//!
//! This crate provides:
//! - **`PixelGeometry`** - per-pixel 2θ, χ, solid angle and lab positions
//! - **`AzimuthalIntegrator`** - 1D and 2D histogramming of one image
//! - **`MultiGeometry`** - composite 1D integration over several geometries
//!

pub mod azimuthal;
pub mod geometry;
mod histogram;
pub mod multi;

pub use azimuthal::{
    AzimuthalIntegrator, Integrate1dArgs, Integrate1dResult, Integrate2dArgs, Integrate2dResult,
    IntegratorConfig,
};
pub use geometry::PixelGeometry;
pub use multi::{MultiGeometry, MultiGeometryArgs, MultiIntegrateArgs};
