//! ewald-core: Core containers for X-ray scattering data reduction.
//!
//! This crate provides bounding-box sparse arrays with safe-division
//! arithmetic, radial unit conversions, the detector geometry descriptor
//! and the integration result containers shared by the engine, the store
//! codecs and the scan model.
//!

pub mod arith;
pub mod detector;
pub mod error;
pub mod int_data;
pub mod poni;
pub mod sparse;
pub mod units;

pub use arith::{div0, div0_array, div0_scalar, BinaryOp};
pub use detector::{Detector, DetectorConfig, DetectorFactory, DetectorRegistry};
pub use error::{Error, Result};
pub use int_data::{IntData1d, IntData2d};
pub use poni::Poni;
pub use sparse::{SparseArray, SparseArray1, SparseArray2};
pub use units::{q_to_tth, radial_axes, tth_to_q, RadialUnit};
