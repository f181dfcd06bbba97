//! ewald-scan: Exposure and scan containers.
//!
//! This crate provides:
//! - **`Arch`** - one detector image with its geometry, mask, scan info and
//!   integration results
//! - **`Sphere`** - an ordered set of arches with by-arch aggregation,
//!   composite (multi-geometry) integration and persistence
//! - **`ScanTable`** - per-arch scan metadata
//!
//! Both containers are thread-safe. Persistence goes through any
//! [`ewald_io::Store`].
//!

pub mod arch;
mod error;
pub mod lock;
pub mod scan_table;
pub mod sphere;

pub use arch::{default_mask, Arch, ArchData, ArchInit, ArchStatus, IntegrationArgs};
pub use error::{Error, Result};
pub use lock::FileLock;
pub use scan_table::{ScanInfo, ScanTable};
pub use sphere::{AddArchOptions, MgiData, MultiGeoOutcome, SaveOptions, Sphere};
