//! ewald-io: Persistence for ewald data.
//!
//! Everything is written against the [`Store`] trait, a tree of named
//! groups and datasets. Two backends are provided:
//! - **`MemoryStore`** - an in-memory tree, always available
//! - **HDF5** - any `hdf5::Group`, behind the `hdf5` feature
//!

mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5_store;
pub mod memory;
pub mod persist;
pub mod store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use persist::Persist;
pub use store::{Store, Value};
