//! The hierarchical store contract.
//!
//! A store is a tree of named groups holding named datasets, like a
//! filesystem of arrays. Every persistence routine in ewald is written
//! against [`Store`] so any hierarchical container can back it.
#![allow(clippy::cast_precision_loss)]

use crate::{Error, Result};
use ndarray::{arr0, Array, ArrayD, Dimension};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A dataset value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
    Text(String),
}

impl Value {
    /// A 0-d float dataset.
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Self::Float(arr0(value).into_dyn())
    }

    /// Float view of the value; integer data is widened.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for text.
    pub fn into_float(self) -> Result<ArrayD<f64>> {
        match self {
            Self::Float(a) => Ok(a),
            Self::Int(a) => Ok(a.mapv(|v| v as f64)),
            Self::Text(_) => Err(Error::InvalidFormat("expected numeric data, found text".into())),
        }
    }

    /// # Errors
    /// Returns [`Error::InvalidFormat`] unless the value is integer data.
    pub fn into_int(self) -> Result<ArrayD<i64>> {
        match self {
            Self::Int(a) => Ok(a),
            _ => Err(Error::InvalidFormat("expected integer data".into())),
        }
    }

    /// # Errors
    /// Returns [`Error::InvalidFormat`] unless the value is text.
    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s),
            _ => Err(Error::InvalidFormat("expected text data".into())),
        }
    }

    /// Single float from a 0-d or one-element dataset.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for text or multi-element data.
    pub fn into_scalar(self) -> Result<f64> {
        let array = self.into_float()?;
        match array.len() {
            1 => array
                .iter()
                .next()
                .copied()
                .ok_or_else(|| Error::InvalidFormat("empty scalar".into())),
            n => Err(Error::InvalidFormat(format!("expected a scalar, found {n} elements"))),
        }
    }
}

impl<D: Dimension> From<Array<f64, D>> for Value {
    fn from(array: Array<f64, D>) -> Self {
        Self::Float(array.into_dyn())
    }
}

impl<D: Dimension> From<Array<i64, D>> for Value {
    fn from(array: Array<i64, D>) -> Self {
        Self::Int(array.into_dyn())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Hierarchical keyed container.
///
/// Handles are cheap to clone and refer to the same underlying group.
pub trait Store: Sized {
    /// Creates a new child group.
    ///
    /// # Errors
    /// Fails if `name` already exists.
    fn create_group(&self, name: &str) -> Result<Self>;

    /// Opens an existing child group.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no group called `name`.
    fn group(&self, name: &str) -> Result<Self>;

    /// Returns true if a group or dataset called `name` exists.
    fn contains(&self, name: &str) -> bool;

    /// Returns true if `name` exists and is a group.
    fn is_group(&self, name: &str) -> bool;

    /// Deletes a child group or dataset.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` does not exist.
    fn remove(&self, name: &str) -> Result<()>;

    /// Names of all children, sorted.
    ///
    /// # Errors
    /// Fails if the backing store cannot be listed.
    fn keys(&self) -> Result<Vec<String>>;

    /// Writes a dataset, replacing any existing one.
    ///
    /// # Errors
    /// Fails if the backing store rejects the write.
    fn write(&self, name: &str, value: &Value) -> Result<()>;

    /// Reads a dataset.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no dataset called `name`.
    fn read(&self, name: &str) -> Result<Value>;

    /// Opens `name`, creating it first if needed.
    ///
    /// # Errors
    /// Fails if the group can be neither opened nor created.
    fn require_group(&self, name: &str) -> Result<Self> {
        if self.contains(name) {
            self.group(name)
        } else {
            self.create_group(name)
        }
    }

    /// Reads a dataset if present.
    ///
    /// # Errors
    /// Fails if `name` exists but cannot be read.
    fn read_opt(&self, name: &str) -> Result<Option<Value>> {
        if self.contains(name) {
            self.read(name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Writes `value` as JSON text.
    ///
    /// # Errors
    /// Fails if serialization or the write fails.
    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.write(name, &Value::Text(serde_json::to_string(value)?))
    }

    /// Reads a JSON text dataset.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`], [`Error::InvalidFormat`] or
    /// [`Error::Json`].
    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let text = self.read(name)?.into_text()?;
        Ok(serde_json::from_str(&text)?)
    }
}
