//! HDF5-backed [`Store`] implementation.
//!
//! Float data is stored as `f64`, integer data as `i64` and text as
//! variable-length UTF-8 scalars. Any HDF5 group (including a file's
//! root group) can be used as a store.

use crate::store::{Store, Value};
use crate::{Error, Result};
use hdf5::types::{H5Type, TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{ArrayD, IxDyn};
use std::path::Path;
use std::str::FromStr;

/// Opens an HDF5 file for reading and writing, creating it if missing.
///
/// # Errors
/// Returns an error if the file cannot be opened or created.
pub fn open_file<P: AsRef<Path>>(path: P) -> Result<File> {
    Ok(File::append(path)?)
}

impl Store for Group {
    fn create_group(&self, name: &str) -> Result<Self> {
        Ok(Group::create_group(self, name)?)
    }

    fn group(&self, name: &str) -> Result<Self> {
        if !self.link_exists(name) {
            return Err(Error::NotFound(format!("group {name:?}")));
        }
        Ok(Group::group(self, name)?)
    }

    fn contains(&self, name: &str) -> bool {
        self.link_exists(name)
    }

    fn is_group(&self, name: &str) -> bool {
        self.link_exists(name) && Group::group(self, name).is_ok()
    }

    fn remove(&self, name: &str) -> Result<()> {
        if !self.link_exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(self.unlink(name)?)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut names = self.member_names()?;
        names.sort();
        Ok(names)
    }

    fn write(&self, name: &str, value: &Value) -> Result<()> {
        if self.link_exists(name) {
            self.unlink(name)?;
        }
        match value {
            Value::Float(array) => write_array(self, name, array),
            Value::Int(array) => write_array(self, name, array),
            Value::Text(text) => {
                let text = VarLenUnicode::from_str(text)
                    .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 text: {e}")))?;
                self.new_dataset::<VarLenUnicode>()
                    .shape(())
                    .create(name)?
                    .write_scalar(&text)?;
                Ok(())
            }
        }
    }

    fn read(&self, name: &str) -> Result<Value> {
        if !self.link_exists(name) {
            return Err(Error::NotFound(format!("dataset {name:?}")));
        }
        let dataset = self.dataset(name)?;
        match dataset.dtype()?.to_descriptor()? {
            TypeDescriptor::Float(_) => Ok(Value::Float(read_array(&dataset)?)),
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
                Ok(Value::Int(read_array(&dataset)?))
            }
            TypeDescriptor::VarLenUnicode | TypeDescriptor::VarLenAscii => {
                let text: VarLenUnicode = dataset.read_scalar()?;
                Ok(Value::Text(text.to_string()))
            }
            other => Err(Error::InvalidFormat(format!(
                "unsupported dataset type {other:?} for {name:?}"
            ))),
        }
    }
}

fn write_array<T: H5Type>(group: &Group, name: &str, array: &ArrayD<T>) -> Result<()> {
    if array.ndim() == 0 {
        if let Some(value) = array.first() {
            group.new_dataset::<T>().shape(()).create(name)?.write_scalar(value)?;
        }
        return Ok(());
    }
    let dataset = group
        .new_dataset::<T>()
        .shape(array.shape().to_vec())
        .create(name)?;
    if !array.is_empty() {
        dataset.write(array.view())?;
    }
    Ok(())
}

/// Zero-size datasets are materialized without an HDF5 read.
fn read_array<T: H5Type + Clone + Default>(dataset: &Dataset) -> Result<ArrayD<T>> {
    if dataset.size() == 0 {
        return Ok(ArrayD::default(IxDyn(&dataset.shape())));
    }
    Ok(dataset.read_dyn::<T>()?)
}
