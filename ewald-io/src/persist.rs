//! Saving and loading ewald data types to a [`Store`].
//!
//! Layouts:
//! - sparse array: `data` (float), `shape` (int, `[ndim]`), `bounds`
//!   (int, `[ndim, 2]`)
//! - integrated data: optional `raw`, `pcount`, `norm` sparse groups plus
//!   optional `ttheta`, `q` (and `chi` for 2D) axes
//! - geometry: one dataset per key of [`Poni::to_config`], nested objects
//!   as subgroups
//!
//! Optional fields that are `None` are removed from the group on save, so a
//! reload always reproduces the saved value.

use crate::store::{Store, Value};
use crate::{Error, Result};
use ewald_core::{IntData1d, IntData2d, Poni, SparseArray};
use ndarray::{Array, Array1, Array2, Dimension};
use serde_json::{Map, Number};
use std::collections::BTreeMap;

/// Types that can be written to and rebuilt from a store group.
pub trait Persist: Sized {
    /// Writes `self` into `group`, overwriting existing entries.
    ///
    /// # Errors
    /// Fails if the store rejects a write.
    fn save<S: Store>(&self, group: &S) -> Result<()>;

    /// Rebuilds a value from `group`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for missing required entries and
    /// [`Error::InvalidFormat`] for malformed ones.
    fn load<S: Store>(group: &S) -> Result<Self>;
}

fn to_i64(n: usize) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::InvalidFormat(format!("{n} does not fit in i64")))
}

fn to_usize(n: i64) -> Result<usize> {
    usize::try_from(n).map_err(|_| Error::InvalidFormat(format!("negative size {n}")))
}

/// Removes `name` if present and creates it as an empty group.
///
/// # Errors
/// Fails if the store cannot remove or create the group.
pub fn replace_group<S: Store>(parent: &S, name: &str) -> Result<S> {
    if parent.contains(name) {
        parent.remove(name)?;
    }
    parent.create_group(name)
}

fn remove_if_present<S: Store>(group: &S, name: &str) -> Result<()> {
    if group.contains(name) {
        group.remove(name)?;
    }
    Ok(())
}

/// Writes a float array dataset.
///
/// # Errors
/// Fails if the store rejects the write.
pub fn write_array<S: Store, D: Dimension>(
    group: &S,
    name: &str,
    array: &Array<f64, D>,
) -> Result<()> {
    group.write(name, &Value::from(array.clone()))
}

/// Reads a float array dataset of a fixed rank.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] if the stored rank differs from `D`.
pub fn read_array<S: Store, D: Dimension>(group: &S, name: &str) -> Result<Array<f64, D>> {
    let array = group.read(name)?.into_float()?;
    let ndim = array.ndim();
    array
        .into_dimensionality::<D>()
        .map_err(|_| Error::InvalidFormat(format!("{name:?} has unexpected rank {ndim}")))
}

/// Like [`read_array`] but `None` when the dataset is absent.
///
/// # Errors
/// See [`read_array`].
pub fn read_array_opt<S: Store, D: Dimension>(
    group: &S,
    name: &str,
) -> Result<Option<Array<f64, D>>> {
    if group.contains(name) {
        read_array(group, name).map(Some)
    } else {
        Ok(None)
    }
}

/// Writes `array` when present and removes any stale dataset otherwise.
///
/// # Errors
/// Fails if the store rejects the write or removal.
pub fn write_array_opt<S: Store, D: Dimension>(
    group: &S,
    name: &str,
    array: Option<&Array<f64, D>>,
) -> Result<()> {
    match array {
        Some(array) => write_array(group, name, array),
        None => remove_if_present(group, name),
    }
}

/// Writes a boolean mask as an integer 0/1 dataset.
///
/// # Errors
/// Fails if the store rejects the write.
pub fn write_mask<S: Store>(group: &S, name: &str, mask: &Array2<bool>) -> Result<()> {
    group.write(name, &Value::from(mask.mapv(i64::from)))
}

/// Reads a mask written by [`write_mask`]; any non-zero entry is `true`.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for non-integer or non-2D data.
pub fn read_mask<S: Store>(group: &S, name: &str) -> Result<Array2<bool>> {
    let array = group.read(name)?.into_int()?;
    let ndim = array.ndim();
    let array = array
        .into_dimensionality::<ndarray::Ix2>()
        .map_err(|_| Error::InvalidFormat(format!("mask {name:?} has rank {ndim}")))?;
    Ok(array.mapv(|v: i64| v != 0))
}

/// Writes named scalars as 0-d datasets of a fresh subgroup.
///
/// # Errors
/// Fails if the store rejects a write.
pub fn write_scalars<S: Store>(
    group: &S,
    name: &str,
    scalars: &BTreeMap<String, f64>,
) -> Result<()> {
    let sub = replace_group(group, name)?;
    for (key, &value) in scalars {
        sub.write(key, &Value::scalar(value))?;
    }
    Ok(())
}

/// Reads a subgroup written by [`write_scalars`].
///
/// # Errors
/// Returns [`Error::NotFound`] if the subgroup is absent.
pub fn read_scalars<S: Store>(group: &S, name: &str) -> Result<BTreeMap<String, f64>> {
    let sub = group.group(name)?;
    sub.keys()?
        .into_iter()
        .map(|key| {
            let value = sub.read(&key)?.into_scalar()?;
            Ok((key, value))
        })
        .collect()
}

impl<D: Dimension> Persist for SparseArray<D> {
    fn save<S: Store>(&self, group: &S) -> Result<()> {
        let shape = self
            .shape()
            .iter()
            .map(|&n| to_i64(n))
            .collect::<Result<Vec<_>>>()?;
        let mut bounds = Array2::<i64>::zeros((self.ndim(), 2));
        for (axis, &(start, end)) in self.bounds().iter().enumerate() {
            bounds[[axis, 0]] = to_i64(start)?;
            bounds[[axis, 1]] = to_i64(end)?;
        }
        group.write("data", &Value::from(self.data().clone()))?;
        group.write("shape", &Value::from(Array1::from(shape)))?;
        group.write("bounds", &Value::from(bounds))
    }

    fn load<S: Store>(group: &S) -> Result<Self> {
        let data = group.read("data")?.into_float()?;
        let shape = group
            .read("shape")?
            .into_int()?
            .iter()
            .map(|&n| to_usize(n))
            .collect::<Result<Vec<_>>>()?;
        let bounds = group.read("bounds")?.into_int()?;
        if bounds.ndim() != 2 || bounds.shape()[1] != 2 {
            return Err(Error::InvalidFormat(format!(
                "bounds must have shape [ndim, 2], found {:?}",
                bounds.shape()
            )));
        }
        let bounds = bounds
            .outer_iter()
            .map(|row| Ok((to_usize(row[0])?, to_usize(row[1])?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_raw_parts(data, &shape, &bounds)?)
    }
}

fn save_sparse_opt<S: Store, D: Dimension>(
    group: &S,
    name: &str,
    array: Option<&SparseArray<D>>,
) -> Result<()> {
    match array {
        Some(array) => array.save(&replace_group(group, name)?),
        None => remove_if_present(group, name),
    }
}

fn load_sparse_opt<S: Store, D: Dimension>(
    group: &S,
    name: &str,
) -> Result<Option<SparseArray<D>>> {
    if group.contains(name) {
        SparseArray::load(&group.group(name)?).map(Some)
    } else {
        Ok(None)
    }
}

impl Persist for IntData1d {
    fn save<S: Store>(&self, group: &S) -> Result<()> {
        save_sparse_opt(group, "raw", self.raw.as_ref())?;
        save_sparse_opt(group, "pcount", self.pcount.as_ref())?;
        save_sparse_opt(group, "norm", self.norm.as_ref())?;
        write_array_opt(group, "ttheta", self.ttheta.as_ref())?;
        write_array_opt(group, "q", self.q.as_ref())
    }

    fn load<S: Store>(group: &S) -> Result<Self> {
        Ok(Self {
            raw: load_sparse_opt(group, "raw")?,
            pcount: load_sparse_opt(group, "pcount")?,
            norm: load_sparse_opt(group, "norm")?,
            ttheta: read_array_opt(group, "ttheta")?,
            q: read_array_opt(group, "q")?,
        })
    }
}

impl Persist for IntData2d {
    fn save<S: Store>(&self, group: &S) -> Result<()> {
        save_sparse_opt(group, "raw", self.raw.as_ref())?;
        save_sparse_opt(group, "pcount", self.pcount.as_ref())?;
        save_sparse_opt(group, "norm", self.norm.as_ref())?;
        write_array_opt(group, "ttheta", self.ttheta.as_ref())?;
        write_array_opt(group, "q", self.q.as_ref())?;
        write_array_opt(group, "chi", self.chi.as_ref())
    }

    fn load<S: Store>(group: &S) -> Result<Self> {
        Ok(Self {
            raw: load_sparse_opt(group, "raw")?,
            pcount: load_sparse_opt(group, "pcount")?,
            norm: load_sparse_opt(group, "norm")?,
            ttheta: read_array_opt(group, "ttheta")?,
            q: read_array_opt(group, "q")?,
            chi: read_array_opt(group, "chi")?,
        })
    }
}

/// Writes a JSON object as datasets and subgroups.
///
/// Numbers become scalars, strings become text, numeric arrays become 1D
/// datasets and objects become subgroups. `null` entries are skipped.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for arrays holding non-numbers.
pub fn write_object<S: Store>(group: &S, object: &Map<String, serde_json::Value>) -> Result<()> {
    use serde_json::Value as Json;
    for (key, value) in object {
        match value {
            Json::Null => remove_if_present(group, key)?,
            Json::Bool(b) => group.write(key, &Value::from(ndarray::arr0(i64::from(*b))))?,
            Json::Number(n) => match n.as_i64() {
                Some(i) => group.write(key, &Value::from(ndarray::arr0(i)))?,
                None => group.write(key, &Value::scalar(n.as_f64().unwrap_or(f64::NAN)))?,
            },
            Json::String(s) => group.write(key, &Value::Text(s.clone()))?,
            Json::Array(items) => {
                let ints: Option<Vec<i64>> = items.iter().map(Json::as_i64).collect();
                if let Some(ints) = ints {
                    group.write(key, &Value::from(Array1::from(ints)))?;
                } else {
                    let floats = items
                        .iter()
                        .map(|v| {
                            v.as_f64().ok_or_else(|| {
                                Error::InvalidFormat(format!("{key:?} holds a non-numeric item"))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    group.write(key, &Value::from(Array1::from(floats)))?;
                }
            }
            Json::Object(inner) => write_object(&replace_group(group, key)?, inner)?,
        }
    }
    Ok(())
}

fn float_json(x: f64) -> serde_json::Value {
    Number::from_f64(x).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn value_json(value: Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Text(s) => Json::String(s),
        Value::Float(a) if a.ndim() == 0 => a.first().copied().map_or(Json::Null, float_json),
        Value::Float(a) => Json::Array(a.iter().copied().map(float_json).collect()),
        Value::Int(a) if a.ndim() == 0 => a.first().copied().map_or(Json::Null, Json::from),
        Value::Int(a) => Json::Array(a.iter().copied().map(Json::from).collect()),
    }
}

/// Reads a group written by [`write_object`] back into a JSON object.
///
/// # Errors
/// Fails if any child cannot be read.
pub fn read_object<S: Store>(group: &S) -> Result<Map<String, serde_json::Value>> {
    let mut object = Map::new();
    for key in group.keys()? {
        let value = if group.is_group(&key) {
            serde_json::Value::Object(read_object(&group.group(&key)?)?)
        } else {
            value_json(group.read(&key)?)
        };
        object.insert(key, value);
    }
    Ok(object)
}

impl Persist for Poni {
    fn save<S: Store>(&self, group: &S) -> Result<()> {
        write_object(group, &self.to_config())
    }

    fn load<S: Store>(group: &S) -> Result<Self> {
        Ok(Self::from_config(&read_object(group)?)?)
    }
}
