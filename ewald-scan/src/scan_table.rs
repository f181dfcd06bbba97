//! Per-arch scan metadata table.

use crate::{Error, Result};
use ewald_io::persist::{read_array, write_array};
use ewald_io::{Persist, Store, Value};
use ndarray::Array1;
use std::collections::BTreeMap;

/// Named scalar channels recorded with one exposure (monitor counts, motor
/// positions).
pub type ScanInfo = BTreeMap<String, f64>;

/// Rows of scan metadata keyed by arch index.
///
/// The first inserted row fixes the column set; later rows must carry
/// exactly the same channels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanTable {
    columns: Vec<String>,
    rows: BTreeMap<usize, Vec<f64>>,
}

impl ScanTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Column names, sorted.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row indices in ascending order.
    #[must_use]
    pub fn index(&self) -> Vec<usize> {
        self.rows.keys().copied().collect()
    }

    /// Checks that `info` could be inserted without changing the columns.
    ///
    /// # Errors
    /// Returns [`Error::MismatchedColumns`] if the table already has columns
    /// and `info` has a different channel set.
    pub fn check(&self, info: &ScanInfo) -> Result<()> {
        if self.columns.is_empty() || self.columns.iter().eq(info.keys()) {
            Ok(())
        } else {
            Err(Error::MismatchedColumns {
                expected: self.columns.clone(),
                found: info.keys().cloned().collect(),
            })
        }
    }

    /// Inserts or replaces the row for `idx`.
    ///
    /// # Errors
    /// See [`ScanTable::check`]. The table is unchanged on error.
    pub fn insert(&mut self, idx: usize, info: &ScanInfo) -> Result<()> {
        self.check(info)?;
        if self.columns.is_empty() {
            self.columns = info.keys().cloned().collect();
        }
        self.rows.insert(idx, info.values().copied().collect());
        Ok(())
    }

    /// Removes the row for `idx`. Removing the last row clears the columns.
    pub fn remove(&mut self, idx: usize) -> Option<ScanInfo> {
        let row = self.row(idx);
        self.rows.remove(&idx);
        if self.rows.is_empty() {
            self.columns.clear();
        }
        row
    }

    /// The row for `idx` as a channel map.
    #[must_use]
    pub fn row(&self, idx: usize) -> Option<ScanInfo> {
        self.rows.get(&idx).map(|values| {
            self.columns
                .iter()
                .cloned()
                .zip(values.iter().copied())
                .collect()
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// One channel's value for `idx`.
    #[must_use]
    pub fn value(&self, idx: usize, name: &str) -> Option<f64> {
        let col = self.position(name)?;
        self.rows.get(&idx).map(|values| values[col])
    }

    /// A whole channel in index order.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Array1<f64>> {
        let col = self.position(name)?;
        Some(self.rows.values().map(|values| values[col]).collect())
    }
}

impl Persist for ScanTable {
    fn save<S: Store>(&self, group: &S) -> ewald_io::Result<()> {
        let index = self
            .rows
            .keys()
            .map(|&idx| {
                i64::try_from(idx).map_err(|_| {
                    ewald_io::Error::InvalidFormat(format!("index {idx} does not fit in i64"))
                })
            })
            .collect::<ewald_io::Result<Array1<i64>>>()?;
        group.write("index", &Value::from(index))?;
        for (col, name) in self.columns.iter().enumerate() {
            let values: Array1<f64> = self.rows.values().map(|row| row[col]).collect();
            write_array(group, name, &values)?;
        }
        Ok(())
    }

    fn load<S: Store>(group: &S) -> ewald_io::Result<Self> {
        let index = group.read("index")?.into_int()?;
        let index = index
            .iter()
            .map(|&idx| {
                usize::try_from(idx).map_err(|_| {
                    ewald_io::Error::InvalidFormat(format!("negative scan index {idx}"))
                })
            })
            .collect::<ewald_io::Result<Vec<_>>>()?;

        let columns: Vec<String> = group.keys()?.into_iter().filter(|k| k != "index").collect();
        let mut rows: BTreeMap<usize, Vec<f64>> = index
            .iter()
            .map(|&idx| (idx, Vec::with_capacity(columns.len())))
            .collect();
        for name in &columns {
            let values: Array1<f64> = read_array(group, name)?;
            if values.len() != index.len() {
                return Err(ewald_io::Error::InvalidFormat(format!(
                    "column {name:?} has {} rows, index has {}",
                    values.len(),
                    index.len()
                )));
            }
            for (idx, value) in index.iter().zip(values) {
                if let Some(row) = rows.get_mut(idx) {
                    row.push(value);
                }
            }
        }
        Ok(Self { columns, rows })
    }
}
