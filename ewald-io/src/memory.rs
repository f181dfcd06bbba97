//! In-memory [`Store`] implementation.

use crate::store::{Store, Value};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Debug)]
enum Entry {
    Group(MemoryStore),
    Dataset(Value),
}

/// A store kept entirely in memory.
///
/// Cloning yields another handle to the same group, so writes through one
/// handle are visible through every other.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Entry>>>,
}

impl MemoryStore {
    /// An empty root group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl Store for MemoryStore {
    fn create_group(&self, name: &str) -> Result<Self> {
        let mut entries = self.entries();
        if entries.contains_key(name) {
            return Err(Error::InvalidFormat(format!("{name:?} already exists")));
        }
        let group = Self::new();
        entries.insert(name.to_string(), Entry::Group(group.clone()));
        Ok(group)
    }

    fn group(&self, name: &str) -> Result<Self> {
        match self.entries().get(name) {
            Some(Entry::Group(group)) => Ok(group.clone()),
            Some(Entry::Dataset(_)) => Err(Error::InvalidFormat(format!("{name:?} is a dataset"))),
            None => Err(Error::NotFound(format!("group {name:?}"))),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    fn is_group(&self, name: &str) -> bool {
        matches!(self.entries().get(name), Some(Entry::Group(_)))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.entries()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries().keys().cloned().collect())
    }

    fn write(&self, name: &str, value: &Value) -> Result<()> {
        let mut entries = self.entries();
        if let Some(Entry::Group(_)) = entries.get(name) {
            return Err(Error::InvalidFormat(format!("{name:?} is a group")));
        }
        entries.insert(name.to_string(), Entry::Dataset(value.clone()));
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Value> {
        match self.entries().get(name) {
            Some(Entry::Dataset(value)) => Ok(value.clone()),
            Some(Entry::Group(_)) => Err(Error::InvalidFormat(format!("{name:?} is a group"))),
            None => Err(Error::NotFound(format!("dataset {name:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_groups_and_datasets() {
        let root = MemoryStore::new();
        let group = root.create_group("a").unwrap();
        group.write("x", &Value::from(arr1(&[1.0, 2.0]))).unwrap();

        // handles share state
        let again = root.group("a").unwrap();
        assert_eq!(again.read("x").unwrap(), Value::from(arr1(&[1.0, 2.0])));
        assert_eq!(root.keys().unwrap(), vec!["a".to_string()]);
        assert!(root.create_group("a").is_err());
        assert!(root.require_group("a").is_ok());
    }

    #[test]
    fn test_not_found() {
        let root = MemoryStore::new();
        assert!(matches!(root.group("missing"), Err(Error::NotFound(_))));
        assert!(matches!(root.read("missing"), Err(Error::NotFound(_))));
        assert!(matches!(root.remove("missing"), Err(Error::NotFound(_))));
        assert!(root.read_opt("missing").unwrap().is_none());
    }

    #[test]
    fn test_remove_and_overwrite() {
        let root = MemoryStore::new();
        root.write("v", &Value::scalar(1.0)).unwrap();
        root.write("v", &Value::scalar(2.0)).unwrap();
        assert_eq!(root.read("v").unwrap().into_scalar().unwrap(), 2.0);
        root.remove("v").unwrap();
        assert!(root.is_empty());

        root.create_group("g").unwrap();
        assert!(root.write("g", &Value::scalar(1.0)).is_err());
        assert!(root.read("g").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let root = MemoryStore::new();
        root.write_json("args", &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = root.read_json("args").unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn test_bad_json_is_json_error() {
        let root = MemoryStore::new();
        root.write("args", &Value::Text("{not json".to_string())).unwrap();
        let err = root.read_json::<Vec<i32>>("args").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().starts_with("JSON error"));
    }
}
