//! In-memory datastore for tests and small runs.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;

use super::{AttrValue, DatasetRecord, Datastore, Matrix};

/// Error type for the in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryStoreError {
    /// Dataset does not exist.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),
    /// Dataset exists with a different record type.
    #[error("dataset {0} holds a different record type")]
    TypeMismatch(String),
    /// Matrix write outside the created shape.
    #[error("matrix {path} has shape ({rows}, {cols}), cannot write row {row} of width {width}")]
    ShapeMismatch {
        /// Matrix path.
        path: String,
        /// Matrix row count.
        rows: usize,
        /// Matrix column count.
        cols: usize,
        /// Offending row index.
        row: usize,
        /// Offending row width.
        width: usize,
    },
    /// Matrix dataset created twice.
    #[error("matrix already exists: {0}")]
    AlreadyExists(String),
}

#[derive(Default)]
struct Inner {
    // path -> Vec<T> behind Any; the trait's generic methods downcast.
    records: BTreeMap<String, Box<dyn Any + Send + Sync>>,
    // Row counts tracked alongside, since Any hides the element type.
    lens: BTreeMap<String, u64>,
    matrices: BTreeMap<String, Matrix>,
    attrs: BTreeMap<String, BTreeMap<String, AttrValue>>,
}

/// In-memory datastore.
///
/// Uses BTreeMap keyed by path for deterministic iteration and a
/// `parking_lot` RwLock; the engine's reducer is the only writer during a
/// run, readers may overlap freely.
#[derive(Default)]
pub struct InMemoryDatastore {
    inner: RwLock<Inner>,
}

impl InMemoryDatastore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of all record datasets, in order.
    pub fn dataset_paths(&self) -> Vec<String> {
        self.inner.read().records.keys().cloned().collect()
    }
}

impl Datastore for InMemoryDatastore {
    type Error = InMemoryStoreError;

    fn extend<T: DatasetRecord>(&self, path: &str, rows: &[T]) -> Result<u64, Self::Error> {
        let mut inner = self.inner.write();
        let entry = inner
            .records
            .entry(path.to_string())
            .or_insert_with(|| Box::new(Vec::<T>::new()));
        let dataset = entry
            .downcast_mut::<Vec<T>>()
            .ok_or_else(|| InMemoryStoreError::TypeMismatch(path.to_string()))?;
        dataset.extend_from_slice(rows);
        let len = dataset.len() as u64;
        inner.lens.insert(path.to_string(), len);
        Ok(len)
    }

    fn read<T: DatasetRecord>(&self, path: &str) -> Result<Vec<T>, Self::Error> {
        let inner = self.inner.read();
        let entry = inner
            .records
            .get(path)
            .ok_or_else(|| InMemoryStoreError::DatasetNotFound(path.to_string()))?;
        let dataset = entry
            .downcast_ref::<Vec<T>>()
            .ok_or_else(|| InMemoryStoreError::TypeMismatch(path.to_string()))?;
        Ok(dataset.clone())
    }

    fn replace<T: DatasetRecord>(&self, path: &str, rows: Vec<T>) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        let entry = inner
            .records
            .get_mut(path)
            .ok_or_else(|| InMemoryStoreError::DatasetNotFound(path.to_string()))?;
        let dataset = entry
            .downcast_mut::<Vec<T>>()
            .ok_or_else(|| InMemoryStoreError::TypeMismatch(path.to_string()))?;
        *dataset = rows;
        let len = dataset.len() as u64;
        inner.lens.insert(path.to_string(), len);
        Ok(())
    }

    fn dataset_len(&self, path: &str) -> u64 {
        self.inner.read().lens.get(path).copied().unwrap_or(0)
    }

    fn create_matrix(&self, path: &str, rows: usize, cols: usize) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        if inner.matrices.contains_key(path) {
            return Err(InMemoryStoreError::AlreadyExists(path.to_string()));
        }
        inner.matrices.insert(path.to_string(), Matrix::zeros(rows, cols));
        Ok(())
    }

    fn write_row(&self, path: &str, row: usize, values: &[f32]) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        let matrix = inner
            .matrices
            .get_mut(path)
            .ok_or_else(|| InMemoryStoreError::DatasetNotFound(path.to_string()))?;
        if row >= matrix.rows || values.len() != matrix.cols {
            return Err(InMemoryStoreError::ShapeMismatch {
                path: path.to_string(),
                rows: matrix.rows,
                cols: matrix.cols,
                row,
                width: values.len(),
            });
        }
        let start = row * matrix.cols;
        matrix.values[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    fn read_matrix(&self, path: &str) -> Result<Matrix, Self::Error> {
        self.inner
            .read()
            .matrices
            .get(path)
            .cloned()
            .ok_or_else(|| InMemoryStoreError::DatasetNotFound(path.to_string()))
    }

    fn set_attr(&self, path: &str, key: &str, value: AttrValue) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        inner
            .attrs
            .entry(path.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn get_attr(&self, path: &str, key: &str) -> Option<AttrValue> {
        let inner = self.inner.read();
        self.get_attr_locked(&inner, path, key)
    }
}

impl InMemoryDatastore {
    fn get_attr_locked(&self, inner: &Inner, path: &str, key: &str) -> Option<AttrValue> {
        inner.attrs.get(path).and_then(|m| m.get(key)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_and_read_roundtrip() {
        let store = InMemoryDatastore::new();
        let len = store.extend("events", &[1u64, 2, 3]).unwrap();
        assert_eq!(len, 3);
        let len = store.extend("events", &[4u64]).unwrap();
        assert_eq!(len, 4);
        assert_eq!(store.read::<u64>("events").unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let store = InMemoryDatastore::new();
        store.extend("events", &[1u64]).unwrap();
        assert!(matches!(
            store.extend("events", &[1.0f32]),
            Err(InMemoryStoreError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_replace_for_resort() {
        let store = InMemoryDatastore::new();
        store.extend("events", &[3u64, 1, 2]).unwrap();
        let mut rows = store.read::<u64>("events").unwrap();
        rows.sort_unstable();
        store.replace("events", rows).unwrap();
        assert_eq!(store.read::<u64>("events").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_matrix_shape_enforced() {
        let store = InMemoryDatastore::new();
        store.create_matrix("hcurves/mean", 2, 3).unwrap();
        store.write_row("hcurves/mean", 1, &[0.1, 0.2, 0.3]).unwrap();
        let m = store.read_matrix("hcurves/mean").unwrap();
        assert_eq!(m.get(1, 2), 0.3);
        assert!(store.write_row("hcurves/mean", 2, &[0.0; 3]).is_err());
        assert!(store.write_row("hcurves/mean", 0, &[0.0; 2]).is_err());
    }

    #[test]
    fn test_attrs() {
        let store = InMemoryDatastore::new();
        store
            .set_attr("gmf_data", "nbytes", AttrValue::U64(128))
            .unwrap();
        assert_eq!(
            store.get_attr("gmf_data", "nbytes").and_then(|v| v.as_u64()),
            Some(128)
        );
        assert!(store.get_attr("gmf_data", "missing").is_none());
    }
}
