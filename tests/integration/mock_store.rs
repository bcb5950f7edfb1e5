//! Mock storage adapter for integration tests.
//!
//! Clones share one backing map, so a test can hand one clone to a
//! settings leaf and keep another to inspect what was written, or to boot
//! a second registry against the same "flash".

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use leafcore::ports::{StorageError, StoragePort, StoredEntry};

#[derive(Default)]
struct Flash {
    data: BTreeMap<(String, String), Vec<u8>>,
    writes: usize,
    fail_writes: bool,
}

#[derive(Clone, Default)]
pub struct MockStore {
    flash: Arc<Mutex<Flash>>,
}

#[allow(dead_code)]
impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a raw value, bypassing the write counter.
    pub fn seed(&self, namespace: &str, key: &str, value: &[u8]) {
        self.flash
            .lock()
            .unwrap()
            .data
            .insert((namespace.into(), key.into()), value.to_vec());
    }

    pub fn raw(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.flash
            .lock()
            .unwrap()
            .data
            .get(&(namespace.into(), key.into()))
            .cloned()
    }

    pub fn writes(&self) -> usize {
        self.flash.lock().unwrap().writes
    }

    pub fn fail_writes(&self, fail: bool) {
        self.flash.lock().unwrap().fail_writes = fail;
    }
}

impl StoragePort for MockStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let flash = self.flash.lock().unwrap();
        let value = flash
            .data
            .get(&(namespace.into(), key.into()))
            .ok_or(StorageError::NotFound)?;
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut flash = self.flash.lock().unwrap();
        if flash.fail_writes {
            return Err(StorageError::Full);
        }
        flash.writes += 1;
        flash.data.insert((namespace.into(), key.into()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.flash
            .lock()
            .unwrap()
            .data
            .remove(&(namespace.into(), key.into()));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.flash
            .lock()
            .unwrap()
            .data
            .contains_key(&(namespace.into(), key.into()))
    }

    fn entries(&self, namespace: &str) -> Result<Vec<StoredEntry>, StorageError> {
        Ok(self
            .flash
            .lock()
            .unwrap()
            .data
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, key), value)| StoredEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}
