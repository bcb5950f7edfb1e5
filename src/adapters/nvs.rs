//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] on the ESP-IDF NVS partition, and as an
//! in-memory map when built for the host.
//!
//! - Namespaces are limited to 15 bytes by NVS and rejected beyond that
//!   with [`StorageError::KeyTooLong`].
//! - Keys up to [`NAME_MAX`] bytes are accepted.  A key that does not fit an
//!   NVS key is stored under a hashed slot key (`#` + 14 hex digits) and the
//!   blob carries the full name in front of the value:
//!
//! ```text
//!   slot "#<fnv1a-56>"  blob: [name_len u8][name bytes][value bytes]
//! ```
//!
//!   Reads check the carried name, so a hash collision reads as `NotFound`
//!   rather than another setting's bytes.  [`StoragePort::entries`] reports
//!   the full name.  Both backends use the same layout so host tests see
//!   what the device stores.
//! - Values are stored as blobs and committed per write, which NVS makes
//!   atomic.

use std::borrow::Cow;

use crate::config::NAME_MAX;
use crate::ports::{StorageError, StoragePort, StoredEntry};
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::collections::BTreeMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Longest namespace or raw key NVS accepts.
pub const NVS_KEY_MAX: usize = 15;

/// First byte of a hashed slot key.
const SLOT_MARK: char = '#';

/// Largest blob read back from flash.
#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 4000;

fn check_namespace(namespace: &str) -> Result<(), StorageError> {
    if namespace.is_empty() || namespace.len() > NVS_KEY_MAX {
        return Err(StorageError::KeyTooLong);
    }
    Ok(())
}

fn check_key(namespace: &str, key: &str) -> Result<(), StorageError> {
    check_namespace(namespace)?;
    if key.is_empty() || key.len() > NAME_MAX {
        return Err(StorageError::KeyTooLong);
    }
    Ok(())
}

/// Keys that cannot be stored verbatim.
fn is_long(key: &str) -> bool {
    key.len() > NVS_KEY_MAX || key.starts_with(SLOT_MARK)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// NVS key a logical key is stored under.
fn slot_key(key: &str) -> Cow<'_, str> {
    if is_long(key) {
        Cow::Owned(format!("{SLOT_MARK}{:014x}", fnv1a(key.as_bytes()) & 0x00FF_FFFF_FFFF_FFFF))
    } else {
        Cow::Borrowed(key)
    }
}

/// Blob stored for `key`: the value, prefixed by the name for long keys.
fn pack(key: &str, data: &[u8]) -> Vec<u8> {
    if !is_long(key) {
        return data.to_vec();
    }
    let mut blob = Vec::with_capacity(1 + key.len() + data.len());
    blob.push(key.len() as u8);
    blob.extend_from_slice(key.as_bytes());
    blob.extend_from_slice(data);
    blob
}

/// Split a hashed slot's blob into its carried name and value.
fn unpack(blob: &[u8]) -> Option<(&str, &[u8])> {
    let (&len, rest) = blob.split_first()?;
    let len = usize::from(len);
    if rest.len() < len {
        return None;
    }
    let (name, value) = rest.split_at(len);
    core::str::from_utf8(name).ok().map(|name| (name, value))
}

/// Value bytes of `key` from the blob found in its slot.
fn value_of<'b>(key: &str, blob: &'b [u8]) -> Option<&'b [u8]> {
    if !is_long(key) {
        return Some(blob);
    }
    match unpack(blob) {
        Some((name, value)) if name == key => Some(value),
        _ => None,
    }
}

/// NUL-terminated copy of a checked NVS key.
#[cfg(target_os = "espidf")]
fn c_key(s: &str) -> [u8; NVS_KEY_MAX + 1] {
    let mut buf = [0u8; NVS_KEY_MAX + 1];
    let n = s.len().min(NVS_KEY_MAX);
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
    buf
}

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<BTreeMap<(String, String), Vec<u8>>>,
}

impl core::fmt::Debug for NvsAdapter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NvsAdapter").finish_non_exhaustive()
    }
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // boot thread before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(BTreeMap::new()),
        })
    }

    /// Erase every key of a namespace.
    pub fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        check_namespace(namespace)?;
        self.raw_erase_all(namespace)
    }

    // ── Raw slot access ───────────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn raw_get(&self, namespace: &str, slot: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .store
            .borrow()
            .get(&(namespace.to_owned(), slot.to_owned()))
            .cloned())
    }

    #[cfg(not(target_os = "espidf"))]
    fn raw_set(&mut self, namespace: &str, slot: &str, blob: Vec<u8>) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .insert((namespace.to_owned(), slot.to_owned()), blob);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn raw_erase(&mut self, namespace: &str, slot: &str) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .remove(&(namespace.to_owned(), slot.to_owned()));
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn raw_erase_all(&mut self, namespace: &str) -> Result<(), StorageError> {
        self.store.borrow_mut().retain(|(ns, _), _| ns != namespace);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn raw_list(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        Ok(self
            .store
            .borrow()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, slot), blob)| (slot.clone(), blob.clone()))
            .collect())
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = c_key(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    /// Read a whole blob, sizing the buffer first.
    #[cfg(target_os = "espidf")]
    fn read_blob(handle: nvs_handle_t, key: &[u8]) -> Result<Vec<u8>, i32> {
        let mut size: usize = 0;
        let ret = unsafe { nvs_get_blob(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size) };
        if ret != ESP_OK {
            return Err(ret);
        }
        if size > MAX_BLOB_SIZE {
            return Err(ESP_ERR_NVS_INVALID_LENGTH);
        }
        let mut buf = vec![0u8; size];
        let ret = unsafe { nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size) };
        if ret != ESP_OK {
            return Err(ret);
        }
        buf.truncate(size);
        Ok(buf)
    }

    #[cfg(target_os = "espidf")]
    fn raw_get(&self, namespace: &str, slot: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let result = Self::with_nvs_handle(namespace, false, |handle| Self::read_blob(handle, &c_key(slot)));
        match result {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(None),
            Err(_) => Err(StorageError::IoError),
        }
    }

    #[cfg(target_os = "espidf")]
    fn raw_set(&mut self, namespace: &str, slot: &str, blob: Vec<u8>) -> Result<(), StorageError> {
        let result = Self::with_nvs_handle(namespace, true, |handle| {
            let k = c_key(slot);
            let ret = unsafe { nvs_set_blob(handle, k.as_ptr().cast(), blob.as_ptr().cast(), blob.len()) };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        result.map_err(|e| {
            if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                StorageError::Full
            } else {
                StorageError::IoError
            }
        })
    }

    #[cfg(target_os = "espidf")]
    fn raw_erase(&mut self, namespace: &str, slot: &str) -> Result<(), StorageError> {
        let result = Self::with_nvs_handle(namespace, true, |handle| {
            let k = c_key(slot);
            let ret = unsafe { nvs_erase_key(handle, k.as_ptr().cast()) };
            if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        match result {
            Ok(()) => Ok(()),
            // namespace never written: nothing to delete
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(()),
            Err(_) => Err(StorageError::IoError),
        }
    }

    #[cfg(target_os = "espidf")]
    fn raw_erase_all(&mut self, namespace: &str) -> Result<(), StorageError> {
        let result = Self::with_nvs_handle(namespace, true, |handle| {
            let ret = unsafe { nvs_erase_all(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        match result {
            Ok(()) => Ok(()),
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(()),
            Err(_) => Err(StorageError::IoError),
        }
    }

    #[cfg(target_os = "espidf")]
    fn raw_list(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let ns = c_key(namespace);
        let mut slots: Vec<[u8; NVS_KEY_MAX + 1]> = Vec::new();

        // SAFETY: the iterator is released on every exit path below and
        // `info` is only read after a successful nvs_entry_info.
        unsafe {
            let mut it: nvs_iterator_t = core::ptr::null_mut();
            let mut ret = nvs_entry_find(
                NVS_DEFAULT_PART_NAME.as_ptr().cast(),
                ns.as_ptr().cast(),
                nvs_type_t_NVS_TYPE_BLOB,
                &mut it,
            );
            while ret == ESP_OK {
                let mut info: nvs_entry_info_t = core::mem::zeroed();
                if nvs_entry_info(it, &mut info) == ESP_OK {
                    let mut k = [0u8; NVS_KEY_MAX + 1];
                    for (dst, src) in k.iter_mut().zip(info.key.iter()) {
                        *dst = *src as u8;
                    }
                    slots.push(k);
                }
                ret = nvs_entry_next(&mut it);
            }
            nvs_release_iterator(it);
            if ret != ESP_ERR_NVS_NOT_FOUND {
                warn!("NvsAdapter: entry iteration stopped with {}", ret);
                return Err(StorageError::IoError);
            }
        }

        if slots.is_empty() {
            return Ok(Vec::new());
        }

        let result = Self::with_nvs_handle(namespace, false, |handle| {
            let mut out = Vec::with_capacity(slots.len());
            for k in &slots {
                let len = k.iter().position(|&b| b == 0).unwrap_or(NVS_KEY_MAX);
                let slot = String::from_utf8_lossy(&k[..len]).into_owned();
                match Self::read_blob(handle, k) {
                    Ok(blob) => out.push((slot, blob)),
                    Err(e) => warn!("NvsAdapter: unreadable entry {}/{}: {}", namespace, slot, e),
                }
            }
            Ok(out)
        });
        result.map_err(|_| StorageError::IoError)
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        check_key(namespace, key)?;
        let blob = self
            .raw_get(namespace, &slot_key(key))?
            .ok_or(StorageError::NotFound)?;
        let data = value_of(key, &blob).ok_or(StorageError::NotFound)?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        check_key(namespace, key)?;
        let slot = slot_key(key);
        if is_long(key) {
            // never clobber another name that hashed to the same slot
            if let Some(blob) = self.raw_get(namespace, &slot)? {
                if value_of(key, &blob).is_none() {
                    warn!("NvsAdapter: slot {} for {}/{} is taken", slot, namespace, key);
                    return Err(StorageError::Full);
                }
            }
        }
        self.raw_set(namespace, &slot, pack(key, data))
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        check_key(namespace, key)?;
        let slot = slot_key(key);
        if is_long(key) {
            match self.raw_get(namespace, &slot)? {
                Some(blob) if value_of(key, &blob).is_some() => {}
                _ => return Ok(()),
            }
        }
        self.raw_erase(namespace, &slot)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        if check_key(namespace, key).is_err() {
            return false;
        }
        matches!(
            self.raw_get(namespace, &slot_key(key)),
            Ok(Some(blob)) if value_of(key, &blob).is_some()
        )
    }

    fn entries(&self, namespace: &str) -> Result<Vec<StoredEntry>, StorageError> {
        check_namespace(namespace)?;
        let mut out = Vec::new();
        for (slot, blob) in self.raw_list(namespace)? {
            if !slot.starts_with(SLOT_MARK) {
                out.push(StoredEntry { key: slot, value: blob });
                continue;
            }
            match unpack(&blob) {
                Some((name, value)) if slot_key(name) == slot.as_str() => out.push(StoredEntry {
                    key: name.to_owned(),
                    value: value.to_vec(),
                }),
                _ => warn!("NvsAdapter: malformed slot {}/{}", namespace, slot),
            }
        }
        Ok(out)
    }
}

impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(BTreeMap::new()),
        })
    }
}
