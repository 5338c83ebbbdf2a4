//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the RelayNode.
//! The channel snapshot and the node config each live in a single blob;
//! ESP-IDF commits a blob atomically, so a power cut mid-write leaves the
//! previous value intact.
//!
//! On the node the default NVS partition is opened through
//! `esp_idf_svc::nvs`.  On the host a `RefCell<HashMap>` stands in for
//! flash so the same code paths run under `cargo test`.

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::NodeConfig;
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::{cell::RefCell, collections::HashMap};

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

const CONFIG_NAMESPACE: &str = "relaynode";
const CONFIG_KEY: &str = "nodecfg";

/// Largest config blob accepted from flash.
const MAX_CONFIG_BLOB: usize = 1024;

pub struct NvsAdapter {
    /// `None` when flash could not be initialised.
    #[cfg(target_os = "espidf")]
    partition: Option<EspDefaultNvsPartition>,
    #[cfg(not(target_os = "espidf"))]
    store: RefCell<HashMap<(String, String), Vec<u8>>>,
}

/// An adapter with no partition behind it.  On the node every operation
/// fails with [`StorageError::IoError`] and the caller keeps running on
/// in-memory state.
impl Default for NvsAdapter {
    fn default() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            partition: None,
            #[cfg(not(target_os = "espidf"))]
            store: RefCell::default(),
        }
    }
}

impl NvsAdapter {
    /// Take the default NVS partition.  A partition that is full or was
    /// written by a newer IDF is erased and re-initialised by the driver.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            let partition = EspDefaultNvsPartition::take().map_err(|e| {
                warn!("NVS: partition unavailable ({})", e);
                StorageError::IoError
            })?;
            info!("NvsAdapter: default partition ready");
            Ok(Self {
                partition: Some(partition),
            })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("NvsAdapter: simulation backend");
            Ok(Self::default())
        }
    }

    /// Handle for other drivers on the same partition (WiFi calibration).
    #[cfg(target_os = "espidf")]
    pub fn partition(&self) -> Option<EspDefaultNvsPartition> {
        self.partition.clone()
    }

    // ── Blob primitives ───────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn open(&self, namespace: &str, read_write: bool) -> Result<EspNvs<NvsDefault>, StorageError> {
        let partition = self.partition.clone().ok_or(StorageError::IoError)?;
        EspNvs::new(partition, namespace, read_write).map_err(Self::map_err)
    }

    #[cfg(target_os = "espidf")]
    fn map_err(e: esp_idf_svc::sys::EspError) -> StorageError {
        use esp_idf_svc::sys::{
            ESP_ERR_NVS_INVALID_LENGTH, ESP_ERR_NVS_NOT_ENOUGH_SPACE, ESP_ERR_NVS_NOT_FOUND,
        };
        match e.code() {
            ESP_ERR_NVS_NOT_FOUND => StorageError::NotFound,
            ESP_ERR_NVS_NOT_ENOUGH_SPACE => StorageError::Full,
            ESP_ERR_NVS_INVALID_LENGTH => StorageError::Corrupted,
            _ => StorageError::IoError,
        }
    }

    #[cfg(target_os = "espidf")]
    fn get(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let nvs = self.open(namespace, false)?;
        nvs.get_blob(key, buf)
            .map_err(Self::map_err)?
            .map(<[u8]>::len)
            .ok_or(StorageError::NotFound)
    }

    #[cfg(not(target_os = "espidf"))]
    fn get(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let store = self.store.borrow();
        let data = store
            .get(&(namespace.to_owned(), key.to_owned()))
            .ok_or(StorageError::NotFound)?;
        let dst = buf.get_mut(..data.len()).ok_or(StorageError::Corrupted)?;
        dst.copy_from_slice(data);
        Ok(data.len())
    }

    #[cfg(target_os = "espidf")]
    fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        // set_blob commits before returning.
        self.open(namespace, true)?
            .set_blob(key, data)
            .map_err(Self::map_err)
    }

    #[cfg(not(target_os = "espidf"))]
    fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn erase(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        match self.open(namespace, true) {
            Ok(mut nvs) => nvs.remove(key).map(|_| ()).map_err(Self::map_err),
            // A namespace that was never written has nothing to erase.
            Err(StorageError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn erase(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .remove(&(namespace.to_owned(), key.to_owned()));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn contains(&self, namespace: &str, key: &str) -> bool {
        self.open(namespace, false)
            .and_then(|nvs| nvs.contains(key).map_err(Self::map_err))
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn contains(&self, namespace: &str, key: &str) -> bool {
        self.store
            .borrow()
            .contains_key(&(namespace.to_owned(), key.to_owned()))
    }
}

// ── ConfigPort ────────────────────────────────────────────────

impl ConfigPort for NvsAdapter {
    /// A missing or unreadable blob yields the factory defaults; a blob
    /// that decodes but fails validation is an error so the caller can
    /// decide whether to fall back.
    fn load(&self) -> Result<NodeConfig, ConfigError> {
        let mut buf = vec![0u8; MAX_CONFIG_BLOB];
        let len = match self.get(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => {
                info!("NvsAdapter: no stored config, using defaults");
                return Ok(NodeConfig::default());
            }
            Err(e) => {
                warn!("NvsAdapter: config read failed ({}), using defaults", e);
                return Ok(NodeConfig::default());
            }
        };
        let cfg: NodeConfig = postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        info!("NvsAdapter: loaded config ({} bytes)", len);
        Ok(cfg)
    }

    fn save(&self, config: &NodeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        if bytes.len() > MAX_CONFIG_BLOB {
            return Err(ConfigError::ValidationFailed("config too large"));
        }
        self.put(CONFIG_NAMESPACE, CONFIG_KEY, &bytes).map_err(|e| {
            warn!("NvsAdapter: config write failed ({})", e);
            ConfigError::IoError
        })?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

// ── StoragePort ───────────────────────────────────────────────

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.get(namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.put(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.erase(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.contains(namespace, key)
    }
}
