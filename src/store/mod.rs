//! Descriptor store backends.
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | `aperturedb` | [`aperturedb`] | Remote vector service over REST |
//! | `sqlite` | [`sqlite`] | Local single-file store, brute-force search |
//!
//! Both implement [`DescriptorStore`] from the core crate; the in-memory
//! store used by tests lives there as well.

pub mod aperturedb;
pub mod sqlite;

use anyhow::{anyhow, Result};

use guide_index_core::store::DescriptorStore;

use crate::config::{Config, StoreBackend};

/// Open the backend selected by `[store].backend`.
pub async fn open_store(config: &Config) -> Result<Box<dyn DescriptorStore>> {
    match config.store.backend {
        StoreBackend::Aperturedb => {
            let adb = config
                .store
                .aperturedb
                .as_ref()
                .ok_or_else(|| anyhow!("missing [store.aperturedb] section"))?;
            Ok(Box::new(aperturedb::ApertureDbStore::new(adb)?))
        }
        StoreBackend::Sqlite => {
            let sqlite = config
                .store
                .sqlite
                .as_ref()
                .ok_or_else(|| anyhow!("missing [store.sqlite] section"))?;
            Ok(Box::new(sqlite::SqliteStore::open(&sqlite.path).await?))
        }
    }
}
