// # Registry Store Implementations
//
// This module provides implementations of the RegistryStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileRegistryStore;
pub use memory::MemoryRegistryStore;

use crate::config::StateStoreConfig;
use crate::error::Result;
use crate::traits::RegistryStore;

/// Open the registry store described by `config`
pub async fn open_store(config: &StateStoreConfig) -> Result<Box<dyn RegistryStore>> {
    match config {
        StateStoreConfig::File { path } => Ok(Box::new(FileRegistryStore::new(path).await?)),
        StateStoreConfig::Memory => Ok(Box::new(MemoryRegistryStore::new())),
    }
}
