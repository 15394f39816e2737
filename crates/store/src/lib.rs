//! Hopwire Store
//!
//! Durable get/set-by-name storage for everything the client persists:
//! configuration, the current credential, the proof token set, contract and
//! relay metadata, the bypass set and the daemon pid marker.
//!
//! ## Features
//!
//! - [`Store`] byte-level trait, [`StoreExt`] typed JSON helpers
//! - [`FsStore`]: one JSON file per name inside a data directory
//! - [`MemoryStore`]: in-memory store for tests
//! - Data directory resolution (`HOPWIRE_HOME`, `~` expansion)
//!
//! A name that has never been written reads back as `None`; this is the only
//! absent-data case the store absorbs.

mod fs;
mod memory;
pub mod names;
mod paths;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use paths::{default_data_dir, expand_path, HOME_ENV};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Byte-level named storage
pub trait Store: Send + Sync {
    /// Read the contents stored under `name`, `None` if never written
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the contents stored under `name`
    fn write(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Remove `name`; removing an absent name is not an error
    fn remove(&self, name: &str) -> Result<()>;
}

/// Typed JSON access on top of any [`Store`]
pub trait StoreExt: Store {
    /// Deserialize the value stored under `name`.
    ///
    /// Missing and empty entries both read as `None`.
    fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.read(name)? {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
                serde_json::from_slice(&bytes)
                    .map(Some)
                    .map_err(|source| StoreError::Parse {
                        name: name.to_string(),
                        source,
                    })
            }
            _ => Ok(None),
        }
    }

    /// Serialize `value` as pretty JSON under `name`
    fn set<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Parse {
            name: name.to_string(),
            source,
        })?;
        self.write(name, &bytes)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        hops: usize,
    }

    #[test]
    fn test_typed_roundtrip() {
        let store = MemoryStore::new();
        store.set("record.json", &Record { hops: 3 }).unwrap();
        let back: Option<Record> = store.get("record.json").unwrap();
        assert_eq!(back, Some(Record { hops: 3 }));
    }

    #[test]
    fn test_missing_and_empty_read_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get::<Record>("absent.json").unwrap(), None);
        store.write("blank.json", b"  \n").unwrap();
        assert_eq!(store.get::<Record>("blank.json").unwrap(), None);
    }

    #[test]
    fn test_malformed_is_an_error() {
        let store = MemoryStore::new();
        store.write("bad.json", b"{not json").unwrap();
        let err = store.get::<Record>("bad.json").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse bad.json"));
    }

    #[test]
    fn test_store_ext_on_trait_object() {
        let store: Box<dyn Store> = Box::new(MemoryStore::new());
        store.set("n.json", &5u32).unwrap();
        assert_eq!(store.get::<u32>("n.json").unwrap(), Some(5));
    }
}
