//! In-memory store for tests

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{Result, Store};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` has been written and not removed
    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }
}

impl Store for MemoryStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(name).cloned())
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.entries.lock().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.entries.lock().remove(name);
        Ok(())
    }
}
