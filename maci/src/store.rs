use crate::*;
use std::collections::BTreeMap;

/// Named snapshots of a `MaciState`, kept for crash recovery and audit
pub trait Store {
    /// Get the raw bytes of a snapshot
    fn get_snapshot(&self, name: &str) -> Option<Vec<u8>>;

    fn put_snapshot(&mut self, name: &str, bytes: Vec<u8>);

    /// Save a state as CBOR
    fn save(&mut self, name: &str, state: &MaciState) -> Result<(), Error> {
        let bytes = state.to_bytes()?;
        self.put_snapshot(name, bytes);
        Ok(())
    }

    /// Load a state; `None` if nothing was saved under `name`
    fn load(&self, name: &str) -> Result<Option<MaciState>, Error> {
        match self.get_snapshot(name) {
            Some(bytes) => Ok(Some(MaciState::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// A simple store that uses an in-memory BTreeMap
#[derive(Default, Clone, Debug)]
pub struct MemStore {
    inner: BTreeMap<String, Vec<u8>>,
}

impl MemStore {
    /// Snapshot names in order
    pub fn names(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }

    /// Every snapshot whose name starts with `prefix`
    pub fn get_multiple(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.inner
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, bytes)| (name.clone(), bytes.clone()))
            .collect()
    }
}

impl Store for MemStore {
    fn get_snapshot(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.get(name).cloned()
    }

    fn put_snapshot(&mut self, name: &str, bytes: Vec<u8>) {
        self.inner.insert(name.to_string(), bytes);
    }
}
