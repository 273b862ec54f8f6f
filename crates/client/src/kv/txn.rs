use super::engine::WriteSet;
use super::{Kv, KvError};

/// A read/write transaction over a snapshot of the local store.
///
/// Reads see the store as of the version the transaction started at, plus
/// the transaction's own writes. Nothing is visible elsewhere until
/// [`Kv::commit`].
pub struct Txn<'a> {
    kv: &'a Kv,
    read_version: u64,
    pub(super) writes: WriteSet,
}

impl<'a> Txn<'a> {
    pub(super) fn new(kv: &'a Kv, read_version: u64) -> Self {
        Self {
            kv,
            read_version,
            writes: WriteSet::new(),
        }
    }

    pub fn read_version(&self) -> u64 {
        self.read_version
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.kv.engine.get(key, self.read_version).await
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.writes.insert(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.writes.insert(key.into(), None);
    }
}
