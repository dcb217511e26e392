//! Plain FIFO queue on a store list.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use store::StoreBackend;
use tracing::warn;

/// FIFO queue of JSON payloads. Items are pushed at the back and popped
/// from the front.
#[derive(Debug)]
pub struct DistributedQueue<S> {
    store: S,
}

impl<S: StoreBackend> DistributedQueue<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Append a payload. Returns the queue length after the push.
    pub fn push<T: Serialize + ?Sized>(&self, name: &str, payload: &T) -> Result<u64> {
        let raw = serde_json::to_string(payload)?;
        Ok(self.store.qpush_back(name, &raw)?)
    }

    /// Remove up to `count` payloads from the front. Payloads that do not
    /// decode as `T` are dropped with a warning.
    pub fn pop<T: DeserializeOwned>(&self, name: &str, count: usize) -> Result<Vec<T>> {
        let raw = self.store.qpop_front(name, count)?;
        Ok(decode_all(name, raw))
    }

    pub fn size(&self, name: &str) -> Result<u64> {
        Ok(self.store.qsize(name)?)
    }
}

pub(crate) fn decode_all<T: DeserializeOwned>(queue: &str, raw: Vec<String>) -> Vec<T> {
    raw.into_iter()
        .filter_map(|item| match serde_json::from_str(&item) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(queue, error = %e, payload = %item, "dropping undecodable payload");
                None
            }
        })
        .collect()
}
