// src/store/memory.rs
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::KvBackend;
use crate::error::StoreError;

/// Mutating operation as seen by the backend, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Set(String),
    Del(String),
}

/// In-process backend for local runs and tests. Keeps a log of mutations so
/// write ordering can be inspected.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, String>>,
    log: RwLock<Vec<KvOp>>,
    limit: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn ops(&self) -> Vec<KvOp> {
        self.log.read().clone()
    }

    pub fn clear_ops(&self) {
        self.log.write().clear();
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn max_value_bytes(&self) -> usize {
        self.limit.unwrap_or(usize::MAX)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if value.len() > self.max_value_bytes() {
            return Err(StoreError::Backend(format!(
                "value for `{key}` is {} bytes, limit {}",
                value.len(),
                self.max_value_bytes()
            )));
        }
        self.data.write().insert(key.to_string(), value.to_string());
        self.log.write().push(KvOp::Set(key.to_string()));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        if self.data.write().remove(key).is_some() {
            self.log.write().push(KvOp::Del(key.to_string()));
        }
        Ok(())
    }
}
