//! 进程内存后端
//!
//! 用 HashMap 保存键值，用带过期时间的进程内锁表模拟
//! 后端的排他锁 + CAS 替换语义。主要用于测试与单进程嵌入。

use crate::error::{Result, StorageError};
use crate::store::{CasToken, ContentStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct LockEntry {
    token: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Vec<u8>>,
    locks: HashMap<String, LockEntry>,
}

/// 内存内容存储
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_token: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 键是否存在（巡检用）
    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.values.contains_key(key)
    }

    /// 当前所有键（巡检用）
    pub async fn keys(&self) -> Vec<String> {
        self.inner.lock().await.values.keys().cloned().collect()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .await
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    async fn upsert(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner
            .lock()
            .await
            .values
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn insert(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.values.contains_key(key) {
            return Err(StorageError::KeyAlreadyExists(key.to_string()));
        }
        inner.values.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn lock_and_get(&self, key: &str, ttl: Duration) -> Result<(Vec<u8>, CasToken)> {
        let mut inner = self.inner.lock().await;
        let value = inner
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))?;
        let now = Instant::now();
        if let Some(lock) = inner.locks.get(key) {
            if lock.expires_at > now {
                return Err(StorageError::Store(format!("键已被锁定: {key}")));
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        inner.locks.insert(
            key.to_string(),
            LockEntry {
                token,
                expires_at: now + ttl,
            },
        );
        Ok((value, CasToken(token)))
    }

    async fn replace_if_token(&self, key: &str, value: &[u8], token: CasToken) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let valid = matches!(
            inner.locks.get(key),
            Some(lock) if lock.token == token.0 && lock.expires_at > Instant::now()
        );
        if !valid {
            return Err(StorageError::CasConflict(key.to_string()));
        }
        inner.locks.remove(key);
        inner.values.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().await.values.remove(key);
        Ok(())
    }
}
