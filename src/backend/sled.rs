//! sled 嵌入式持久化后端
//!
//! 键值落在 sled 树中；排他锁表维护在进程内（sled 为单进程嵌入库，
//! 锁无需跨进程）。创建写入通过 sled 的 compare_and_swap 保证原子性。

use crate::error::{Result, StorageError};
use crate::store::{CasToken, ContentStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct LockEntry {
    token: u64,
    expires_at: Instant,
}

/// sled 内容存储
pub struct SledStore {
    db: sled::Db,
    locks: Mutex<HashMap<String, LockEntry>>,
    next_token: AtomicU64,
}

impl SledStore {
    /// 打开（或创建）指定目录下的数据库
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        debug!("sled 后端已打开: keys={}", db.len());
        Ok(Self {
            db,
            locks: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ContentStore for SledStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.db
            .get(key)?
            .map(|v| v.to_vec())
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    async fn upsert(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    async fn insert(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?
            .map_err(|_| StorageError::KeyAlreadyExists(key.to_string()))
    }

    async fn lock_and_get(&self, key: &str, ttl: Duration) -> Result<(Vec<u8>, CasToken)> {
        let value = self
            .db
            .get(key)?
            .map(|v| v.to_vec())
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))?;
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        if let Some(lock) = locks.get(key) {
            if lock.expires_at > now {
                return Err(StorageError::Store(format!("键已被锁定: {key}")));
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        locks.insert(
            key.to_string(),
            LockEntry {
                token,
                expires_at: now + ttl,
            },
        );
        Ok((value, CasToken(token)))
    }

    async fn replace_if_token(&self, key: &str, value: &[u8], token: CasToken) -> Result<()> {
        let mut locks = self.locks.lock().await;
        let valid = matches!(
            locks.get(key),
            Some(lock) if lock.token == token.0 && lock.expires_at > Instant::now()
        );
        if !valid {
            return Err(StorageError::CasConflict(key.to_string()));
        }
        self.db.insert(key, value)?;
        locks.remove(key);
        // 目录写回是持久性关键点
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp_store() -> (SledStore, TempDir) {
        let dir = TempDir::new().expect("创建临时目录失败");
        let store = SledStore::open(dir.path()).expect("打开 sled 后端失败");
        (store, dir)
    }

    #[tokio::test]
    async fn test_basic_crud() {
        let (store, _dir) = open_temp_store();
        store.upsert("k", b"v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v1");
        store.upsert("k", b"v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v2");
        store.delete("k").await.unwrap();
        assert!(matches!(
            store.get("k").await,
            Err(StorageError::KeyNotFound(_))
        ));
        // 删除不存在的键不是错误
        store.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_is_create_only() {
        let (store, _dir) = open_temp_store();
        store.insert("k", b"v1").await.unwrap();
        assert!(matches!(
            store.insert("k", b"v2").await,
            Err(StorageError::KeyAlreadyExists(_))
        ));
        assert_eq!(store.get("k").await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_lock_and_cas_replace() {
        let (store, _dir) = open_temp_store();
        store.upsert("k", b"v1").await.unwrap();

        let (value, token) = store
            .lock_and_get("k", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(value, b"v1");
        store.replace_if_token("k", b"v2", token).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v2");

        // 已消费的令牌重放即冲突
        assert!(matches!(
            store.replace_if_token("k", b"v3", token).await,
            Err(StorageError::CasConflict(_))
        ));
    }
}
