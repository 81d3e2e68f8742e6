//! 内容存储后端 trait 定义
//!
//! 提供统一的键值存储接口，目录文档与数据块都通过此接口读写。
//! 任何提供条件替换（CAS）能力的 KV 后端都可以实现此 trait。

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// CAS 令牌
///
/// 由 `lock_and_get` 返回，由 `replace_if_token` 消费。对调用方不透明，
/// 仅用于证明替换操作仍持有当初读取时获得的锁。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasToken(pub(crate) u64);

/// 内容存储 trait
///
/// 定义了目录与块存储所需的全部键值操作，所有后端实现都应该实现此 trait
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// 读取键对应的值
    ///
    /// # 返回
    /// 键不存在时返回 `StorageError::KeyNotFound`
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// 无条件写入（创建或覆盖）
    async fn upsert(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 仅创建写入
    ///
    /// # 返回
    /// 键已存在时返回 `StorageError::KeyAlreadyExists`
    async fn insert(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 锁定并读取，返回当前值与 CAS 令牌
    ///
    /// 锁在 `ttl` 之后自动过期；键已被未过期的锁持有时返回错误。
    async fn lock_and_get(&self, key: &str, ttl: Duration) -> Result<(Vec<u8>, CasToken)>;

    /// 仅当令牌仍然有效时替换值，并释放对应的锁
    ///
    /// # 返回
    /// 令牌不匹配或已过期时返回 `StorageError::CasConflict`
    async fn replace_if_token(&self, key: &str, value: &[u8], token: CasToken) -> Result<()>;

    /// 删除键；键不存在不视为错误
    async fn delete(&self, key: &str) -> Result<()>;
}
