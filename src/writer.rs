//! 分块写入器
//!
//! 把输入字节流切分为固定大小的块，按内容寻址上传，
//! 关闭时在目录锁保护下发布新版本并触发垃圾回收。

use crate::BigfileConfig;
use crate::catalog::{CATALOG_KEY, Catalog, Chunk, Item, chunk_key};
use crate::error::{Result, StorageError};
use crate::gc::GarbageCollector;
use crate::store::ContentStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// 分块写入器
///
/// 单调用方同步使用。`write` 出错后流进入不可重试状态，调用方必须放弃；
/// 已上传的块不会回滚，留待后续垃圾回收清理。
///
/// 已知风险：发布事务持续时间超过目录锁 TTL 时不再保证互斥。
pub struct Writer {
    store: Arc<dyn ContentStore>,
    config: BigfileConfig,
    item: Item,
    hasher: Sha256,
    buffer: Vec<u8>,
}

impl Writer {
    /// 为 `path` 开启一个新的对象版本
    pub fn new(store: Arc<dyn ContentStore>, config: BigfileConfig, path: &str) -> Self {
        let buffer = Vec::with_capacity(config.chunk_size);
        Self {
            store,
            config,
            item: Item::new(path),
            hasher: Sha256::new(),
            buffer,
        }
    }

    /// 追加数据
    ///
    /// 缓冲区被填满到容量即落一个块，单次调用可以产出任意多个完整块，
    /// 结束时至多留下一个未封口的部分缓冲。缓冲本身不会失败，
    /// 只有块上传可能出错。
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let total = data.len();
        let mut rest = data;
        while !rest.is_empty() {
            let remaining = self.config.chunk_size - self.buffer.len();
            if rest.len() < remaining {
                self.buffer.extend_from_slice(rest);
                break;
            }
            let (fill, tail) = rest.split_at(remaining);
            self.buffer.extend_from_slice(fill);
            self.flush_chunk().await?;
            rest = tail;
        }
        Ok(total)
    }

    /// 把当前缓冲封为一个块：内容寻址、登记到 Item、幂等上传
    async fn flush_chunk(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let checksum = hex::encode(Sha256::digest(&self.buffer));
        self.item.chunks.push(Chunk {
            size: self.buffer.len() as u64,
            checksum: checksum.clone(),
        });
        self.item.total_size += self.buffer.len() as u64;
        self.hasher.update(&self.buffer);
        debug!("写入块: size={} checksum={}", self.buffer.len(), checksum);
        self.store.upsert(&chunk_key(&checksum), &self.buffer).await?;
        self.buffer.clear();
        Ok(())
    }

    /// 关闭流：刷出尾块、封口对象校验和、发布到目录并触发垃圾回收
    ///
    /// 返回已发布的 Item（含分配的版本号）。任一阶段的首个错误直接上抛，
    /// 已产生的部分副作用不回滚。
    pub async fn close(mut self) -> Result<Item> {
        self.flush_chunk().await?;
        self.item.checksum = hex::encode(std::mem::take(&mut self.hasher).finalize());
        let catalog = self.publish().await?;
        GarbageCollector::new(self.store.as_ref(), &catalog)
            .sweep()
            .await?;
        info!(
            "写入完成: path={} version={} size={} chunks={}",
            self.item.path,
            self.item.version,
            self.item.total_size,
            self.item.chunks.len()
        );
        Ok(self.item)
    }

    /// 发布事务：锁定读取目录、两次 rebuild 夹一次追加、CAS 写回
    ///
    /// CAS 令牌失配（并发写入者抢先）上抛 `CasConflict`，不做内部重试，
    /// 调用方如需重试必须重启整个写入。
    async fn publish(&mut self) -> Result<Catalog> {
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        let (doc, token) = match self.store.lock_and_get(CATALOG_KEY, ttl).await {
            Ok(locked) => locked,
            Err(StorageError::KeyNotFound(_)) => {
                // 首次发布：插入空占位目录后重试锁定一次
                let empty = Catalog::default().to_bytes()?;
                match self.store.insert(CATALOG_KEY, &empty).await {
                    Ok(()) | Err(StorageError::KeyAlreadyExists(_)) => {}
                    Err(e) => {
                        error!("无法创建占位目录: {}", e);
                        return Err(e);
                    }
                }
                self.store.lock_and_get(CATALOG_KEY, ttl).await?
            }
            Err(e) => {
                error!("无法锁定目录: {}", e);
                return Err(e);
            }
        };

        let mut catalog = Catalog::from_bytes(&doc)?;
        // 第一次 rebuild 初始化派生索引
        catalog.rebuild(self.config.retention);
        let version = catalog.add_new_item(self.item.clone());
        self.item.version = version;
        // 第二次 rebuild 把新版本纳入索引并立即执行保留压实
        catalog.rebuild(self.config.retention);

        self.store
            .replace_if_token(CATALOG_KEY, &catalog.to_bytes()?, token)
            .await?;
        debug!(
            "目录已更新: path={} version={} items={}",
            self.item.path,
            version,
            catalog.items.len()
        );
        Ok(catalog)
    }
}
