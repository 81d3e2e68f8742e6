//! 分块读取器
//!
//! 惰性解析目录中路径的最新版本，按块顺序拉取负载拼回字节流，
//! 关闭时校验整个对象的 SHA-256 摘要。

use crate::BigfileConfig;
use crate::catalog::{CATALOG_KEY, Catalog, Compression, Item, chunk_key};
use crate::error::{Result, StorageError};
use crate::store::ContentStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info};

/// 分块读取器
///
/// 单调用方同步使用。目录访问推迟到第一次 `read`，读取不加锁。
pub struct Reader {
    store: Arc<dyn ContentStore>,
    config: BigfileConfig,
    path: String,
    item: Option<Item>,
    next_chunk: usize,
    buffer: Vec<u8>,
    hasher: Sha256,
}

impl Reader {
    /// 为 `path` 开启读取
    pub fn new(store: Arc<dyn ContentStore>, config: BigfileConfig, path: &str) -> Self {
        Self {
            store,
            config,
            path: path.to_string(),
            item: None,
            next_chunk: 0,
            buffer: Vec::new(),
            hasher: Sha256::new(),
        }
    }

    /// 读取至多 `buf.len()` 字节
    ///
    /// 首次调用加载并重建目录、解析路径的最新版本。之后维护块游标与
    /// 内部累积缓冲：缓冲不足以满足请求且仍有未读块时，按块顺序
    /// 拉取下一块并喂入运行中的对象摘要。返回 `Ok(0)` 表示流结束。
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.item.is_none() {
            self.resolve_item().await?;
        }

        while self.buffer.len() < buf.len() {
            let chunk = match self
                .item
                .as_ref()
                .and_then(|item| item.chunks.get(self.next_chunk))
            {
                Some(chunk) => chunk.clone(),
                None => break, // 块已读尽
            };
            self.next_chunk += 1;
            debug!("拉取块: checksum={} size={}", chunk.checksum, chunk.size);
            let data = self.store.get(&chunk_key(&chunk.checksum)).await?;
            self.hasher.update(&data);
            self.buffer.extend_from_slice(&data);
        }

        let n = buf.len().min(self.buffer.len());
        buf[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.drain(..n);
        if n < buf.len() {
            debug!("到达流末尾: path={}", self.path);
        }
        Ok(n)
    }

    /// 读取剩余全部字节
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// 关闭流并校验完整性
    ///
    /// 比较实际读到的字节累积出的摘要与 Item 记录的对象校验和。
    /// 只有读到流末尾时此校验才有意义；提前关闭无法发现未读块的损坏。
    /// 从未读取过的 Reader 关闭时不做校验。
    pub fn close(self) -> Result<()> {
        let Some(item) = self.item else {
            return Ok(());
        };
        let actual = hex::encode(self.hasher.finalize());
        if actual != item.checksum {
            error!(
                "对象校验和不匹配: path={} 期望={} 实际={}",
                item.path, item.checksum, actual
            );
            return Err(StorageError::ChecksumMismatch {
                expected: item.checksum,
                actual,
            });
        }
        info!("对象校验通过: path={} checksum={}", item.path, item.checksum);
        Ok(())
    }

    /// 加载目录（不加锁）、重建派生状态并定位路径的最新版本
    async fn resolve_item(&mut self) -> Result<()> {
        let doc = match self.store.get(CATALOG_KEY).await {
            Ok(doc) => doc,
            Err(StorageError::KeyNotFound(_)) => {
                // 目录尚不存在，等价于路径未发布
                return Err(StorageError::PathNotFound(self.path.clone()));
            }
            Err(e) => {
                error!("无法读取目录: {}", e);
                return Err(e);
            }
        };
        let mut catalog = Catalog::from_bytes(&doc)?;
        catalog.rebuild(self.config.retention);
        let item = catalog.find_item(&self.path)?.clone();
        if item.compression != Compression::None {
            return Err(StorageError::UnsupportedCompression(
                item.compression.to_string(),
            ));
        }
        debug!(
            "定位到目录条目: path={} version={} chunks={}",
            item.path,
            item.version,
            item.chunks.len()
        );
        self.item = Some(item);
        Ok(())
    }
}
