//! 顶层存储管理器
//!
//! 把写入器、读取器和垃圾回收组合为一个便于持有的入口，
//! 所有状态都在后端与目录文档中，本身可随意克隆。

use crate::BigfileConfig;
use crate::catalog::{CATALOG_KEY, Catalog, Item};
use crate::error::{Result, StorageError};
use crate::gc::GarbageCollector;
use crate::reader::Reader;
use crate::store::ContentStore;
use crate::writer::Writer;
use std::sync::Arc;
use tracing::info;

/// Bigfile 存储管理器
#[derive(Clone)]
pub struct BigfileStorage {
    store: Arc<dyn ContentStore>,
    config: BigfileConfig,
}

impl BigfileStorage {
    pub fn new(store: Arc<dyn ContentStore>, config: BigfileConfig) -> Self {
        Self { store, config }
    }

    /// 当前配置
    pub fn config(&self) -> &BigfileConfig {
        &self.config
    }

    /// 为路径开启一个新版本的写入
    pub fn open_writer(&self, path: &str) -> Writer {
        Writer::new(self.store.clone(), self.config.clone(), path)
    }

    /// 开启路径最新版本的读取
    pub fn open_reader(&self, path: &str) -> Reader {
        Reader::new(self.store.clone(), self.config.clone(), path)
    }

    /// 一次性写入：保存整段数据为路径的新版本
    pub async fn save(&self, path: &str, data: &[u8]) -> Result<Item> {
        let mut writer = self.open_writer(path);
        writer.write(data).await?;
        writer.close().await
    }

    /// 一次性读取：取回路径最新版本的全部数据并校验完整性
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.open_reader(path);
        let data = reader.read_to_end().await?;
        reader.close()?;
        Ok(data)
    }

    /// 独立垃圾回收：加载目录（不加锁）、重建后清扫孤块
    ///
    /// 目录尚不存在时无事可做。清扫范围仅限本次加载的目录快照
    /// 引用过的块，并发写入者未发布的块不受影响。
    pub async fn garbage_collect(&self) -> Result<usize> {
        let doc = match self.store.get(CATALOG_KEY).await {
            Ok(doc) => doc,
            Err(StorageError::KeyNotFound(_)) => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut catalog = Catalog::from_bytes(&doc)?;
        catalog.rebuild(self.config.retention);
        let deleted = GarbageCollector::new(self.store.as_ref(), &catalog)
            .sweep()
            .await?;
        info!("独立垃圾回收: 删除 {} 个块", deleted);
        Ok(deleted)
    }

    /// 加载并重建当前目录快照（不加锁，供巡检与版本查询）
    pub async fn load_catalog(&self) -> Result<Catalog> {
        let doc = self.store.get(CATALOG_KEY).await?;
        let mut catalog = Catalog::from_bytes(&doc)?;
        catalog.rebuild(self.config.retention);
        Ok(catalog)
    }
}
