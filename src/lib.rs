//! Silent Bigfile: 基于通用 KV 后端的内容寻址分块对象存储
//!
//! 该模块提供大对象的分块版本化存储功能，包括：
//! - 固定大小分块与 SHA-256 内容寻址（幂等上传，跨版本/跨对象隐式去重）
//! - 单一共享目录文档，按路径保留有限的版本历史
//! - 排他锁 + CAS 令牌保护的目录发布事务
//! - 标记-清除垃圾回收，清理不再被保留版本引用的块
//!
//! ## 架构设计
//!
//! ```text
//! silent-bigfile/
//! |-- store       # ContentStore trait（KV 后端接口）
//! |-- backend/    # 后端实现
//! |   |-- memory  # 进程内 HashMap
//! |   |-- sled    # 嵌入式持久化
//! |-- catalog     # Chunk / Item / Catalog 与版本保留
//! |-- writer      # 分块写入与发布事务
//! |-- reader      # 顺序块读取与完整性校验
//! |-- gc          # 孤块清扫
//! |-- storage     # 顶层 API
//! ```

mod error;

pub mod backend;
pub mod catalog;
pub mod gc;
pub mod reader;
pub mod storage;
pub mod store;
pub mod writer;

pub use error::{Result, StorageError};

// 重新导出公共类型
pub use backend::{MemoryStore, SledStore};
pub use catalog::{CATALOG_KEY, Catalog, Chunk, Compression, Item, chunk_key};
pub use gc::GarbageCollector;
pub use reader::Reader;
pub use storage::BigfileStorage;
pub use store::{CasToken, ContentStore};
pub use writer::Writer;

use serde::{Deserialize, Serialize};

/// Bigfile 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigfileConfig {
    /// 分块大小（字节）
    pub chunk_size: usize,
    /// 每路径保留的版本数
    pub retention: usize,
    /// 目录锁 TTL（秒）
    pub lock_ttl_secs: u64,
}

impl Default for BigfileConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500_000,
            retention: 3,
            lock_ttl_secs: 10,
        }
    }
}
