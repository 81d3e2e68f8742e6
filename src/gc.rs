//! 标记-清除垃圾回收
//!
//! 标记阶段由 [`Catalog::rebuild`] 完成：被保留版本引用的块被标记，
//! 其余留在清扫范围内的块视为孤块。清扫阶段逐个删除孤块键。

use crate::catalog::{Catalog, chunk_key};
use crate::error::Result;
use crate::store::ContentStore;
use tracing::{debug, info};

/// 垃圾回收器
///
/// 必须基于一个刚完成 `rebuild` 的 Catalog 构造，且只能在触发本次回收的
/// 发布事务 CAS 写回成功之后运行。清扫范围仅限该 Catalog 实例见过的
/// 块校验和，没有独立的全量块清单。并发写入者未发布的块不在此范围内，
/// 跨写入者的竞争窗口见设计文档。
pub struct GarbageCollector<'a> {
    store: &'a dyn ContentStore,
    catalog: &'a Catalog,
}

impl<'a> GarbageCollector<'a> {
    pub fn new(store: &'a dyn ContentStore, catalog: &'a Catalog) -> Self {
        Self { store, catalog }
    }

    /// 删除所有未被保留版本引用的块，返回删除数量
    ///
    /// 单个删除失败即中止剩余清扫并上抛；已删除的块保持删除，
    /// 残留孤块等待未来的清扫。
    pub async fn sweep(&self) -> Result<usize> {
        let mut deleted = 0;
        for (checksum, used) in self.catalog.chunk_marks() {
            if !used {
                self.store.delete(&chunk_key(checksum)).await?;
                deleted += 1;
                debug!("删除未引用块: checksum={}", checksum);
            }
        }
        if deleted > 0 {
            info!("垃圾回收完成: 删除 {} 个块", deleted);
        }
        Ok(deleted)
    }
}
