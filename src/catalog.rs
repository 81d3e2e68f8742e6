//! 目录文档与版本管理
//!
//! Catalog 是唯一的共享根文档，以 JSON 形式持久化在固定键下，
//! 记录所有路径当前保留的 Item 版本。按路径的索引和块引用标记
//! 都是进程内派生状态，加载后必须先 `rebuild` 再使用，绝不持久化。

use crate::error::{Result, StorageError};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// 目录文档的固定键
pub const CATALOG_KEY: &str = "bigfile-catalog";

/// 根据块校验和推导存储键（校验和的纯函数）
pub fn chunk_key(checksum: &str) -> String {
    format!("bigfile-chunk-{checksum}")
}

/// 压缩模式
///
/// 目前仅 `None` 有定义的读写语义，`Zlib` 仅作为数据模型中的预留值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zlib,
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Zlib => write!(f, "zlib"),
        }
    }
}

/// 内容寻址块引用
///
/// `checksum` 是块负载的小写十六进制 SHA-256 摘要，同时决定存储键。
/// 校验和相同的两个块按定义内容完全一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 块负载大小（字节）
    pub size: u64,
    /// 块负载的 SHA-256 摘要
    pub checksum: String,
}

/// 对象的一个不可变版本
///
/// 同一路径可以共存多个版本；`version` 从 0 开始，每次发布递增 1，
/// 即使旧版本被保留策略裁剪也不会复用。发布之后不再变更。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// 逻辑路径（任意字符串键，不唯一）
    pub path: String,
    /// 版本号，按路径单调递增
    pub version: u64,
    /// Writer 创建时刻
    pub creation_time: NaiveDateTime,
    /// 压缩模式
    pub compression: Compression,
    /// 所有块大小之和
    pub total_size: u64,
    /// 整个对象（按序拼接的全部块负载）的 SHA-256 摘要
    pub checksum: String,
    /// 有序块列表，顺序即原始字节流顺序
    pub chunks: Vec<Chunk>,
}

impl Item {
    /// 创建一个空的新版本，校验和在流关闭时封口
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            version: 0,
            creation_time: Local::now().naive_local(),
            compression: Compression::None,
            total_size: 0,
            checksum: String::new(),
            chunks: Vec::new(),
        }
    }
}

/// 共享目录文档
///
/// 持久化的只有扁平的 `items` 列表；`items_by_path` 与 `chunk_marks`
/// 每次加载后由 [`Catalog::rebuild`] 重建。
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// 所有保留的 Item（跨路径、追加有序）
    pub items: Vec<Item>,

    /// path -> items 下标索引（版本升序），派生状态
    #[serde(skip)]
    items_by_path: HashMap<String, Vec<usize>>,

    /// 本实例见过的所有块校验和 -> 是否被保留版本引用
    ///
    /// 键集合在同一实例的多次 rebuild 之间累积，保证被前一次
    /// rebuild 裁剪掉的版本所引用的块仍留在清扫范围内。
    #[serde(skip)]
    chunk_marks: HashMap<String, bool>,
}

impl Catalog {
    /// 从持久化文档反序列化；空文档视为空目录（占位文档）
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Catalog::default());
        }
        Ok(serde_json::from_slice(data)?)
    }

    /// 序列化为持久化文档（仅扁平列表）
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 重建派生状态并执行保留压实
    ///
    /// O(items)。扫描扁平列表：
    /// 1. 把所有出现过的块校验和登记进 `chunk_marks`（标记先全部清为未引用）；
    /// 2. 每路径只保留最近 `retention` 个版本，扁平列表按原顺序重写；
    /// 3. 按幸存列表重建路径索引，并把幸存版本引用的块标记为已引用。
    ///
    /// 对同一持久化输入幂等，可任意次调用。
    pub fn rebuild(&mut self, retention: usize) {
        for used in self.chunk_marks.values_mut() {
            *used = false;
        }

        // 每路径条目总数，用于判定"最近 retention 个"
        let mut counts: HashMap<String, usize> = HashMap::new();
        for item in &self.items {
            *counts.entry(item.path.clone()).or_insert(0) += 1;
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut retained = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            for chunk in &item.chunks {
                self.chunk_marks.entry(chunk.checksum.clone()).or_insert(false);
            }
            let idx = {
                let e = seen.entry(item.path.clone()).or_insert(0);
                let idx = *e;
                *e += 1;
                idx
            };
            if idx + retention >= counts[&item.path] {
                retained.push(item);
            } else {
                debug!("保留压实裁剪版本: path={} version={}", item.path, item.version);
            }
        }
        self.items = retained;

        self.items_by_path.clear();
        for (i, item) in self.items.iter().enumerate() {
            self.items_by_path
                .entry(item.path.clone())
                .or_default()
                .push(i);
            for chunk in &item.chunks {
                self.chunk_marks.insert(chunk.checksum.clone(), true);
            }
        }
        debug!(
            "目录重建完成: items={} paths={} chunks={}",
            self.items.len(),
            self.items_by_path.len(),
            self.chunk_marks.len()
        );
    }

    /// 追加一个新 Item 并分配版本号
    ///
    /// 版本号取自当前内存索引中该路径的最新版本 + 1（首个版本为 0）。
    /// 不在此处执行保留压实，留给下一次 `rebuild`。
    pub fn add_new_item(&mut self, mut item: Item) -> u64 {
        let version = self
            .items_by_path
            .get(&item.path)
            .and_then(|indices| indices.last())
            .map(|&i| self.items[i].version + 1)
            .unwrap_or(0);
        item.version = version;
        let path = item.path.clone();
        self.items.push(item);
        let idx = self.items.len() - 1;
        self.items_by_path.entry(path).or_default().push(idx);
        version
    }

    /// 查找路径的最新版本
    ///
    /// 返回路径索引的最后一个条目，按构造即该路径数值最大的版本。
    /// 路径从未发布或全部版本已被保留策略裁剪时返回 `PathNotFound`。
    pub fn find_item(&self, path: &str) -> Result<&Item> {
        self.items_by_path
            .get(path)
            .and_then(|indices| indices.last())
            .map(|&i| &self.items[i])
            .ok_or_else(|| StorageError::PathNotFound(path.to_string()))
    }

    /// 路径当前保留的全部版本（版本升序）
    pub fn history(&self, path: &str) -> Vec<&Item> {
        self.items_by_path
            .get(path)
            .map(|indices| indices.iter().map(|&i| &self.items[i]).collect())
            .unwrap_or_default()
    }

    /// rebuild 之后的块标记视图（校验和 -> 是否被保留版本引用）
    pub(crate) fn chunk_marks(&self) -> &HashMap<String, bool> {
        &self.chunk_marks
    }
}
