use thiserror::Error;

/// Bigfile 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("路径未找到: {0}")]
    PathNotFound(String),

    #[error("键未找到: {0}")]
    KeyNotFound(String),

    #[error("键已存在: {0}")]
    KeyAlreadyExists(String),

    #[error("校验和不匹配: 期望 {expected}, 实际 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("目录文档并发冲突: {0}")]
    CasConflict(String),

    #[error("不支持的压缩模式: {0}")]
    UnsupportedCompression(String),

    #[error("存储后端错误: {0}")]
    Store(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Store(err.to_string())
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, StorageError>;
