//! 内容存储后端实现
//!
//! - `memory`: 进程内 HashMap 后端，用于测试与嵌入场景
//! - `sled`: 嵌入式持久化后端

mod memory;
mod sled;

pub use memory::MemoryStore;
pub use sled::SledStore;
