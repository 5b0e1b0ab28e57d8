//! 持久化与恢复
//!
//! `Store` 抽象快照的存取，后端介质可替换（文件、嵌入式数据库等）。
//! 快照是编排状态的完整序列化，每次状态变更后立即写入，
//! 不做批量/延迟写，保证重载后可完整恢复。

pub mod file_store;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Input, Request, Task, Template};

pub use file_store::FileStore;

/// 编排状态的完整快照
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub requests: Vec<Request>,
    pub tasks: HashMap<String, Task>,
    pub inputs: Vec<Input>,
    pub templates: Vec<Template>,
    /// ISO-8601 时间戳
    pub timestamp: String,
}

/// 快照存储能力
#[async_trait]
pub trait Store: Send + Sync {
    /// 写入快照，覆盖旧快照
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// 读取最近一次快照，不存在时返回 None
    async fn load(&self) -> Result<Option<Snapshot>>;
}
