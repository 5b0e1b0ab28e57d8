//! 基于 JSON 文件的快照存储

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use super::{Snapshot, Store};

/// 将快照以 JSON 文档形式写入单个文件
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).context("快照序列化失败")?;

        // 先写临时文件再原子替换，避免写入中断留下半截快照
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)
            .await
            .with_context(|| format!("写入快照失败: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("替换快照失败: {}", self.path.display()))?;

        debug!("💾 已保存快照: {} 条请求", snapshot.requests.len());

        Ok(())
    }

    async fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("读取快照失败: {}", self.path.display()))?;

        let snapshot: Snapshot =
            serde_json::from_str(&content).context("快照反序列化失败")?;

        Ok(Some(snapshot))
    }
}
