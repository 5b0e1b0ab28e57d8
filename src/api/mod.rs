//! 远程推理 API
//!
//! 异步推理接口的线上数据结构与客户端抽象：
//! - 提交调用：`{model, temperature, messages, request_id}` → `{task_id}`
//! - 状态调用：`task_id` → `{task_status, choices, usage, error}`
//!
//! `InferenceApi` 是客户端接缝，测试中用脚本化的假实现替换真实 HTTP 客户端。

pub mod bigmodel;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use bigmodel::BigModelClient;

/// 聊天消息
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// 提交请求体
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    pub request_id: String,
}

/// 提交响应体
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// 状态响应体
///
/// `task_status` 取值 `SUCCESS` / `FAIL`，其余值视为仍在处理中。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    pub task_status: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<UsagePayload>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UsagePayload {
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteError {
    pub message: String,
}

/// 远程推理客户端能力
#[async_trait]
pub trait InferenceApi: Send + Sync {
    /// 提交一个异步推理任务，返回远程任务 id
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse>;

    /// 查询远程任务状态
    async fn query(&self, task_id: &str) -> Result<StatusResponse>;
}
