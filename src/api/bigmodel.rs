//! 异步推理 HTTP 客户端
//!
//! 调用兼容智谱开放平台异步接口的服务：
//! - `POST {base}/async/chat/completions` 提交任务
//! - `GET  {base}/async-result/{task_id}` 查询结果

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{InferenceApi, StatusResponse, SubmitRequest, SubmitResponse};
use crate::config::Config;

/// 远程推理 HTTP 客户端
pub struct BigModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BigModelClient {
    /// 从配置创建客户端
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl InferenceApi for BigModelClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse> {
        let url = format!("{}/async/chat/completions", self.base_url);
        debug!("提交推理任务: {} (模型: {})", request.request_id, request.model);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .with_context(|| format!("提交请求失败: {}", url))?
            .error_for_status()
            .with_context(|| format!("提交被远程拒绝: {}", request.request_id))?
            .json::<SubmitResponse>()
            .await
            .context("提交响应解析失败")?;

        debug!("✓ 任务已提交: {} → {}", request.request_id, response.task_id);

        Ok(response)
    }

    async fn query(&self, task_id: &str) -> Result<StatusResponse> {
        let url = format!("{}/async-result/{}", self.base_url, task_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("状态查询失败: {}", task_id))?
            .error_for_status()
            .with_context(|| format!("状态查询被远程拒绝: {}", task_id))?
            .json::<StatusResponse>()
            .await
            .context("状态响应解析失败")?;

        debug!("任务 {} 状态: {}", task_id, response.task_status);

        Ok(response)
    }
}
