//! 提交管线
//!
//! 把全部待提交请求推进为已提交任务：
//! 1. **窗口限并发**：按固定窗口分批，窗口内并发提交，整窗结束（成功或
//!    重试耗尽）后才开始下一窗，任意时刻在途提交数不超过窗口大小
//! 2. **单请求重试**：最多尝试 `max_retries + 1` 次，线性退避
//!    （第 n 次失败后等待 `n * retry_backoff_ms`）
//! 3. **终态记录**：重试耗尽转 `Failed`，错误文本写入 result，
//!    单条失败不会中断整个批次
//!
//! 每次状态转移后立即写快照并发出行级事件。

use anyhow::Result;
use futures::future::join_all;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::Orchestrator;
use crate::api::{ChatMessage, SubmitRequest};
use crate::models::{Request, Task, TaskStatus, PLACEHOLDER};
use crate::store::Store;
use crate::utils::logging;
use crate::InferenceApi;

/// 一次批量提交的统计
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOutcome {
    /// 成功提交（进入 Processing）的请求数
    pub submitted: usize,
    /// 重试耗尽后放弃的请求数
    pub failed: usize,
    /// 已提交过、本次跳过的请求数
    pub skipped: usize,
}

impl<A, S> Orchestrator<A, S>
where
    A: InferenceApi + 'static,
    S: Store + 'static,
{
    /// 提交全部待处理请求，窗口内并发、窗口间串行
    ///
    /// 结束后自动启动轮询引擎。已提交过的请求（已有远程任务 id 或已到
    /// 终态）不会重复提交，恢复场景下保持至多一次提交。
    pub async fn submit_all(&self) -> Result<SubmitOutcome> {
        let (pending, skipped) = {
            let state = self.inner.state.lock().await;
            let pending: Vec<Request> = state
                .requests
                .iter()
                .filter(|r| match state.tasks.get(&r.local_id) {
                    None => true,
                    // 退避等待期间落盘的任务恢复后是 Retrying 且无远程 id，
                    // 必须重新进入管线，否则永远停在非终态
                    Some(t) => {
                        matches!(t.status, TaskStatus::Pending | TaskStatus::Retrying)
                            && t.remote_task_id.is_none()
                    }
                })
                .cloned()
                .collect();
            let skipped = state.requests.len() - pending.len();
            (pending, skipped)
        };

        if pending.is_empty() {
            info!("没有待提交的请求");
            let pollable = self.inner.state.lock().await.pollable().len();
            if pollable > 0 {
                self.start_polling().await;
            }
            return Ok(SubmitOutcome {
                skipped,
                ..Default::default()
            });
        }

        // 为进入管线的请求建立任务记录
        {
            let mut state = self.inner.state.lock().await;
            for request in &pending {
                state
                    .tasks
                    .entry(request.local_id.clone())
                    .or_insert_with(Task::new);
            }
        }
        for request in &pending {
            self.emit_row(&request.local_id, TaskStatus::Pending.display_label());
        }
        self.persist().await;

        let window = self.inner.config.window_size.max(1);
        let total = pending.len();
        let total_batches = (total + window - 1) / window;
        info!("🚀 开始提交 {} 条请求，窗口大小 {}", total, window);

        let mut outcome = SubmitOutcome {
            skipped,
            ..Default::default()
        };

        for (batch_idx, chunk) in pending.chunks(window).enumerate() {
            logging::log_batch_start(
                batch_idx + 1,
                total_batches,
                batch_idx * window + 1,
                batch_idx * window + chunk.len(),
                total,
            );

            let results = join_all(chunk.iter().map(|r| self.submit_one(r))).await;
            let success = results.into_iter().filter(|ok| *ok).count();
            outcome.submitted += success;
            outcome.failed += chunk.len() - success;

            logging::log_batch_complete(batch_idx + 1, success, chunk.len());
        }

        self.start_polling().await;
        Ok(outcome)
    }

    /// 提交单条请求，带重试退避；返回是否成功进入 Processing
    async fn submit_one(&self, request: &Request) -> bool {
        let payload = {
            let state = self.inner.state.lock().await;
            match (
                state.find_input(&request.input_id),
                state.find_template(&request.template_id),
            ) {
                (Some(input), Some(template)) => {
                    let mut messages = Vec::new();
                    if !template.system_prompt.trim().is_empty() {
                        messages.push(ChatMessage::system(&template.system_prompt));
                    }
                    messages.push(ChatMessage::user(
                        template.user_prompt_template.replace(PLACEHOLDER, &input.content),
                    ));
                    Some(SubmitRequest {
                        model: template.model.clone(),
                        temperature: template.temperature,
                        messages,
                        request_id: request.local_id.clone(),
                    })
                }
                _ => None,
            }
        };

        let Some(payload) = payload else {
            self.mark_failed(&request.local_id, "输入或模板已被删除").await;
            return false;
        };

        let total_attempts = self.inner.config.max_retries + 1;
        for attempt in 1..=total_attempts {
            self.emit_row(
                &request.local_id,
                format!("提交中 (尝试 {}/{})…", attempt, total_attempts),
            );

            match self.inner.api.submit(&payload).await {
                Ok(response) => {
                    {
                        let mut state = self.inner.state.lock().await;
                        if let Some(task) = state.tasks.get_mut(&request.local_id) {
                            task.status = TaskStatus::Processing;
                            task.remote_task_id = Some(response.task_id.clone());
                        }
                    }
                    self.persist().await;
                    self.emit_row(&request.local_id, TaskStatus::Processing.display_label());
                    info!(
                        "[{}] ✓ 已提交，远程任务: {}",
                        request.local_id, response.task_id
                    );
                    return true;
                }
                Err(e) if attempt < total_attempts => {
                    {
                        let mut state = self.inner.state.lock().await;
                        if let Some(task) = state.tasks.get_mut(&request.local_id) {
                            task.status = TaskStatus::Retrying;
                            task.retry_count = attempt;
                        }
                    }
                    self.persist().await;
                    self.emit_row(&request.local_id, TaskStatus::Retrying.display_label());

                    let backoff =
                        Duration::from_millis(self.inner.config.retry_backoff_ms * attempt as u64);
                    warn!(
                        "[{}] ⚠️ 提交失败（第 {}/{} 次尝试）: {}，{}ms 后重试",
                        request.local_id,
                        attempt,
                        total_attempts,
                        e,
                        backoff.as_millis()
                    );
                    sleep(backoff).await;
                }
                Err(e) => {
                    error!("[{}] ❌ 重试耗尽，放弃提交: {}", request.local_id, e);
                    self.mark_failed(&request.local_id, &format!("提交失败: {}", e))
                        .await;
                    return false;
                }
            }
        }

        false
    }

    /// 把任务标记为终态 Failed，错误文本记入 result
    async fn mark_failed(&self, local_id: &str, message: &str) {
        {
            let mut state = self.inner.state.lock().await;
            let task = state
                .tasks
                .entry(local_id.to_string())
                .or_insert_with(Task::new);
            if !task.status.is_terminal() {
                task.status = TaskStatus::Failed;
                task.result = Some(message.to_string());
            }
        }
        self.persist().await;
        self.emit_row(local_id, TaskStatus::Failed.display_label());
    }
}
