//! 轮询引擎
//!
//! 以固定间隔扫描非终态任务并查询远程状态，推进到终态：
//! - 远程成功 → `Completed`，记录结果文本与 token 用量
//! - 远程失败 → `Failed`，原样记录远程错误信息（不再重试）
//! - 查询本身出错（网络）→ 不转移状态，下个周期重试，不计入重试次数
//!
//! 没有可轮询任务时自动停止并上报最终统计。循环是可取消的周期任务
//! （ticker + 关闭信号），重复启动会先取消旧循环，停止操作幂等。

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{Event, Orchestrator};
use crate::models::{TaskStatus, Usage};
use crate::store::Store;
use crate::InferenceApi;

/// 运行中的轮询循环句柄
pub(crate) struct PollerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<A, S> Orchestrator<A, S>
where
    A: InferenceApi + 'static,
    S: Store + 'static,
{
    /// 启动轮询引擎；若已在运行则先取消旧循环，不会出现并行的轮询
    pub async fn start_polling(&self) {
        let mut guard = self.inner.poller.lock().await;
        if let Some(previous) = guard.take() {
            debug!("轮询引擎已在运行，先取消旧循环");
            let _ = previous.shutdown.send(true);
            previous.handle.abort();
        }

        let orchestrator = self.clone();
        let poll_interval = Duration::from_millis(self.inner.config.poll_interval_ms);
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if orchestrator.poll_tick().await {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("🛑 轮询已停止");
                        break;
                    }
                }
            }
        });

        *guard = Some(PollerHandle { shutdown, handle });
        info!(
            "⏱ 轮询引擎已启动（间隔 {}ms）",
            self.inner.config.poll_interval_ms
        );
    }

    /// 停止轮询；对已停止的引擎调用是无操作
    pub async fn stop_polling(&self) {
        let mut guard = self.inner.poller.lock().await;
        if let Some(previous) = guard.take() {
            let _ = previous.shutdown.send(true);
            previous.handle.abort();
        }
    }

    /// 等待当前轮询循环结束（自动停止或被取消）
    pub async fn join_polling(&self) {
        let taken = { self.inner.poller.lock().await.take() };
        if let Some(PollerHandle { shutdown, handle }) = taken {
            let _ = handle.await;
            // 等待期间保持关闭信号发送端存活，循环才不会被误判为已关闭
            drop(shutdown);
        }
    }

    /// 单个轮询周期；返回 true 表示没有可轮询任务、循环应当结束
    async fn poll_tick(&self) -> bool {
        let pollable = { self.inner.state.lock().await.pollable() };

        if pollable.is_empty() {
            let counts = { self.inner.state.lock().await.counts() };
            info!(
                "🏁 轮询结束: 完成 {} / 失败 {} / 共 {}",
                counts.completed, counts.failed, counts.total
            );
            self.emit(Event::PollingFinished {
                completed: counts.completed,
                failed: counts.failed,
                total: counts.total,
            });
            return true;
        }

        for (local_id, remote_id) in &pollable {
            match self.inner.api.query(remote_id).await {
                Ok(status) => match status.task_status.as_str() {
                    "SUCCESS" => {
                        let text = status
                            .choices
                            .first()
                            .and_then(|c| c.message.content.clone())
                            .unwrap_or_default();
                        let usage = status.usage.map(|u| Usage {
                            total_tokens: u.total_tokens,
                        });
                        {
                            let mut state = self.inner.state.lock().await;
                            if let Some(task) = state.tasks.get_mut(local_id) {
                                if !task.status.is_terminal() {
                                    task.status = TaskStatus::Completed;
                                    task.result = Some(text);
                                    task.usage = usage;
                                }
                            }
                        }
                        self.persist().await;
                        self.emit_row(local_id, TaskStatus::Completed.display_label());
                        info!("[{}] ✅ 任务完成", local_id);
                    }
                    "FAIL" => {
                        let message = status
                            .error
                            .map(|e| e.message)
                            .unwrap_or_else(|| "远程任务失败".to_string());
                        {
                            let mut state = self.inner.state.lock().await;
                            if let Some(task) = state.tasks.get_mut(local_id) {
                                if !task.status.is_terminal() {
                                    task.status = TaskStatus::Failed;
                                    task.result = Some(message.clone());
                                }
                            }
                        }
                        self.persist().await;
                        self.emit_row(local_id, TaskStatus::Failed.display_label());
                        warn!("[{}] ❌ 远程任务失败: {}", local_id, message);
                    }
                    other => {
                        debug!("[{}] 仍在处理中 ({})", local_id, other);
                    }
                },
                Err(e) => {
                    // 瞬时网络错误：不转移状态，也不计入 retry_count
                    warn!("[{}] ⚠️ 状态查询失败，下个周期重试: {}", local_id, e);
                }
            }
        }

        let counts = { self.inner.state.lock().await.counts() };
        self.emit(Event::Progress {
            completed: counts.completed,
            total: counts.total,
        });
        info!("📈 进度: {}/{} 完成", counts.completed, counts.total);

        false
    }
}
