//! 批量推理编排器 - 核心层
//!
//! ## 职责
//!
//! 编排器独占持有四类集合（输入、模板、请求、任务），对外只暴露操作接口，
//! 外部协作方（界面层）只读投影、通过操作接口发起增删。
//!
//! ## 核心功能
//!
//! 1. **注册表管理**：录入输入与模板，校验在边界同步完成
//! 2. **请求矩阵构建**：范围表达式 × 模板 → 去重后的请求列表
//! 3. **提交管线**：固定窗口限并发 + 单请求重试退避（见 `pipeline`）
//! 4. **轮询引擎**：可取消的周期任务，推进任务到终态（见 `poller`）
//! 5. **持久化**：每次状态变更后立即写快照，重载后可完整恢复
//! 6. **事件通知**：行级状态与聚合进度经 channel 发给展示层

pub mod pipeline;
pub mod poller;
pub mod range;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ValidationError;
use crate::export::{self, ExportRow};
use crate::models::{
    id_seq, presets, validate_template, Input, NewTemplate, Request, Task, TaskStatus, Template,
};
use crate::store::{Snapshot, Store};
use crate::InferenceApi;
use poller::PollerHandle;

pub use range::parse_range_expr;

/// 编排器发出的状态变更通知，由（排除在外的）展示层消费
#[derive(Debug, Clone)]
pub enum Event {
    /// 单行任务状态更新
    RowStatus { local_id: String, label: String },
    /// 聚合进度更新（每个轮询周期一次）
    Progress { completed: usize, total: usize },
    /// 轮询自动结束后的最终统计
    PollingFinished {
        completed: usize,
        failed: usize,
        total: usize,
    },
}

/// 任务状态统计
///
/// 不变量：`completed + failed + pending + processing + retrying == total`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl TaskCounts {
    /// 仍在途（未到终态）的数量
    pub fn in_flight(&self) -> usize {
        self.pending + self.processing + self.retrying
    }
}

/// 请求矩阵构建结果：请求的索引数 vs 实际新增数（重复配对被静默跳过）
#[derive(Debug, Clone, Copy)]
pub struct BuildOutcome {
    pub requested: usize,
    pub added: usize,
}

/// 快照恢复结果
#[derive(Debug, Clone)]
pub struct RecoverOutcome {
    pub requests: usize,
    pub tasks: usize,
    /// 恢复后仍需继续轮询的任务数
    pub pollable: usize,
    pub timestamp: String,
}

/// 编排器内部状态：四类集合 + id 计数器
#[derive(Debug, Default)]
pub(crate) struct BatchState {
    pub inputs: Vec<Input>,
    pub templates: Vec<Template>,
    pub requests: Vec<Request>,
    pub tasks: HashMap<String, Task>,
    next_input_seq: u64,
    next_template_seq: u64,
    next_request_seq: u64,
}

impl BatchState {
    fn next_input_id(&mut self) -> String {
        self.next_input_seq += 1;
        format!("input-{}", self.next_input_seq)
    }

    fn next_template_id(&mut self) -> String {
        self.next_template_seq += 1;
        format!("tpl-{}", self.next_template_seq)
    }

    fn next_request_id(&mut self) -> String {
        self.next_request_seq += 1;
        format!("req-{}", self.next_request_seq)
    }

    pub(crate) fn find_input(&self, id: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.id == id)
    }

    pub(crate) fn find_template(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    fn has_pair(&self, input_id: &str, template_id: &str) -> bool {
        self.requests
            .iter()
            .any(|r| r.input_id == input_id && r.template_id == template_id)
    }

    /// 删除一批请求及其任务记录
    fn remove_requests<F: Fn(&Request) -> bool>(&mut self, predicate: F) -> usize {
        let doomed: Vec<String> = self
            .requests
            .iter()
            .filter(|r| predicate(r))
            .map(|r| r.local_id.clone())
            .collect();
        for local_id in &doomed {
            self.tasks.remove(local_id);
        }
        self.requests.retain(|r| !doomed.contains(&r.local_id));
        doomed.len()
    }

    pub(crate) fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts {
            total: self.requests.len(),
            ..Default::default()
        };
        for request in &self.requests {
            match self.tasks.get(&request.local_id).map(|t| t.status) {
                // 尚未进入管线的请求视同排队中
                None | Some(TaskStatus::Pending) => counts.pending += 1,
                Some(TaskStatus::Processing) => counts.processing += 1,
                Some(TaskStatus::Retrying) => counts.retrying += 1,
                Some(TaskStatus::Completed) => counts.completed += 1,
                Some(TaskStatus::Failed) => counts.failed += 1,
            }
        }
        counts
    }

    /// 需要轮询的任务：状态为 Processing/Retrying 且已知远程任务 id
    pub(crate) fn pollable(&self) -> Vec<(String, String)> {
        self.tasks
            .iter()
            .filter(|(_, t)| {
                matches!(t.status, TaskStatus::Processing | TaskStatus::Retrying)
                    && t.remote_task_id.is_some()
            })
            .filter_map(|(id, t)| t.remote_task_id.clone().map(|r| (id.clone(), r)))
            .collect()
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            requests: self.requests.clone(),
            tasks: self.tasks.clone(),
            inputs: self.inputs.clone(),
            templates: self.templates.clone(),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 从已恢复的集合反推 id 计数器，保证后续分配不与旧 id 冲突
    fn restore_seqs(&mut self) {
        self.next_input_seq = self.inputs.iter().map(|i| id_seq(&i.id)).max().unwrap_or(0);
        self.next_template_seq = self
            .templates
            .iter()
            .map(|t| id_seq(&t.id))
            .max()
            .unwrap_or(0);
        self.next_request_seq = self
            .requests
            .iter()
            .map(|r| id_seq(&r.local_id))
            .max()
            .unwrap_or(0);
    }
}

pub(crate) struct Inner<A, S> {
    pub(crate) config: Config,
    pub(crate) api: A,
    pub(crate) store: S,
    pub(crate) state: Mutex<BatchState>,
    pub(crate) events: mpsc::UnboundedSender<Event>,
    pub(crate) poller: Mutex<Option<PollerHandle>>,
}

/// 批量推理编排器
///
/// 单个用户会话内只应存在一个活跃实例。克隆是浅拷贝，共享同一份状态。
pub struct Orchestrator<A, S> {
    pub(crate) inner: Arc<Inner<A, S>>,
}

impl<A, S> Clone for Orchestrator<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, S> Orchestrator<A, S>
where
    A: InferenceApi + 'static,
    S: Store + 'static,
{
    /// 创建编排器，返回实例与事件接收端
    pub fn new(config: Config, api: A, store: S) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let orchestrator = Self {
            inner: Arc::new(Inner {
                config,
                api,
                store,
                state: Mutex::new(BatchState::default()),
                events,
                poller: Mutex::new(None),
            }),
        };
        (orchestrator, receiver)
    }

    // ========== 注册表操作 ==========

    /// 录入一条输入文本
    pub async fn add_input(&self, content: &str) -> Result<Input> {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }

        let input = {
            let mut state = self.inner.state.lock().await;
            let input = Input {
                id: state.next_input_id(),
                content: content.to_string(),
            };
            state.inputs.push(input.clone());
            input
        };

        self.persist().await;
        Ok(input)
    }

    /// 录入一个模板，校验失败则同步拒绝
    pub async fn add_template(&self, def: NewTemplate) -> Result<Template> {
        validate_template(&def)?;

        let template = {
            let mut state = self.inner.state.lock().await;
            let template = Template {
                id: state.next_template_id(),
                name: def.name,
                system_prompt: def.system_prompt,
                user_prompt_template: def.user_prompt_template,
                model: def.model,
                temperature: def.temperature,
            };
            state.templates.push(template.clone());
            template
        };

        info!("✓ 模板已入库: {} ({})", template.name, template.id);
        self.persist().await;
        Ok(template)
    }

    /// 从内置预设创建模板
    pub async fn add_preset_template(&self, name: &str) -> Result<Template> {
        let preset = presets::preset(name).ok_or_else(|| ValidationError::UnknownPreset {
            name: name.to_string(),
        })?;
        self.add_template(NewTemplate::from(preset)).await
    }

    /// 删除一条输入，级联删除依赖它的请求
    pub async fn delete_input(&self, input_id: &str) -> Result<()> {
        let removed = {
            let mut state = self.inner.state.lock().await;
            if state.find_input(input_id).is_none() {
                return Err(ValidationError::InputNotFound {
                    id: input_id.to_string(),
                }
                .into());
            }
            state.inputs.retain(|i| i.id != input_id);
            state.remove_requests(|r| r.input_id == input_id)
        };

        info!("🗑 已删除输入 {}，级联删除 {} 条请求", input_id, removed);
        self.persist().await;
        Ok(())
    }

    /// 删除一个模板，级联删除依赖它的请求
    pub async fn delete_template(&self, template_id: &str) -> Result<()> {
        let removed = {
            let mut state = self.inner.state.lock().await;
            if state.find_template(template_id).is_none() {
                return Err(ValidationError::TemplateNotFound {
                    id: template_id.to_string(),
                }
                .into());
            }
            state.templates.retain(|t| t.id != template_id);
            state.remove_requests(|r| r.template_id == template_id)
        };

        info!("🗑 已删除模板 {}，级联删除 {} 条请求", template_id, removed);
        self.persist().await;
        Ok(())
    }

    /// 删除单条请求及其任务记录
    pub async fn delete_request(&self, local_id: &str) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            let removed = state.remove_requests(|r| r.local_id == local_id);
            if removed == 0 {
                return Err(ValidationError::RequestNotFound {
                    local_id: local_id.to_string(),
                }
                .into());
            }
        }

        self.persist().await;
        Ok(())
    }

    // ========== 请求矩阵构建 ==========

    /// 按范围表达式为指定模板构建请求矩阵
    ///
    /// 重复的 (输入, 模板) 配对静默跳过，返回请求数与实际新增数。
    pub async fn build_requests(&self, template_id: &str, range_expr: &str) -> Result<BuildOutcome> {
        let outcome = {
            let mut state = self.inner.state.lock().await;
            if state.find_template(template_id).is_none() {
                return Err(ValidationError::TemplateNotFound {
                    id: template_id.to_string(),
                }
                .into());
            }

            let indices = parse_range_expr(range_expr, state.inputs.len());
            if indices.is_empty() {
                return Err(ValidationError::EmptyRangeMatch {
                    expr: range_expr.to_string(),
                }
                .into());
            }

            let mut added = 0;
            for index in &indices {
                let input_id = state.inputs[*index].id.clone();
                if state.has_pair(&input_id, template_id) {
                    continue;
                }
                let request = Request {
                    local_id: state.next_request_id(),
                    input_id,
                    template_id: template_id.to_string(),
                };
                state.requests.push(request);
                added += 1;
            }

            BuildOutcome {
                requested: indices.len(),
                added,
            }
        };

        info!(
            "📋 矩阵构建完成: 请求 {} 项，新增 {} 条（跳过 {} 条重复）",
            outcome.requested,
            outcome.added,
            outcome.requested - outcome.added
        );
        if outcome.added > 0 {
            self.persist().await;
        }
        Ok(outcome)
    }

    // ========== 恢复 ==========

    /// 从最近一次快照完整恢复状态，并恢复未完成任务的轮询
    ///
    /// 已提交过的任务保留其远程任务 id，不会重新提交；
    /// 连续两次恢复（中间无变更）结果一致。
    pub async fn recover(&self) -> Result<Option<RecoverOutcome>> {
        let Some(snapshot) = self.inner.store.load().await? else {
            info!("没有可恢复的快照");
            return Ok(None);
        };

        let outcome = {
            let mut state = self.inner.state.lock().await;
            state.inputs = snapshot.inputs;
            state.templates = snapshot.templates;
            state.requests = snapshot.requests;
            state.tasks = snapshot.tasks;
            state.restore_seqs();
            RecoverOutcome {
                requests: state.requests.len(),
                tasks: state.tasks.len(),
                pollable: state.pollable().len(),
                timestamp: snapshot.timestamp,
            }
        };

        info!(
            "📥 已恢复快照 ({}): {} 条请求 / {} 个任务，其中 {} 个待继续轮询",
            outcome.timestamp, outcome.requests, outcome.tasks, outcome.pollable
        );

        if outcome.pollable > 0 {
            self.start_polling().await;
        }

        Ok(Some(outcome))
    }

    // ========== 只读投影 ==========

    pub async fn inputs(&self) -> Vec<Input> {
        self.inner.state.lock().await.inputs.clone()
    }

    pub async fn templates(&self) -> Vec<Template> {
        self.inner.state.lock().await.templates.clone()
    }

    pub async fn requests(&self) -> Vec<Request> {
        self.inner.state.lock().await.requests.clone()
    }

    pub async fn task(&self, local_id: &str) -> Option<Task> {
        self.inner.state.lock().await.tasks.get(local_id).cloned()
    }

    pub async fn counts(&self) -> TaskCounts {
        self.inner.state.lock().await.counts()
    }

    // ========== 结果导出 ==========

    /// 导出扁平结果行（纯投影，不修改任何状态）
    pub async fn export_rows(&self) -> Vec<ExportRow> {
        let state = self.inner.state.lock().await;
        export::project_rows(&state)
    }

    /// 导出 CSV 文本
    pub async fn export_csv(&self) -> String {
        export::to_csv(&self.export_rows().await)
    }

    /// 把导出结果写入文件
    pub async fn write_export(&self, path: &str) -> Result<()> {
        let csv = self.export_csv().await;
        tokio::fs::write(path, csv.as_bytes()).await?;
        info!("📄 结果已导出至: {}", path);
        Ok(())
    }

    // ========== 内部辅助 ==========

    /// 写快照；请求列表为空时跳过，失败只记日志不阻断批次
    pub(crate) async fn persist(&self) {
        let snapshot = {
            let state = self.inner.state.lock().await;
            if state.requests.is_empty() {
                return;
            }
            state.to_snapshot()
        };
        if let Err(e) = self.inner.store.save(&snapshot).await {
            warn!("⚠️ 快照写入失败: {}", e);
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        // 接收端掉线不影响编排
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn emit_row(&self, local_id: &str, label: impl Into<String>) {
        self.emit(Event::RowStatus {
            local_id: local_id.to_string(),
            label: label.into(),
        });
    }
}
