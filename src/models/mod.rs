//! 数据模型
//!
//! 编排器持有的四类集合对应的类型：
//! - `Input` - 用户录入的文本片段
//! - `Template` - 可复用的提示词模板
//! - `Request` - 一次 (输入, 模板) 配对的调度记录
//! - `Task` - 远程推理任务的执行状态记录
//!
//! 所有持久化类型使用 camelCase 字段名，与快照 JSON 模式保持一致。

pub mod loaders;
pub mod presets;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// 用户提示词模板中的替换占位符
pub const PLACEHOLDER: &str = "{input}";

/// 输入文本片段
///
/// 创建后不可变；删除时级联删除依赖它的 Request。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub id: String,
    pub content: String,
}

/// 提示词模板
///
/// `user_prompt_template` 必须包含且仅包含一个 `{input}` 占位符，
/// `temperature` 限定在闭区间 [0, 1]。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub model: String,
    pub temperature: f32,
}

/// 待入库的模板定义（尚未分配 id）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub model: String,
    pub temperature: f32,
}

/// 一次 (输入, 模板) 配对的调度记录
///
/// 不变量：同一 (input_id, template_id) 组合至多存在一条未删除的 Request。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub local_id: String,
    pub input_id: String,
    pub template_id: String,
}

/// 任务状态
///
/// 状态转移单调：`Pending → (Processing|Retrying)* → (Completed|Failed)`，
/// 进入终态后不再变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    /// 是否已到达终态
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 展示用状态标签
    pub fn display_label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "排队中",
            TaskStatus::Processing => "处理中",
            TaskStatus::Retrying => "重试中",
            TaskStatus::Completed => "已完成",
            TaskStatus::Failed => "失败",
        }
    }
}

/// 消耗的 token 统计
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub total_tokens: u64,
}

/// 远程推理任务的执行状态记录，以 Request.local_id 为键
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub status: TaskStatus,
    pub remote_task_id: Option<String>,
    pub result: Option<String>,
    pub usage: Option<Usage>,
    pub retry_count: u32,
}

impl Task {
    /// 新建排队中的任务记录
    pub fn new() -> Self {
        Self {
            status: TaskStatus::Pending,
            remote_task_id: None,
            result: None,
            usage: None,
            retry_count: 0,
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

/// 校验模板定义
///
/// 校验失败的模板在注册表边界被同步拒绝，永远不会进入提交管线。
pub fn validate_template(def: &NewTemplate) -> Result<()> {
    if def.name.trim().is_empty() {
        return Err(ValidationError::EmptyTemplateName.into());
    }
    if def.user_prompt_template.trim().is_empty() {
        return Err(ValidationError::EmptyUserPrompt.into());
    }

    let re = Regex::new(r"\{input\}")?;
    let found = re.find_iter(&def.user_prompt_template).count();
    if found != 1 {
        return Err(ValidationError::PlaceholderCount { found }.into());
    }

    if !(0.0..=1.0).contains(&def.temperature) {
        return Err(ValidationError::TemperatureOutOfRange {
            value: def.temperature,
        }
        .into());
    }

    Ok(())
}

/// 提取 id 的数字后缀（如 `input-12` → 12），用于排序和恢复计数器
pub(crate) fn id_seq(id: &str) -> u64 {
    id.rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
