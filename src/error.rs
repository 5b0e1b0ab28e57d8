//! 校验错误类型
//!
//! 注册表 / 请求矩阵构建边界的同步拒绝原因。提交与轮询阶段的失败不走这里：
//! 它们在本地重试后以终态 `Failed` 记录在 Task 上，不会中断整个批次。

use thiserror::Error;

/// 校验错误
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// 模板名称为空
    #[error("模板名称不能为空")]
    EmptyTemplateName,

    /// 用户提示词模板为空
    #[error("用户提示词模板不能为空")]
    EmptyUserPrompt,

    /// 占位符数量不为 1
    #[error("用户提示词模板必须包含且仅包含一个 {{input}} 占位符（当前 {found} 个）")]
    PlaceholderCount { found: usize },

    /// 温度超出范围
    #[error("温度参数 {value} 超出范围 [0, 1]")]
    TemperatureOutOfRange { value: f32 },

    /// 输入内容为空
    #[error("输入内容不能为空")]
    EmptyInput,

    /// 范围表达式没有匹配到任何输入
    #[error("范围表达式 '{expr}' 没有匹配到任何输入")]
    EmptyRangeMatch { expr: String },

    /// 未知的预设模板
    #[error("未知的预设模板: {name}")]
    UnknownPreset { name: String },

    /// 模板不存在
    #[error("模板不存在: {id}")]
    TemplateNotFound { id: String },

    /// 输入不存在
    #[error("输入不存在: {id}")]
    InputNotFound { id: String },

    /// 请求不存在
    #[error("请求不存在: {local_id}")]
    RequestNotFound { local_id: String },
}
