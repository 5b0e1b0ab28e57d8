//! # Batch Infer
//!
//! 一个针对托管 LLM 异步推理接口的批量模板化提交编排器
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Api / Store）
//! - `api/` - 远程推理接口的线上类型与 HTTP 客户端（`InferenceApi` 接缝）
//! - `store/` - 快照持久化抽象与文件实现（`Store` 接缝）
//!
//! ### ② 数据层（Models）
//! - `models/` - 输入、模板、请求、任务四类集合的类型与校验
//! - `models/presets` - 内置提示词预设表
//! - `models/loaders` - 输入/模板的批量文件加载
//!
//! ### ③ 核心层（Orchestrator）
//! - `orchestrator/` - 独占持有全部状态、对外暴露操作的编排器
//! - `orchestrator/range` - 范围表达式解析（独立可测的纯函数）
//! - `orchestrator/pipeline` - 窗口限并发提交 + 重试退避
//! - `orchestrator/poller` - 可取消的周期轮询引擎
//!
//! ### ④ 应用层（App）
//! - `app` - 恢复/装载 → 提交 → 轮询 → 导出的完整驱动流程
//! - `export` - 结果连接投影与 CSV 序列化

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod utils;

// 重新导出常用类型
pub use api::{BigModelClient, InferenceApi};
pub use app::App;
pub use config::Config;
pub use error::ValidationError;
pub use export::ExportRow;
pub use models::{Input, NewTemplate, Request, Task, TaskStatus, Template, Usage};
pub use orchestrator::pipeline::SubmitOutcome;
pub use orchestrator::{BuildOutcome, Event, Orchestrator, RecoverOutcome, TaskCounts};
pub use store::{FileStore, Snapshot, Store};
