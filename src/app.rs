//! 应用入口 - 编排层之上的驱动流程
//!
//! ## 职责
//!
//! 1. **会话恢复**：存在快照时完整恢复上次会话，不重新提交已提交任务
//! 2. **批量装载**：无快照时从文件装载输入与模板，构建请求矩阵
//! 3. **驱动执行**：提交全部请求，等待轮询自然结束
//! 4. **结果落盘**：导出 CSV 并打印最终统计

use anyhow::Result;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::BigModelClient;
use crate::config::Config;
use crate::models::loaders;
use crate::orchestrator::{Event, Orchestrator};
use crate::store::FileStore;
use crate::utils::logging;

/// 应用主结构
pub struct App {
    config: Config,
    orchestrator: Orchestrator<BigModelClient, FileStore>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl App {
    /// 初始化应用：HTTP 客户端 + 文件快照存储 + 编排器
    pub fn new(config: Config) -> Self {
        let api = BigModelClient::new(&config);
        let store = FileStore::new(&config.snapshot_path);
        let (orchestrator, events) = Orchestrator::new(config.clone(), api, store);
        Self {
            config,
            orchestrator,
            events,
        }
    }

    /// 运行主流程：恢复或装载 → 提交 → 轮询至结束 → 导出
    pub async fn run(self) -> Result<()> {
        let App {
            config,
            orchestrator,
            events,
        } = self;

        logging::log_startup(config.window_size, config.max_retries);

        // 事件流转给日志；真实界面层从这个 channel 接管行级更新
        let mut events = events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    Event::RowStatus { local_id, label } => {
                        debug!("[{}] {}", local_id, label);
                    }
                    Event::Progress { completed, total } => {
                        debug!("进度 {}/{}", completed, total);
                    }
                    Event::PollingFinished {
                        completed,
                        failed,
                        total,
                    } => {
                        info!("批次结束: 完成 {} / 失败 {} / 共 {}", completed, failed, total);
                    }
                }
            }
        });

        if orchestrator.recover().await?.is_none() {
            Self::load_work_items(&config, &orchestrator).await?;
        }

        if orchestrator.requests().await.is_empty() {
            warn!("⚠️ 没有待处理的请求，程序结束");
            return Ok(());
        }

        orchestrator.submit_all().await?;
        orchestrator.join_polling().await;

        orchestrator.write_export(&config.export_path).await?;

        let counts = orchestrator.counts().await;
        logging::print_final_stats(
            counts.completed,
            counts.failed,
            counts.total,
            &config.export_path,
        );

        Ok(())
    }

    /// 从文件装载输入与模板，并对全部输入构建请求矩阵
    async fn load_work_items(
        config: &Config,
        orchestrator: &Orchestrator<BigModelClient, FileStore>,
    ) -> Result<()> {
        let inputs = loaders::load_inputs_from_txt(Path::new(&config.inputs_file)).await?;
        if inputs.is_empty() {
            return Ok(());
        }
        for content in &inputs {
            orchestrator.add_input(content).await?;
        }

        let templates_path = Path::new(&config.templates_file);
        let mut template_ids = Vec::new();
        if templates_path.exists() {
            for def in loaders::load_templates_from_toml(templates_path).await? {
                match orchestrator.add_template(def).await {
                    Ok(template) => template_ids.push(template.id),
                    Err(e) => warn!("⚠️ 模板被拒绝: {}", e),
                }
            }
        }
        if template_ids.is_empty() {
            info!("未提供模板文件，使用预设模板「摘要」");
            let template = orchestrator.add_preset_template("摘要").await?;
            template_ids.push(template.id);
        }

        let range = format!("1-{}", inputs.len());
        for template_id in &template_ids {
            orchestrator.build_requests(template_id, &range).await?;
        }

        Ok(())
    }
}
