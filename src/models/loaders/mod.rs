//! 批量加载器
//!
//! 从本地文件批量加载输入文本与模板定义：
//! - 输入：纯文本文件，每行一条，空行跳过
//! - 模板：TOML 文件中的 `[[templates]]` 表数组

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

use super::NewTemplate;

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<NewTemplate>,
}

/// 从纯文本文件加载输入，每行一条，忽略空行
pub async fn load_inputs_from_txt(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取输入文件: {}", path.display()))?;

    let lines: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    tracing::info!("✓ 从 {} 加载了 {} 条输入", path.display(), lines.len());

    Ok(lines)
}

/// 从 TOML 文件加载模板定义
///
/// 返回的定义尚未入库，仍需经过注册表校验。
pub async fn load_templates_from_toml(path: &Path) -> Result<Vec<NewTemplate>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取模板文件: {}", path.display()))?;

    let file: TemplateFile = toml::from_str(&content)
        .with_context(|| format!("无法解析模板文件: {}", path.display()))?;

    tracing::info!("✓ 从 {} 加载了 {} 个模板定义", path.display(), file.templates.len());

    Ok(file.templates)
}
