//! 内置模板预设
//!
//! 常用提示词的静态预设表，用户可以从预设一键创建模板，再按需调整。

use phf::phf_map;

use super::NewTemplate;

/// 预设模板定义
#[derive(Debug, Clone, Copy)]
pub struct PresetTemplate {
    pub name: &'static str,
    pub system_prompt: &'static str,
    pub user_prompt_template: &'static str,
    pub model: &'static str,
    pub temperature: f32,
}

/// 预设表，键为预设名称
pub static PRESETS: phf::Map<&'static str, PresetTemplate> = phf_map! {
    "摘要" => PresetTemplate {
        name: "摘要",
        system_prompt: "你是一个专业的文本摘要助手，擅长提炼核心信息，输出简洁准确。",
        user_prompt_template: "请对以下文本生成不超过三句话的摘要：\n\n{input}",
        model: "glm-4",
        temperature: 0.3,
    },
    "翻译" => PresetTemplate {
        name: "翻译",
        system_prompt: "你是一个专业的中英互译助手，译文需忠实原文、通顺自然。",
        user_prompt_template: "请将以下文本翻译成英文（若原文为英文则翻译成中文）：\n\n{input}",
        model: "glm-4",
        temperature: 0.2,
    },
    "关键词" => PresetTemplate {
        name: "关键词",
        system_prompt: "你是一个信息抽取助手，只输出结果本身，不要任何解释。",
        user_prompt_template: "请从以下文本中提取 5 个以内的关键词，用顿号分隔：\n\n{input}",
        model: "glm-4",
        temperature: 0.1,
    },
    "情感分析" => PresetTemplate {
        name: "情感分析",
        system_prompt: "你是一个文本情感分析助手。",
        user_prompt_template: "请判断以下文本的情感倾向（正面/负面/中性），并用一句话说明理由：\n\n{input}",
        model: "glm-4",
        temperature: 0.0,
    },
};

/// 按名称查找预设
pub fn preset(name: &str) -> Option<&'static PresetTemplate> {
    PRESETS.get(name)
}

/// 全部预设名称
pub fn preset_names() -> Vec<&'static str> {
    let mut names: Vec<_> = PRESETS.keys().copied().collect();
    names.sort_unstable();
    names
}

impl From<&PresetTemplate> for NewTemplate {
    fn from(preset: &PresetTemplate) -> Self {
        NewTemplate {
            name: preset.name.to_string(),
            system_prompt: preset.system_prompt.to_string(),
            user_prompt_template: preset.user_prompt_template.to_string(),
            model: preset.model.to_string(),
            temperature: preset.temperature,
        }
    }
}
