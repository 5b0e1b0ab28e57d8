/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 远程推理 API 基础地址
    pub api_base_url: String,
    /// API 密钥
    pub api_key: String,
    /// 默认模型名称
    pub default_model: String,
    /// 提交窗口大小（同时在途的提交数上限）
    pub window_size: usize,
    /// 单个请求的最大重试次数（总尝试次数 = max_retries + 1）
    pub max_retries: u32,
    /// 重试退避单位（毫秒），第 n 次失败后等待 n * retry_backoff_ms
    pub retry_backoff_ms: u64,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 状态快照文件路径
    pub snapshot_path: String,
    /// 结果导出文件路径
    pub export_path: String,
    /// 输入文本文件路径（每行一条）
    pub inputs_file: String,
    /// 模板定义 TOML 文件路径
    pub templates_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            api_key: String::new(),
            default_model: "glm-4".to_string(),
            window_size: 5,
            max_retries: 2,
            retry_backoff_ms: 2000,
            poll_interval_ms: 5000,
            snapshot_path: "batch_state.json".to_string(),
            export_path: "batch_results.csv".to_string(),
            inputs_file: "inputs.txt".to_string(),
            templates_file: "templates.toml".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            api_base_url: std::env::var("BATCH_API_BASE_URL").unwrap_or(default.api_base_url),
            api_key: std::env::var("BATCH_API_KEY").unwrap_or(default.api_key),
            default_model: std::env::var("BATCH_DEFAULT_MODEL").unwrap_or(default.default_model),
            window_size: std::env::var("BATCH_WINDOW_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.window_size),
            max_retries: std::env::var("BATCH_MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_retries),
            retry_backoff_ms: std::env::var("BATCH_RETRY_BACKOFF_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.retry_backoff_ms),
            poll_interval_ms: std::env::var("BATCH_POLL_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.poll_interval_ms),
            snapshot_path: std::env::var("BATCH_SNAPSHOT_PATH").unwrap_or(default.snapshot_path),
            export_path: std::env::var("BATCH_EXPORT_PATH").unwrap_or(default.export_path),
            inputs_file: std::env::var("BATCH_INPUTS_FILE").unwrap_or(default.inputs_file),
            templates_file: std::env::var("BATCH_TEMPLATES_FILE").unwrap_or(default.templates_file),
        }
    }
}
