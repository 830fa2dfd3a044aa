use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            capture: CaptureConfig::default(),
            batch: BatchConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["capture", "initial_delay_ms"] => Some(self.capture.initial_delay_ms.to_string()),
            ["capture", "poll_interval_ms"] => Some(self.capture.poll_interval_ms.to_string()),
            ["capture", "debounce_ms"] => Some(self.capture.debounce_ms.to_string()),
            ["batch", "list_scroll_delay_ms"] => Some(self.batch.list_scroll_delay_ms.to_string()),
            ["batch", "history_scroll_delay_ms"] => {
                Some(self.batch.history_scroll_delay_ms.to_string())
            }
            ["batch", "settle_delay_ms"] => Some(self.batch.settle_delay_ms.to_string()),
            ["batch", "between_sessions_delay_ms"] => {
                Some(self.batch.between_sessions_delay_ms.to_string())
            }
            ["batch", "sidebar_toggle_delay_ms"] => {
                Some(self.batch.sidebar_toggle_delay_ms.to_string())
            }
            ["batch", "stable_checks"] => Some(self.batch.stable_checks.to_string()),
            ["batch", "max_scroll_rounds"] => Some(self.batch.max_scroll_rounds.to_string()),
            ["batch", "terminal_grace_ms"] => Some(self.batch.terminal_grace_ms.to_string()),
            ["storage", "path"] => Some(self.storage.path.clone()),
            ["logging", "level"] => Some(self.logging.level.as_str().to_string()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            ["logging", "module_levels", module] => self.logging.module_levels.get(*module).cloned(),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["capture", "initial_delay_ms"] => self.capture.initial_delay_ms = parse_number(value)?,
            ["capture", "poll_interval_ms"] => self.capture.poll_interval_ms = parse_number(value)?,
            ["capture", "debounce_ms"] => self.capture.debounce_ms = parse_number(value)?,
            ["batch", "list_scroll_delay_ms"] => {
                self.batch.list_scroll_delay_ms = parse_number(value)?
            }
            ["batch", "history_scroll_delay_ms"] => {
                self.batch.history_scroll_delay_ms = parse_number(value)?
            }
            ["batch", "settle_delay_ms"] => self.batch.settle_delay_ms = parse_number(value)?,
            ["batch", "between_sessions_delay_ms"] => {
                self.batch.between_sessions_delay_ms = parse_number(value)?
            }
            ["batch", "sidebar_toggle_delay_ms"] => {
                self.batch.sidebar_toggle_delay_ms = parse_number(value)?
            }
            ["batch", "stable_checks"] => {
                self.batch.stable_checks = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid number: {}", value))
                })?;
            }
            ["batch", "max_scroll_rounds"] => {
                self.batch.max_scroll_rounds = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid number: {}", value))
                })?;
            }
            ["batch", "terminal_grace_ms"] => self.batch.terminal_grace_ms = parse_number(value)?,
            ["storage", "path"] => {
                self.storage.path = value.to_string();
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "json_format"] => {
                self.logging.json_format = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid boolean: {}", value))
                })?;
            }
            ["logging", "file"] => {
                self.logging.file = Some(value.to_string());
            }
            ["logging", "module_levels", module] => {
                let level: LogLevel = value.parse()?;
                self.logging
                    .module_levels
                    .insert(module.to_string(), level.as_str().to_string());
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_number(value: &str) -> ConfigResult<u64> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid number: {}", value)))
}

/// 实时捕获配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    /// 页面加载后首次捕获前的等待
    pub initial_delay_ms: u64,
    /// 兜底轮询间隔，同时用于发现地址变化
    pub poll_interval_ms: u64,
    /// 写入防抖
    pub debounce_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            poll_interval_ms: 1000,
            debounce_ms: 800,
        }
    }
}

impl CaptureConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// 批量遍历配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    /// 会话列表每次滚动后的等待
    pub list_scroll_delay_ms: u64,
    /// 历史消息每次向上滚动后的等待
    pub history_scroll_delay_ms: u64,
    /// 点击会话后等待页面切换
    pub settle_delay_ms: u64,
    /// 两个会话之间的间隔
    pub between_sessions_delay_ms: u64,
    /// 展开侧边栏后的等待
    pub sidebar_toggle_delay_ms: u64,
    /// 连续多少次测量没有增长视为稳定
    pub stable_checks: u32,
    /// 滚动轮次上限
    pub max_scroll_rounds: u32,
    /// 终止状态保留多久后清除检查点
    pub terminal_grace_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            list_scroll_delay_ms: 800,
            history_scroll_delay_ms: 500,
            settle_delay_ms: 1500,
            between_sessions_delay_ms: 300,
            sidebar_toggle_delay_ms: 1000,
            stable_checks: 3,
            max_scroll_rounds: 60,
            terminal_grace_ms: 3000,
        }
    }
}

impl BatchConfig {
    pub fn list_scroll_delay(&self) -> Duration {
        Duration::from_millis(self.list_scroll_delay_ms)
    }

    pub fn history_scroll_delay(&self) -> Duration {
        Duration::from_millis(self.history_scroll_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn between_sessions_delay(&self) -> Duration {
        Duration::from_millis(self.between_sessions_delay_ms)
    }

    pub fn sidebar_toggle_delay(&self) -> Duration {
        Duration::from_millis(self.sidebar_toggle_delay_ms)
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_millis(self.terminal_grace_ms)
    }
}

/// Storage 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "~/.omnicontext/store".to_string(),
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    #[serde(default)]
    pub json_format: bool,
    /// 日志文件，未设置时只输出到 stderr
    #[serde(default)]
    pub file: Option<String>,
    /// 模块级别的日志配置，如 `omni_capture = "debug"`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            file: None,
            module_levels: HashMap::new(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
