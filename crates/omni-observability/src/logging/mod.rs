//! 结构化日志模块
//!
//! 提供基于 tracing 的结构化日志功能。输出写到 stderr，
//! 命令行的 JSON 结果可以放心地走 stdout。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use omni_config::{expand_tilde, LogLevel, LoggingConfig};
use parking_lot::RwLock;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::error::{ObservabilityError, Result};

/// 日志级别重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

/// 日志管理器
#[derive(Debug)]
pub struct LogManager {
    /// 配置
    config: LoggingConfig,

    /// 过滤器重新加载句柄
    reload_handle: Option<Arc<RwLock<ReloadHandle>>>,

    /// 文件输出的后台写线程，drop 时刷新
    file_guard: Option<WorkerGuard>,
}

impl LogManager {
    /// 创建并安装全局日志订阅者
    pub fn new(config: &LoggingConfig) -> Result<Self> {
        let mut manager = Self {
            config: config.clone(),
            reload_handle: None,
            file_guard: None,
        };

        manager.init()?;

        Ok(manager)
    }

    /// 初始化日志系统
    fn init(&mut self) -> Result<()> {
        if self.reload_handle.is_some() {
            return Ok(());
        }

        // 构建环境过滤器
        let filter = build_filter(&self.config)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let file_writer = match &self.config.file {
            Some(path) => {
                let (writer, guard) = open_file_writer(path)?;
                self.file_guard = Some(guard);
                Some(writer)
            }
            None => None,
        };

        let json = self.config.json_format;
        let plain_layer = (!json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
        });
        let json_layer = json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_writer(std::io::stderr)
        });
        // 文件里始终是 JSON，便于事后检索
        let file_layer = file_writer.map(|writer| {
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(plain_layer)
            .with(json_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| ObservabilityError::init(format!("Failed to install subscriber: {}", e)))?;

        self.reload_handle = Some(Arc::new(RwLock::new(reload_handle)));

        tracing::info!(
            target: "omni_observability",
            "Log manager initialized with level: {}",
            self.config.level.as_str()
        );

        Ok(())
    }

    /// 动态更新日志级别，模块级别的配置保持不变
    pub fn update_level(&mut self, level: LogLevel) -> Result<()> {
        let mut next = self.config.clone();
        next.level = level;
        let new_filter = build_filter(&next)?;

        let handle = self
            .reload_handle
            .as_ref()
            .ok_or_else(|| ObservabilityError::logging("Log manager not initialized"))?;

        handle
            .write()
            .modify(|filter| {
                *filter = new_filter;
            })
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;

        self.config = next;

        tracing::info!(
            target: "omni_observability",
            "Log level updated to: {}",
            level.as_str()
        );

        Ok(())
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// 是否有文件输出
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }
}

/// 构建环境过滤器
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(config.level.as_str())
        .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

    // 添加模块级别的过滤器
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(
            format!("{}={}", module, level)
                .parse()
                .map_err(|e| ObservabilityError::logging(format!("Invalid directive: {}", e)))?,
        );
    }

    Ok(filter)
}

fn open_file_writer(path: &str) -> Result<(NonBlocking, WorkerGuard)> {
    let path = expand_tilde(path)
        .ok_or_else(|| ObservabilityError::config(format!("Cannot resolve log path: {}", path)))?;
    let (dir, file_name) = split_log_path(&path)?;
    std::fs::create_dir_all(&dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ObservabilityError::config(format!("Log path has no file name: {:?}", path)))?
        .to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

/// 实时捕获的 span
pub fn capture_span(platform: &str, session_id: &str) -> tracing::Span {
    tracing::info_span!(
        "capture",
        platform = %platform,
        session_id = %session_id,
    )
}
