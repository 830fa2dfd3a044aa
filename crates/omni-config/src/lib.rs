pub mod config;
pub mod manager;

pub use config::{
    BatchConfig, CaptureConfig, Config, ConfigError, ConfigResult, LogLevel, LoggingConfig,
    StorageConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// 获取 OmniContext 配置目录路径
pub fn omnicontext_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".omnicontext"))
}

/// 获取默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    omnicontext_dir().map(|dir| dir.join("config.json"))
}

/// 获取默认日志文件路径
pub fn default_log_path() -> Option<PathBuf> {
    omnicontext_dir().map(|dir| dir.join("logs").join("omni.log"))
}

/// 初始化 OmniContext 目录结构
pub async fn init_omnicontext_dirs() -> ConfigResult<()> {
    if let Some(root) = omnicontext_dir() {
        tokio::fs::create_dir_all(root.join("store")).await?;
        tokio::fs::create_dir_all(root.join("logs")).await?;
    }
    Ok(())
}

/// 展开路径中的 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omnicontext_dir() {
        let dir = omnicontext_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().to_string_lossy().contains(".omnicontext"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/.omnicontext/config.json");
        assert!(expanded.is_some());
        assert!(!expanded.unwrap().to_string_lossy().starts_with('~'));

        assert_eq!(expand_tilde("/var/log/omni.log"), Some(PathBuf::from("/var/log/omni.log")));
    }
}
