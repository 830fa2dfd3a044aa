use crate::config::{Config, ConfigError, ConfigResult, LogLevel};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// 配置管理器
#[derive(Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// 加载配置文件，不存在时写入默认配置
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            let content = tokio::fs::read_to_string(path).await?;
            let content = Self::expand_env_vars(&content)?;
            let config: Config = serde_json::from_str(&content)?;
            Self::validate(&config)?;
            config
        } else {
            info!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            Self::write_config(path, &default_config).await?;
            default_config
        };

        Ok(Self {
            path: path.to_path_buf(),
            config: Arc::new(RwLock::new(config)),
        })
    }

    /// 从默认位置加载配置
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = Self::default_config_path()?;
        Self::load(&config_path).await
    }

    /// 获取默认配置路径 (~/.omnicontext/config.json)
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    /// 创建一个新的配置管理器（用于测试）
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// 获取配置的只读引用
    pub fn get(&self) -> Arc<RwLock<Config>> {
        Arc::clone(&self.config)
    }

    /// 当前配置的副本
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// 保存配置到文件
    pub async fn save(&self) -> ConfigResult<()> {
        let config = self.config.read().await.clone();
        Self::write_config(&self.path, &config).await?;
        info!("Config saved to {:?}", self.path);
        Ok(())
    }

    /// 用默认配置覆盖文件
    pub async fn reset(&self) -> ConfigResult<()> {
        *self.config.write().await = Config::default();
        self.save().await
    }

    async fn write_config(path: &Path, config: &Config) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(config)?;
        // 确保父目录存在
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload(&self) -> ConfigResult<()> {
        if !self.path.exists() {
            return Err(ConfigError::InvalidPath(format!(
                "Config file not found: {:?}",
                self.path
            )));
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let content = Self::expand_env_vars(&content)?;
        let new_config: Config = serde_json::from_str(&content)?;

        // 验证新配置
        Self::validate(&new_config)?;

        *self.config.write().await = new_config;

        info!("Config reloaded from {:?}", self.path);
        Ok(())
    }

    /// 更新配置，验证通过后写回文件
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config) -> ConfigResult<()>,
    {
        let mut candidate = self.config.read().await.clone();
        f(&mut candidate)?;
        Self::validate(&candidate)?;
        *self.config.write().await = candidate;
        self.save().await
    }

    /// 验证配置
    pub fn validate(config: &Config) -> ConfigResult<()> {
        // 轮询间隔为 0 会让定时器失效
        if config.capture.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "capture.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if config.batch.stable_checks == 0 {
            return Err(ConfigError::Validation(
                "batch.stable_checks must be greater than 0".to_string(),
            ));
        }

        if config.batch.max_scroll_rounds == 0 {
            return Err(ConfigError::Validation(
                "batch.max_scroll_rounds must be greater than 0".to_string(),
            ));
        }

        if config.storage.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage.path cannot be empty".to_string(),
            ));
        }

        for (module, level) in &config.logging.module_levels {
            level.parse::<LogLevel>().map_err(|_| {
                ConfigError::Validation(format!(
                    "Invalid log level '{}' for module '{}'",
                    level, module
                ))
            })?;
        }

        Ok(())
    }

    /// 展开环境变量 ${VAR} 或 ${VAR:-default}
    fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::Validation(format!("Invalid pattern: {}", e)))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let (Some(full_match), Some(var_expr)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let var_expr = var_expr.as_str();

            // 处理 ${VAR:-default} 语法
            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match std::env::var(var_name) {
                Ok(val) => val,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    None => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
                },
            };

            result = result.replace(full_match.as_str(), &replacement);
        }

        Ok(result)
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let manager = ConfigManager::load(&config_path).await.unwrap();
        let config = manager.snapshot().await;

        assert!(config_path.exists());
        assert_eq!(config.capture.initial_delay_ms, 500);
        assert_eq!(config.batch.terminal_grace_ms, 3000);
    }

    #[tokio::test]
    async fn test_update_persists_and_reloads() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let manager = ConfigManager::load(&config_path).await.unwrap();

        manager
            .update(|c| c.set_value("capture.debounce_ms", "1200"))
            .await
            .unwrap();

        let reopened = ConfigManager::load(&config_path).await.unwrap();
        assert_eq!(reopened.snapshot().await.capture.debounce_ms, 1200);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let manager = ConfigManager::load(&config_path).await.unwrap();

        let result = manager
            .update(|c| c.set_value("capture.poll_interval_ms", "0"))
            .await;
        assert!(result.is_err());
        assert_eq!(manager.snapshot().await.capture.poll_interval_ms, 1000);
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("OMNI_TEST_STORE", "/tmp/omni");

        let content = r#"{"path": "${OMNI_TEST_STORE}", "level": "${OMNI_TEST_UNSET_LEVEL:-debug}"}"#;
        let expanded = ConfigManager::expand_env_vars(content).unwrap();

        assert!(expanded.contains("/tmp/omni"));
        assert!(expanded.contains(r#""level": "debug""#));
        assert!(matches!(
            ConfigManager::expand_env_vars("${OMNI_TEST_DEFINITELY_UNSET}"),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.batch.stable_checks = 0;
        assert!(ConfigManager::validate(&config).is_err());

        config.batch.stable_checks = 3;
        assert!(ConfigManager::validate(&config).is_ok());

        config
            .logging
            .module_levels
            .insert("omni_capture".to_string(), "loud".to_string());
        assert!(ConfigManager::validate(&config).is_err());
    }
}
