//! 配置管理
//!
//! 配置按层叠加：内置默认值、可选的TOML文件、`CIE_` 前缀的环境变量
//! （嵌套字段用 `__` 分隔，例如 `CIE_SERVER__PORT=9000`）。

use anyhow::{anyhow, Context, Result};
use cie_integration::HealthCheckOptions;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 探测超时上限（毫秒）
pub const MAX_PROBE_TIMEOUT_MS: u64 = 5000;

const LOG_FORMATS: [&str; 2] = ["json", "pretty"];

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: Arc<RwLock<EngineConfig>>,
    /// 配置文件路径，未指定时只使用默认值和环境变量
    config_path: Option<String>,
    validator: ConfigValidator,
}

/// 引擎完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub health: HealthConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

/// HTTP服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 健康检查配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// 单次探测超时（毫秒）
    pub probe_timeout_ms: u64,
    /// 响应时间超过该值时性能检查告警（毫秒）
    pub performance_threshold_ms: u64,
    pub max_concurrent_checks: usize,
}

/// 事件日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub environment: String,
    pub source: String,
    /// 内存中保留的最近事件数
    pub buffer_size: usize,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` 或 `pretty`
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: MAX_PROBE_TIMEOUT_MS,
            performance_threshold_ms: 5000,
            max_concurrent_checks: 16,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            source: "clinical-integration-engine".to_string(),
            buffer_size: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl From<&HealthConfig> for HealthCheckOptions {
    fn from(config: &HealthConfig) -> Self {
        Self {
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            performance_threshold: Duration::from_millis(config.performance_threshold_ms),
            max_concurrent_checks: config.max_concurrent_checks.max(1),
        }
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&EngineConfig) -> Result<()>,
}

impl ConfigManager {
    /// 加载配置并校验
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        Self::with_config(config, config_path.map(str::to_string))
    }

    /// 使用已有配置创建管理器
    pub fn with_config(config: EngineConfig, config_path: Option<String>) -> Result<Self> {
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            validator,
        })
    }

    fn load_config(config_path: Option<&str>) -> Result<EngineConfig> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?);
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("CIE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: EngineConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        info!(
            "Configuration loaded from {}",
            config_path.unwrap_or("defaults and environment")
        );
        Ok(config)
    }

    pub async fn get_config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// 校验后替换当前配置
    pub async fn update_config(&self, new_config: EngineConfig) -> Result<()> {
        self.validator.validate(&new_config)?;
        *self.config.write().await = new_config;
        info!("Configuration updated");
        Ok(())
    }

    /// 将当前配置写回配置文件
    pub async fn save_config(&self) -> Result<()> {
        let path = self
            .config_path
            .as_deref()
            .ok_or_else(|| anyhow!("No configuration file to save to"))?;
        let config_str = {
            let config = self.config.read().await;
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?
        };

        tokio::fs::write(path, config_str)
            .await
            .with_context(|| format!("Failed to write configuration file {}", path))?;
        info!("Configuration saved to: {}", path);
        Ok(())
    }

    /// 重新读取文件和环境变量
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.update_config(new_config).await
    }

    /// 按 `.` 分隔的路径读取配置值
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config = self.config.read().await;
        let config_json =
            serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;
        let value = Self::extract_nested_value(&config_json, path)?;

        serde_json::from_value(value.clone())
            .with_context(|| format!("Failed to deserialize configuration value {}", path))
    }

    /// 按路径修改配置值，修改后的配置必须通过校验
    pub async fn set_value<T>(&self, path: &str, value: T) -> Result<()>
    where
        T: Serialize,
    {
        let value_json = serde_json::to_value(value).context("Failed to serialize value")?;

        let mut config = self.config.write().await;
        let mut config_json =
            serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;

        let (parents, last) = match path.rsplit_once('.') {
            Some((parents, last)) => (Some(parents), last),
            None => (None, path),
        };
        let parent = match parents {
            Some(parents) => Self::extract_nested_value_mut(&mut config_json, parents)?,
            None => &mut config_json,
        };
        let Value::Object(map) = parent else {
            return Err(anyhow!("Invalid configuration path: {}", path));
        };
        if !map.contains_key(last) {
            return Err(anyhow!("Configuration path not found: {}", path));
        }
        map.insert(last.to_string(), value_json);

        let updated: EngineConfig = serde_json::from_value(config_json)
            .with_context(|| format!("Invalid value for {}", path))?;
        self.validator.validate(&updated)?;
        *config = updated;

        info!("Configuration value updated: {}", path);
        Ok(())
    }

    fn extract_nested_value<'a>(config: &'a Value, path: &str) -> Result<&'a Value> {
        path.split('.').try_fold(config, |current, part| match current {
            Value::Object(map) => map
                .get(part)
                .ok_or_else(|| anyhow!("Configuration path not found: {}", path)),
            _ => Err(anyhow!("Invalid path at segment: {}", part)),
        })
    }

    fn extract_nested_value_mut<'a>(config: &'a mut Value, path: &str) -> Result<&'a mut Value> {
        path.split('.').try_fold(config, |current, part| match current {
            Value::Object(map) => map
                .get_mut(part)
                .ok_or_else(|| anyhow!("Configuration path not found: {}", path)),
            _ => Err(anyhow!("Invalid path at segment: {}", part)),
        })
    }

    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "server.port",
                validator: |config| {
                    if config.server.port == 0 {
                        Err(anyhow!("Server port cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "health.probe_timeout_ms",
                validator: |config| {
                    let timeout = config.health.probe_timeout_ms;
                    if timeout == 0 || timeout > MAX_PROBE_TIMEOUT_MS {
                        Err(anyhow!(
                            "Probe timeout must be between 1 and {} ms, got {}",
                            MAX_PROBE_TIMEOUT_MS,
                            timeout
                        ))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "events.buffer_size",
                validator: |config| {
                    if config.events.buffer_size == 0 {
                        Err(anyhow!("Event buffer size cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "logging.format",
                validator: |config| {
                    if LOG_FORMATS.contains(&config.logging.format.as_str()) {
                        Ok(())
                    } else {
                        Err(anyhow!(
                            "Unknown log format {}, expected one of {:?}",
                            config.logging.format,
                            LOG_FORMATS
                        ))
                    }
                },
            },
        ];

        Self { validation_rules }
    }

    pub fn validate(&self, config: &EngineConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow!("Invalid {}: {}", rule.field_path, e));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("cie-config-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());

        let options = HealthCheckOptions::from(&config.health);
        assert_eq!(options.probe_timeout, Duration::from_millis(5000));
        assert_eq!(options.max_concurrent_checks, 16);
    }

    #[test]
    fn test_validator_rejects_bad_values() {
        let validator = ConfigValidator::new();

        let mut config = EngineConfig::default();
        config.health.probe_timeout_ms = 6000;
        assert!(validator.validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.logging.format = "xml".to_string();
        assert!(validator.validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.events.buffer_size = 0;
        assert!(validator.validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_file_layer_overrides_defaults() {
        let path = temp_config(
            r#"
[server]
port = 9000

[logging]
format = "json"
"#,
        );
        let manager = ConfigManager::new(Some(&path)).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.format, "json");
        assert_eq!(manager.get_value::<u16>("server.port").await.unwrap(), 9000);
        assert!(manager.get_value::<u16>("server.missing").await.is_err());

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let path = temp_config("[health]\nprobe_timeout_ms = 0\n");
        assert!(ConfigManager::new(Some(&path)).is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_set_value_validates() {
        let manager = ConfigManager::with_config(EngineConfig::default(), None).unwrap();

        manager.set_value("events.buffer_size", 50).await.unwrap();
        assert_eq!(manager.get_config().await.events.buffer_size, 50);

        assert!(manager.set_value("server.port", 0).await.is_err());
        assert_eq!(manager.get_config().await.server.port, 8080);
        assert!(manager.set_value("server.unknown", 1).await.is_err());
        assert!(manager.save_config().await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let path = temp_config("");
        let manager = ConfigManager::new(Some(&path)).unwrap();
        manager.set_value("events.environment", "staging").await.unwrap();
        manager.save_config().await.unwrap();

        let mut config = manager.get_config().await;
        config.events.environment = "changed".to_string();
        manager.update_config(config).await.unwrap();

        manager.reload_config().await.unwrap();
        assert_eq!(manager.get_config().await.events.environment, "staging");

        std::fs::remove_file(path).unwrap();
    }
}
