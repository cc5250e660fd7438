//! 外部系统模型

use crate::error::{IntegrationError, Result};
use crate::repository::Entity;
use crate::utils::generate_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 外部系统类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SystemType {
    Hl7,
    Fhir,
    RestApi,
    Database,
    File,
    Websocket,
    Mqtt,
    Dicom,
}

impl SystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hl7 => "hl7",
            Self::Fhir => "fhir",
            Self::RestApi => "rest_api",
            Self::Database => "database",
            Self::File => "file",
            Self::Websocket => "websocket",
            Self::Mqtt => "mqtt",
            Self::Dicom => "dicom",
        }
    }

    /// 基于TCP套接字通信、必须配置端口的系统类型
    pub fn requires_port(&self) -> bool {
        matches!(self, Self::Hl7 | Self::Database | Self::Mqtt | Self::Dicom)
    }
}

impl std::fmt::Display for SystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 外部系统状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Active,
    Inactive,
    Error,
    Maintenance,
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AuthenticationConfig {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        key: String,
        header: Option<String>,
    },
    Bearer {
        token: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2 {
        client_id: String,
        client_secret: String,
        token_url: String,
    },
    Certificate {
        cert_path: String,
        key_path: String,
    },
}

/// 入站数据校验设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationSettings {
    pub strict: bool,
    pub schema: Option<String>,
}

/// 外部系统连接配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfiguration {
    pub endpoint: String,
    pub protocol: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    /// 超时时间（毫秒）
    pub timeout: u64,
    #[serde(default)]
    pub retry_attempts: u32,
    /// 重试间隔（毫秒）
    #[serde(default)]
    pub retry_delay: u64,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub mapping: HashMap<String, String>,
    #[serde(default)]
    pub validation: ValidationSettings,
}

impl SystemConfiguration {
    /// 按系统类型校验配置
    pub fn validate(&self, system_type: SystemType) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(IntegrationError::BadRequest(
                "configuration.endpoint is required".to_string(),
            ));
        }
        if self.timeout == 0 {
            return Err(IntegrationError::BadRequest(
                "configuration.timeout must be greater than 0".to_string(),
            ));
        }
        if system_type.requires_port() && self.port.is_none() {
            return Err(IntegrationError::BadRequest(format!(
                "configuration.port is required for {} systems",
                system_type
            )));
        }

        let endpoint = self.endpoint.to_ascii_lowercase();
        match system_type {
            SystemType::Fhir | SystemType::RestApi => {
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(IntegrationError::BadRequest(format!(
                        "{} endpoint must be an http(s) URL: {}",
                        system_type, self.endpoint
                    )));
                }
            }
            SystemType::Websocket => {
                if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
                    return Err(IntegrationError::BadRequest(format!(
                        "websocket endpoint must be a ws(s) URL: {}",
                        self.endpoint
                    )));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// 外部系统消息统计
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatistics {
    pub total_messages: u64,
    pub successful_messages: u64,
    pub failed_messages: u64,
    pub availability: f64,
}

impl Default for SystemStatistics {
    fn default() -> Self {
        Self {
            total_messages: 0,
            successful_messages: 0,
            failed_messages: 0,
            availability: 100.0,
        }
    }
}

impl SystemStatistics {
    /// 错误率（0到1之间的比例），无消息时为0
    pub fn error_rate(&self) -> f64 {
        if self.total_messages == 0 {
            0.0
        } else {
            self.failed_messages as f64 / self.total_messages as f64
        }
    }
}

/// 单条消息/资源的处理结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Completed,
    Error,
}

/// 外部系统
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSystem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub system_type: SystemType,
    pub vendor: String,
    pub version: String,
    pub status: SystemStatus,
    pub configuration: SystemConfiguration,
    pub statistics: SystemStatistics,
    pub error_count: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for ExternalSystem {
    const KIND: &'static str = "ExternalSystem";

    fn id(&self) -> &str {
        &self.id
    }
}

/// 外部系统注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSystemRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub system_type: SystemType,
    pub vendor: String,
    pub version: String,
    pub configuration: SystemConfiguration,
}

/// 外部系统更新请求，只合并提供的字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateSystemRequest {
    pub name: Option<String>,
    pub vendor: Option<String>,
    pub version: Option<String>,
    pub status: Option<SystemStatus>,
    pub configuration: Option<SystemConfiguration>,
}

impl ExternalSystem {
    /// 根据注册请求创建新系统（默认未激活，统计清零）
    pub fn new(request: RegisterSystemRequest) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            name: request.name,
            system_type: request.system_type,
            vendor: request.vendor,
            version: request.version,
            status: SystemStatus::Inactive,
            configuration: request.configuration,
            statistics: SystemStatistics::default(),
            error_count: 0,
            last_sync: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 合并更新字段，不触碰统计数据
    pub fn apply_update(&mut self, update: UpdateSystemRequest) -> Result<()> {
        if let Some(configuration) = update.configuration {
            configuration.validate(self.system_type)?;
            self.configuration = configuration;
        }
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(IntegrationError::BadRequest("name must not be empty".to_string()));
            }
            self.name = name;
        }
        if let Some(vendor) = update.vendor {
            self.vendor = vendor;
        }
        if let Some(version) = update.version {
            self.version = version;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 记录一次处理结果
    pub fn record_outcome(&mut self, outcome: ProcessingOutcome, error: Option<String>) {
        let now = Utc::now();
        self.statistics.total_messages += 1;
        match outcome {
            ProcessingOutcome::Completed => {
                self.statistics.successful_messages += 1;
            }
            ProcessingOutcome::Error => {
                self.statistics.failed_messages += 1;
                self.error_count += 1;
                if error.is_some() {
                    self.last_error = error;
                }
            }
        }
        self.last_sync = Some(now);
        self.updated_at = now;
    }
}
