//! 系统健康快照模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 整体健康状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// 子检查结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl From<HealthStatus> for CheckStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => CheckStatus::Pass,
            HealthStatus::Degraded | HealthStatus::Unknown => CheckStatus::Warn,
            HealthStatus::Unhealthy => CheckStatus::Fail,
        }
    }
}

/// 命名子检查
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    /// 毫秒
    pub response_time: u64,
}

/// 单个外部系统的健康快照，不持久化
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationHealth {
    pub system_id: String,
    pub system_name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    /// 探测耗时（毫秒）
    pub response_time: u64,
    /// 可用率（百分比）
    pub uptime: f64,
    /// 错误率（百分比）
    pub error_rate: f64,
    /// 每分钟消息数
    pub throughput: f64,
    pub checks: Vec<HealthCheckResult>,
    pub recommendations: Vec<String>,
}

impl IntegrationHealth {
    pub fn check(&self, name: &str) -> Option<&HealthCheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}
