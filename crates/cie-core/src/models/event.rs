//! 集成审计事件模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 集成事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationEventType {
    MessageReceived,
    MessageSent,
    ResourceReceived,
    TransformationCompleted,
    ValidationFailed,
    NotificationSent,
    SystemRegistered,
    SystemUpdated,
    SystemRemoved,
    ErrorOccurred,
}

impl IntegrationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageReceived => "message_received",
            Self::MessageSent => "message_sent",
            Self::ResourceReceived => "resource_received",
            Self::TransformationCompleted => "transformation_completed",
            Self::ValidationFailed => "validation_failed",
            Self::NotificationSent => "notification_sent",
            Self::SystemRegistered => "system_registered",
            Self::SystemUpdated => "system_updated",
            Self::SystemRemoved => "system_removed",
            Self::ErrorOccurred => "error_occurred",
        }
    }
}

impl std::fmt::Display for IntegrationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 事件结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failure,
    Warning,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Warning => "warning",
        }
    }
}

/// 事件元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub source: String,
    pub actor: Option<String>,
    pub session_id: Option<String>,
    pub environment: String,
}

/// 集成事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEvent {
    pub id: String,
    pub event_type: IntegrationEventType,
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    pub metadata: EventMetadata,
}
