//! HL7消息模型

use super::{ErrorSeverity, ProcessingStatus};
use crate::repository::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 字段语义类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Datetime,
}

/// HL7字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hl7Field {
    /// 在段内以 `|` 切分后的位置，段类型本身位于0
    pub index: usize,
    pub value: String,
    pub field_type: FieldType,
    pub description: String,
}

/// HL7段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hl7Segment {
    pub segment_type: String,
    pub fields: Vec<Hl7Field>,
    pub raw_segment: String,
}

impl Hl7Segment {
    /// 按位置获取字段值
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.index == index)
            .map(|field| field.value.as_str())
    }
}

/// 段类型 -> (字段位置 -> 值)
pub type ParsedData = BTreeMap<String, BTreeMap<usize, String>>;

/// HL7处理错误
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hl7ProcessingError {
    pub error_code: String,
    pub error_message: String,
    pub severity: ErrorSeverity,
}

/// HL7消息元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hl7MessageMetadata {
    pub processing_id: Option<String>,
    pub version_id: Option<String>,
    pub sequence_number: Option<u64>,
    pub acceptance_acknowledgement: Option<String>,
    pub application_acknowledgement: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

/// 已接收的HL7消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hl7Message {
    pub id: String,
    pub message_type: String,
    pub trigger_event: String,
    pub message_control_id: String,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub receiver: String,
    pub processing_status: ProcessingStatus,
    pub segments: Vec<Hl7Segment>,
    pub parsed_data: ParsedData,
    pub raw_message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Hl7ProcessingError>,
    pub metadata: Hl7MessageMetadata,
}

impl Entity for Hl7Message {
    const KIND: &'static str = "HL7Message";

    fn id(&self) -> &str {
        &self.id
    }
}

/// HL7消息接收请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestHl7Request {
    pub message_type: String,
    #[serde(default)]
    pub trigger_event: Option<String>,
    #[serde(default)]
    pub message_control_id: Option<String>,
    #[serde(default)]
    pub processing_id: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
    pub sender: String,
    pub receiver: String,
    pub raw_message: String,
    #[serde(default)]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub acceptance_acknowledgement: Option<String>,
    #[serde(default)]
    pub application_acknowledgement: Option<String>,
}

/// 消息查询过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageFilter {
    pub message_type: Option<String>,
    pub status: Option<ProcessingStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl MessageFilter {
    pub fn matches(&self, message: &Hl7Message) -> bool {
        if let Some(message_type) = &self.message_type {
            if !message.message_type.eq_ignore_ascii_case(message_type) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if message.processing_status != status {
                return false;
            }
        }
        if let Some(from) = self.from {
            if message.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if message.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// 批量处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult<T> {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<T>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            processed: 0,
            successful: 0,
            failed: 0,
            results: Vec::new(),
        }
    }
}
