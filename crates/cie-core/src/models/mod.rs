//! 核心数据模型定义

pub mod event;
pub mod fhir;
pub mod health;
pub mod message;
pub mod system;
pub mod workflow;

pub use event::*;
pub use fhir::*;
pub use health::*;
pub use message::*;
pub use system::*;
pub use workflow::*;

use serde::{Deserialize, Serialize};

/// 消息/资源处理状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Received,
    Completed,
    Error,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessingStatus::Received)
    }
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Error,
    Warning,
    Information,
}
