//! 集成事件日志
//!
//! 事件写入是“发出即忘”：接收器失败只记录警告，不影响触发事件的业务操作。

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use cie_core::utils::generate_id;
use cie_core::{EventMetadata, EventStatus, IntegrationEvent, IntegrationEventType};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 事件接收器
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    async fn record(&self, event: &IntegrationEvent) -> Result<()>;
}

/// 以结构化日志写出事件（`audit` target）
#[derive(Debug, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn record(&self, event: &IntegrationEvent) -> Result<()> {
        info!(
            target: "audit",
            event_id = %event.id,
            event_type = event.event_type.as_str(),
            system_id = %event.system_id,
            message_id = event.message_id.as_deref().unwrap_or(""),
            status = event.status.as_str(),
            environment = %event.metadata.environment,
            "integration event"
        );
        Ok(())
    }
}

/// 有界内存接收器，保留最近的事件供查询
#[derive(Debug)]
pub struct InMemoryEventSink {
    capacity: usize,
    events: RwLock<VecDeque<IntegrationEvent>>,
}

impl InMemoryEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::new()),
        }
    }

    /// 最近的事件，新的在前
    pub async fn recent(&self, limit: usize) -> Vec<IntegrationEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, event: &IntegrationEvent) -> Result<()> {
        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

/// 事件日志器，向所有注册的接收器分发事件
pub struct EventLogger {
    source: String,
    environment: String,
    session_id: String,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventLogger {
    pub fn new(source: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            environment: environment.into(),
            session_id: generate_id(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// 记录一条成功事件
    pub async fn log(
        &self,
        event_type: IntegrationEventType,
        system_id: &str,
        message_id: Option<&str>,
    ) -> IntegrationEvent {
        self.log_with_status(event_type, system_id, message_id, EventStatus::Success)
            .await
    }

    pub async fn log_with_status(
        &self,
        event_type: IntegrationEventType,
        system_id: &str,
        message_id: Option<&str>,
        status: EventStatus,
    ) -> IntegrationEvent {
        let event = IntegrationEvent {
            id: generate_id(),
            event_type,
            system_id: system_id.to_string(),
            message_id: message_id.map(str::to_string),
            timestamp: Utc::now(),
            status,
            metadata: EventMetadata {
                source: self.source.clone(),
                actor: None,
                session_id: Some(self.session_id.clone()),
                environment: self.environment.clone(),
            },
        };

        for sink in &self.sinks {
            if let Err(e) = sink.record(&event).await {
                warn!(
                    "Event sink {} failed to record {} event {}: {}",
                    sink.name(),
                    event.event_type,
                    event.id,
                    e
                );
            }
        }

        event
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new("clinical-integration-engine", "development")
            .with_sink(Arc::new(TracingEventSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn record(&self, _event: &IntegrationEvent) -> Result<()> {
            Err(anyhow::anyhow!("audit store unavailable"))
        }
    }

    #[tokio::test]
    async fn test_log_builds_event_with_metadata() {
        let memory = Arc::new(InMemoryEventSink::new(10));
        let logger = EventLogger::new("cie-test", "staging").with_sink(memory.clone());

        let event = logger
            .log(IntegrationEventType::MessageReceived, "sys-1", Some("msg-1"))
            .await;

        assert_eq!(event.status, EventStatus::Success);
        assert_eq!(event.metadata.environment, "staging");
        assert_eq!(event.metadata.source, "cie-test");
        assert_eq!(event.message_id.as_deref(), Some("msg-1"));
        assert_eq!(memory.recent(5).await, vec![event]);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let memory = Arc::new(InMemoryEventSink::new(10));
        let logger = EventLogger::new("cie-test", "test")
            .with_sink(Arc::new(FailingSink))
            .with_sink(memory.clone());

        logger
            .log(IntegrationEventType::TransformationCompleted, "workflow", None)
            .await;

        assert_eq!(memory.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_sink_is_bounded() {
        let memory = Arc::new(InMemoryEventSink::new(3));
        let logger = EventLogger::new("cie-test", "test").with_sink(memory.clone());
        for i in 0..5 {
            logger
                .log(IntegrationEventType::MessageReceived, &format!("sys-{}", i), None)
                .await;
        }

        let recent = memory.recent(10).await;
        let systems: Vec<&str> = recent.iter().map(|e| e.system_id.as_str()).collect();
        assert_eq!(systems, vec!["sys-4", "sys-3", "sys-2"]);
    }
}
