//! 外部系统注册表与消息统计

use cie_core::{
    ExternalSystem, IntegrationError, IntegrationEventType, ProcessingOutcome,
    RegisterSystemRequest, Repository, Result, UpdateSystemRequest,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::events::EventLogger;

/// 外部系统注册表
///
/// 统计更新通过仓储的原子 `update` 完成，同一系统的并发更新不会丢失。
pub struct SystemRegistry {
    repository: Arc<dyn Repository<ExternalSystem>>,
    events: Arc<EventLogger>,
}

impl SystemRegistry {
    pub fn new(repository: Arc<dyn Repository<ExternalSystem>>, events: Arc<EventLogger>) -> Self {
        Self { repository, events }
    }

    /// 注册外部系统：校验配置，分配ID，状态为inactive，统计清零
    pub async fn register(&self, request: RegisterSystemRequest) -> Result<ExternalSystem> {
        if request.name.trim().is_empty() {
            return Err(IntegrationError::BadRequest("name must not be empty".to_string()));
        }
        request.configuration.validate(request.system_type)?;

        let system = self.repository.create(ExternalSystem::new(request)).await?;
        info!(
            "Registered {} system {} ({})",
            system.system_type, system.name, system.id
        );
        self.events
            .log(IntegrationEventType::SystemRegistered, &system.id, None)
            .await;
        Ok(system)
    }

    pub async fn get(&self, id: &str) -> Result<ExternalSystem> {
        self.repository.require(id).await
    }

    pub async fn list(&self) -> Result<Vec<ExternalSystem>> {
        let mut systems = self.repository.list(&|_: &ExternalSystem| true).await?;
        systems.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(systems)
    }

    /// 合并更新字段，统计数据保持不变
    pub async fn update(&self, id: &str, update: UpdateSystemRequest) -> Result<ExternalSystem> {
        let system = self
            .repository
            .update(id, Box::new(move |system: &mut ExternalSystem| system.apply_update(update)))
            .await?;
        info!("Updated external system {}", id);
        self.events
            .log(IntegrationEventType::SystemUpdated, id, None)
            .await;
        Ok(system)
    }

    /// 硬删除；已存储的消息和资源保留原来的系统引用
    pub async fn delete(&self, id: &str) -> Result<ExternalSystem> {
        let system = self.repository.delete(id).await?;
        info!("Removed external system {} ({})", system.name, id);
        self.events
            .log(IntegrationEventType::SystemRemoved, id, None)
            .await;
        Ok(system)
    }

    /// 原子地记录一次处理结果
    pub async fn record_outcome(
        &self,
        id: &str,
        outcome: ProcessingOutcome,
        error: Option<String>,
    ) -> Result<ExternalSystem> {
        let system = self
            .repository
            .update(
                id,
                Box::new(move |system: &mut ExternalSystem| {
                    system.record_outcome(outcome, error);
                    Ok(())
                }),
            )
            .await?;
        debug!(
            "Recorded {:?} for system {}: {}/{} failed",
            outcome, id, system.statistics.failed_messages, system.statistics.total_messages
        );
        Ok(system)
    }
}
