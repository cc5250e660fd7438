//! 应用状态装配

use cie_admin::{EngineConfig, IntegrationMetrics, MetricsEventSink};
use cie_core::InMemoryRepository;
use cie_integration::{
    ConnectivityProbe, EventLogger, HealthCheckEngine, HealthCheckOptions, InMemoryEventSink,
    IntegrationService, SystemRegistry, TracingEventSink,
};
use cie_workflow::{StepRegistry, WorkflowEngine};
use std::sync::Arc;

/// 所有处理器共享的组件
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SystemRegistry>,
    pub service: Arc<IntegrationService>,
    pub health: Arc<HealthCheckEngine>,
    pub workflows: Arc<WorkflowEngine>,
    pub recent_events: Arc<InMemoryEventSink>,
    pub metrics: Arc<IntegrationMetrics>,
}

impl AppState {
    /// 使用内存仓储装配引擎
    pub fn new(config: &EngineConfig, probe: Arc<dyn ConnectivityProbe>) -> anyhow::Result<Self> {
        let metrics = Arc::new(IntegrationMetrics::new()?);
        let recent_events = Arc::new(InMemoryEventSink::new(config.events.buffer_size));
        let events = Arc::new(
            EventLogger::new(config.events.source.clone(), config.events.environment.clone())
                .with_sink(Arc::new(TracingEventSink))
                .with_sink(recent_events.clone())
                .with_sink(Arc::new(MetricsEventSink::new(metrics.clone()))),
        );

        let registry = Arc::new(SystemRegistry::new(
            Arc::new(InMemoryRepository::new()),
            events.clone(),
        ));
        let service = Arc::new(IntegrationService::new(
            registry.clone(),
            events.clone(),
            Arc::new(InMemoryRepository::new()),
            Arc::new(InMemoryRepository::new()),
        ));
        let health = Arc::new(HealthCheckEngine::new(
            registry.clone(),
            probe,
            HealthCheckOptions::from(&config.health),
        ));
        let workflows = Arc::new(WorkflowEngine::new(
            Arc::new(InMemoryRepository::new()),
            StepRegistry::with_defaults(registry.clone(), events.clone()),
            events,
        ));

        Ok(Self {
            registry,
            service,
            health,
            workflows,
            recent_events,
            metrics,
        })
    }
}
