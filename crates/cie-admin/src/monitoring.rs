//! 集成监控指标
//!
//! 指标全部注册在独立的 Prometheus `Registry` 中，通过 [`IntegrationMetrics::render`]
//! 以文本格式导出。

use anyhow::Result;
use async_trait::async_trait;
use cie_core::{HealthStatus, IntegrationEvent, IntegrationHealth};
use cie_integration::EventSink;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::debug;

/// 集成引擎指标
#[derive(Debug, Clone)]
pub struct IntegrationMetrics {
    registry: Registry,
    /// 按事件类型和状态统计的事件数
    events_total: IntCounterVec,
    /// 各系统错误率（百分比）
    system_error_rate: GaugeVec,
    /// 各系统健康状态编码
    system_health_status: GaugeVec,
    probe_response_seconds: Histogram,
}

impl IntegrationMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            Opts::new("cie_integration_events_total", "Total number of integration events"),
            &["event_type", "status"],
        )?;

        let system_error_rate = GaugeVec::new(
            Opts::new("cie_system_error_rate", "Message error rate per system in percent"),
            &["system_id"],
        )?;

        let system_health_status = GaugeVec::new(
            Opts::new(
                "cie_system_health_status",
                "Health status per system (0 healthy, 1 degraded, 2 unhealthy, 3 unknown)",
            ),
            &["system_id"],
        )?;

        let probe_response_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cie_health_probe_response_seconds",
                "Connectivity probe response time in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(system_error_rate.clone()))?;
        registry.register(Box::new(system_health_status.clone()))?;
        registry.register(Box::new(probe_response_seconds.clone()))?;

        Ok(Self {
            registry,
            events_total,
            system_error_rate,
            system_health_status,
            probe_response_seconds,
        })
    }

    pub fn record_event(&self, event: &IntegrationEvent) {
        self.events_total
            .with_label_values(&[event.event_type.as_str(), event.status.as_str()])
            .inc();
    }

    /// 用健康报告刷新系统级指标
    pub fn observe_health(&self, reports: &[IntegrationHealth]) {
        for report in reports {
            debug!("Recording health metrics for {}", report.system_id);
            self.system_error_rate
                .with_label_values(&[report.system_id.as_str()])
                .set(report.error_rate);
            self.system_health_status
                .with_label_values(&[report.system_id.as_str()])
                .set(health_code(report.status));
            if report.status != HealthStatus::Unknown {
                self.probe_response_seconds
                    .observe(report.response_time as f64 / 1000.0);
            }
        }
    }

    /// 删除已注销系统的指标
    pub fn forget_system(&self, system_id: &str) {
        let _ = self.system_error_rate.remove_label_values(&[system_id]);
        let _ = self.system_health_status.remove_label_values(&[system_id]);
    }

    /// Prometheus文本格式
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

fn health_code(status: HealthStatus) -> f64 {
    match status {
        HealthStatus::Healthy => 0.0,
        HealthStatus::Degraded => 1.0,
        HealthStatus::Unhealthy => 2.0,
        HealthStatus::Unknown => 3.0,
    }
}

/// 将事件流转换为计数器的接收器
#[derive(Debug, Clone)]
pub struct MetricsEventSink {
    metrics: Arc<IntegrationMetrics>,
}

impl MetricsEventSink {
    pub fn new(metrics: Arc<IntegrationMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl EventSink for MetricsEventSink {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn record(&self, event: &IntegrationEvent) -> Result<()> {
        self.metrics.record_event(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cie_core::{EventStatus, IntegrationEventType};
    use cie_integration::EventLogger;

    fn report(system_id: &str, status: HealthStatus, error_rate: f64) -> IntegrationHealth {
        IntegrationHealth {
            system_id: system_id.to_string(),
            system_name: system_id.to_uppercase(),
            status,
            last_check: Utc::now(),
            response_time: 120,
            uptime: 100.0 - error_rate,
            error_rate,
            throughput: 0.0,
            checks: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_event_sink_counts_events() {
        let metrics = Arc::new(IntegrationMetrics::new().unwrap());
        let logger = EventLogger::new("cie-test", "test")
            .with_sink(Arc::new(MetricsEventSink::new(metrics.clone())));

        logger
            .log(IntegrationEventType::MessageReceived, "sys-1", Some("m-1"))
            .await;
        logger
            .log(IntegrationEventType::MessageReceived, "sys-1", Some("m-2"))
            .await;
        logger
            .log_with_status(
                IntegrationEventType::ValidationFailed,
                "sys-1",
                Some("m-3"),
                EventStatus::Failure,
            )
            .await;

        let text = metrics.render().unwrap();
        assert!(text.contains(
            r#"cie_integration_events_total{event_type="message_received",status="success"} 2"#
        ));
        assert!(text.contains(
            r#"cie_integration_events_total{event_type="validation_failed",status="failure"} 1"#
        ));
    }

    #[test]
    fn test_observe_health() {
        let metrics = IntegrationMetrics::new().unwrap();
        metrics.observe_health(&[
            report("lab", HealthStatus::Unhealthy, 20.0),
            report("ris", HealthStatus::Healthy, 0.0),
        ]);

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"cie_system_error_rate{system_id="lab"} 20"#));
        assert!(text.contains(r#"cie_system_health_status{system_id="lab"} 2"#));
        assert!(text.contains(r#"cie_system_health_status{system_id="ris"} 0"#));
        assert!(text.contains("cie_health_probe_response_seconds_count 2"));

        metrics.forget_system("lab");
        let text = metrics.render().unwrap();
        assert!(!text.contains(r#"system_id="lab""#));
    }
}
