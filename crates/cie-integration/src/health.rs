//! 外部系统健康检查引擎
//!
//! 每个系统的检查在独立任务中并发执行，全部完成后按注册顺序返回。
//! 所有系统类型共用同一套阈值。

use chrono::Utc;
use cie_core::{
    CheckStatus, ExternalSystem, HealthCheckResult, HealthStatus, IntegrationError,
    IntegrationHealth, Result, SystemStatistics, SystemStatus,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::probe::ConnectivityProbe;
use crate::registry::SystemRegistry;

/// 错误率高于该值判定为不健康
pub const UNHEALTHY_ERROR_RATE: f64 = 0.10;
/// 错误率高于该值判定为降级
pub const DEGRADED_ERROR_RATE: f64 = 0.05;
/// 累计错误数高于该值判定为降级
pub const DEGRADED_ERROR_COUNT: u64 = 5;

const RECOMMENDATIONS: [&str; 3] = [
    "Check network connectivity",
    "Verify configuration",
    "Review error logs",
];

/// 健康检查参数
#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    pub probe_timeout: Duration,
    pub performance_threshold: Duration,
    pub max_concurrent_checks: usize,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(5000),
            performance_threshold: Duration::from_millis(5000),
            max_concurrent_checks: 16,
        }
    }
}

/// 根据消息统计分类健康状态，边界值不越级
pub fn classify(statistics: &SystemStatistics, error_count: u64) -> HealthStatus {
    let error_rate = statistics.error_rate();
    if error_rate > UNHEALTHY_ERROR_RATE {
        HealthStatus::Unhealthy
    } else if error_rate > DEGRADED_ERROR_RATE || error_count > DEGRADED_ERROR_COUNT {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// 健康检查引擎
pub struct HealthCheckEngine {
    registry: Arc<SystemRegistry>,
    probe: Arc<dyn ConnectivityProbe>,
    options: HealthCheckOptions,
}

impl HealthCheckEngine {
    pub fn new(
        registry: Arc<SystemRegistry>,
        probe: Arc<dyn ConnectivityProbe>,
        options: HealthCheckOptions,
    ) -> Self {
        Self {
            registry,
            probe,
            options,
        }
    }

    pub fn options(&self) -> &HealthCheckOptions {
        &self.options
    }

    /// 检查指定系统；未指定时检查全部已注册系统
    pub async fn check(&self, system_id: Option<&str>) -> Result<Vec<IntegrationHealth>> {
        let systems = match system_id {
            Some(id) => vec![self.registry.get(id).await?],
            None => self.registry.list().await?,
        };
        info!("Running health checks for {} systems", systems.len());

        let permits = Arc::new(Semaphore::new(self.options.max_concurrent_checks.max(1)));
        let mut handles = Vec::with_capacity(systems.len());
        for system in systems {
            let probe = self.probe.clone();
            let options = self.options.clone();
            let permits = permits.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                check_system(probe.as_ref(), &options, system).await
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle
                .await
                .map_err(|e| IntegrationError::Internal(format!("health check task failed: {}", e)))?;
            reports.push(report);
        }
        Ok(reports)
    }
}

async fn check_system(
    probe: &dyn ConnectivityProbe,
    options: &HealthCheckOptions,
    system: ExternalSystem,
) -> IntegrationHealth {
    if system.status == SystemStatus::Maintenance {
        debug!("System {} is under maintenance, skipping probe", system.name);
        return report(
            &system,
            HealthStatus::Unknown,
            0,
            vec![
                HealthCheckResult {
                    name: "Connectivity".to_string(),
                    status: CheckStatus::Warn,
                    message: "System is under maintenance and was not probed".to_string(),
                    response_time: 0,
                },
            ],
        );
    }

    let started = Instant::now();
    let outcome = tokio::time::timeout(options.probe_timeout, probe.probe(&system)).await;
    let response_time = started.elapsed().as_millis() as u64;

    let (status, connectivity_message) = match outcome {
        Ok(Ok(())) => {
            let status = classify(&system.statistics, system.error_count);
            (status, format!("Connectivity check {}", status.as_str()))
        }
        Ok(Err(e)) => {
            error!("Health check failed for {}: {:#}", system.name, e);
            let failure = IntegrationError::ProbeFailure(format!("{:#}", e));
            (HealthStatus::Unhealthy, failure.to_string())
        }
        Err(_) => {
            error!(
                "Health check failed for {}: probe timed out after {:?}",
                system.name, options.probe_timeout
            );
            let failure = IntegrationError::ProbeFailure(format!(
                "timed out after {} ms",
                options.probe_timeout.as_millis()
            ));
            (HealthStatus::Unhealthy, failure.to_string())
        }
    };

    let performance = if response_time < options.performance_threshold.as_millis() as u64 {
        CheckStatus::Pass
    } else {
        CheckStatus::Warn
    };

    let checks = vec![
        HealthCheckResult {
            name: "Connectivity".to_string(),
            status: status.into(),
            message: connectivity_message,
            response_time,
        },
        HealthCheckResult {
            name: "Authentication".to_string(),
            status: CheckStatus::Pass,
            message: "Authentication configuration accepted".to_string(),
            response_time: 0,
        },
        HealthCheckResult {
            name: "Performance".to_string(),
            status: performance,
            message: format!("Response time {} ms", response_time),
            response_time,
        },
    ];

    report(&system, status, response_time, checks)
}

fn report(
    system: &ExternalSystem,
    status: HealthStatus,
    response_time: u64,
    checks: Vec<HealthCheckResult>,
) -> IntegrationHealth {
    let now = Utc::now();
    let minutes = ((now - system.created_at).num_seconds() as f64 / 60.0).max(1.0);
    let statistics = &system.statistics;
    let error_rate = if statistics.total_messages == 0 {
        0.0
    } else {
        statistics.failed_messages as f64 * 100.0 / statistics.total_messages as f64
    };
    let recommendations = if status == HealthStatus::Healthy {
        Vec::new()
    } else {
        RECOMMENDATIONS.iter().map(|r| r.to_string()).collect()
    };

    IntegrationHealth {
        system_id: system.id.clone(),
        system_name: system.name.clone(),
        status,
        last_check: now,
        response_time,
        uptime: statistics.availability,
        error_rate,
        throughput: statistics.total_messages as f64 / minutes,
        checks,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLogger;
    use async_trait::async_trait;
    use cie_core::{
        AuthenticationConfig, InMemoryRepository, ProcessingOutcome, RegisterSystemRequest,
        SystemConfiguration, SystemType, UpdateSystemRequest,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubProbe {
        fail: bool,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConnectivityProbe for StubProbe {
        async fn probe(&self, _system: &ExternalSystem) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(())
        }
    }

    fn stats(total: u64, failed: u64) -> SystemStatistics {
        SystemStatistics {
            total_messages: total,
            successful_messages: total - failed,
            failed_messages: failed,
            availability: 100.0,
        }
    }

    fn request(name: &str) -> RegisterSystemRequest {
        RegisterSystemRequest {
            name: name.to_string(),
            system_type: SystemType::Hl7,
            vendor: "Epic".to_string(),
            version: "2.7".to_string(),
            configuration: SystemConfiguration {
                endpoint: "10.1.1.5".to_string(),
                protocol: "mllp".to_string(),
                port: Some(2575),
                authentication: AuthenticationConfig::None,
                timeout: 3000,
                retry_attempts: 0,
                retry_delay: 0,
                batch_size: None,
                headers: Default::default(),
                mapping: Default::default(),
                validation: Default::default(),
            },
        }
    }

    fn engine(probe: Arc<StubProbe>, options: HealthCheckOptions) -> (Arc<SystemRegistry>, HealthCheckEngine) {
        let registry = Arc::new(SystemRegistry::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(EventLogger::new("cie-test", "test")),
        ));
        let engine = HealthCheckEngine::new(registry.clone(), probe, options);
        (registry, engine)
    }

    #[test]
    fn test_thresholds_are_boundary_exact() {
        assert_eq!(classify(&stats(0, 0), 0), HealthStatus::Healthy);
        assert_eq!(classify(&stats(100, 10), 0), HealthStatus::Degraded);
        assert_eq!(classify(&stats(10000, 1001), 0), HealthStatus::Unhealthy);
        assert_eq!(classify(&stats(100, 5), 0), HealthStatus::Healthy);
        assert_eq!(classify(&stats(10000, 501), 0), HealthStatus::Degraded);
    }

    #[test]
    fn test_error_count_degrades_diluted_failures() {
        assert_eq!(classify(&stats(100000, 6), 6), HealthStatus::Degraded);
        assert_eq!(classify(&stats(100000, 5), 5), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_error_rate_reported_as_percent() {
        let (registry, engine) = engine(Arc::new(StubProbe::default()), HealthCheckOptions::default());
        let system = registry.register(request("ADT feed")).await.unwrap();
        for i in 0..10 {
            let outcome = if i < 2 {
                ProcessingOutcome::Error
            } else {
                ProcessingOutcome::Completed
            };
            registry.record_outcome(&system.id, outcome, None).await.unwrap();
        }

        let reports = engine.check(Some(&system.id)).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_rate, 20.0);
        assert_eq!(reports[0].status, HealthStatus::Unhealthy);
        assert_eq!(reports[0].recommendations.len(), 3);
        assert_eq!(reports[0].check("Connectivity").unwrap().status, CheckStatus::Fail);
        assert_eq!(reports[0].check("Authentication").unwrap().status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn test_probe_failure_forces_unhealthy() {
        let probe = Arc::new(StubProbe {
            fail: true,
            ..Default::default()
        });
        let (registry, engine) = engine(probe, HealthCheckOptions::default());
        let system = registry.register(request("Lab")).await.unwrap();

        let report = engine.check(Some(&system.id)).await.unwrap().remove(0);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report
            .check("Connectivity")
            .unwrap()
            .message
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_probe_timeout_is_bounded() {
        let probe = Arc::new(StubProbe {
            delay: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        let options = HealthCheckOptions {
            probe_timeout: Duration::from_millis(50),
            performance_threshold: Duration::from_millis(5000),
            max_concurrent_checks: 4,
        };
        let (registry, engine) = engine(probe, options);
        let system = registry.register(request("Slow")).await.unwrap();

        let started = Instant::now();
        let report = engine.check(Some(&system.id)).await.unwrap().remove(0);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_slow_probe_warns_performance() {
        let probe = Arc::new(StubProbe {
            delay: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        let options = HealthCheckOptions {
            probe_timeout: Duration::from_millis(1000),
            performance_threshold: Duration::from_millis(10),
            max_concurrent_checks: 4,
        };
        let (registry, engine) = engine(probe, options);
        let system = registry.register(request("Busy")).await.unwrap();

        let report = engine.check(Some(&system.id)).await.unwrap().remove(0);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.check("Performance").unwrap().status, CheckStatus::Warn);
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_is_unknown_and_not_probed() {
        let probe = Arc::new(StubProbe::default());
        let (registry, engine) = engine(probe.clone(), HealthCheckOptions::default());
        let system = registry.register(request("Down for upgrade")).await.unwrap();
        registry
            .update(
                &system.id,
                UpdateSystemRequest {
                    status: Some(SystemStatus::Maintenance),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let report = engine.check(Some(&system.id)).await.unwrap().remove(0);
        assert_eq!(report.status, HealthStatus::Unknown);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_check_all_systems() {
        let probe = Arc::new(StubProbe::default());
        let (registry, engine) = engine(probe.clone(), HealthCheckOptions::default());
        for name in ["A", "B", "C"] {
            registry.register(request(name)).await.unwrap();
        }

        let reports = engine.check(None).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.status == HealthStatus::Healthy));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);

        assert!(matches!(
            engine.check(Some("nope")).await,
            Err(IntegrationError::NotFound { .. })
        ));
    }
}
