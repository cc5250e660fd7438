//! # CIE管理模块
//!
//! 提供引擎运维相关功能：
//! - 分层配置管理（默认值、TOML文件、环境变量）与配置校验
//! - Prometheus指标，以及把集成事件转换为计数器的事件接收器

pub mod config;
pub mod monitoring;

pub use config::{ConfigManager, ConfigValidator, EngineConfig};
pub use monitoring::{IntegrationMetrics, MetricsEventSink};
