//! # 临床集成模块
//!
//! 提供消息接入与外部系统管理功能，包括：
//! - HL7 v2.x 段解析、结构校验与ACK生成
//! - FHIR资源结构校验
//! - 外部系统注册与消息统计
//! - 外部系统连通性探测与健康检查
//! - 集成事件日志与事件接收器

pub mod events;
pub mod fhir;
pub mod health;
pub mod hl7;
pub mod probe;
pub mod registry;
pub mod service;

pub use events::{EventLogger, EventSink, InMemoryEventSink, TracingEventSink};
pub use fhir::FhirValidator;
pub use health::{HealthCheckEngine, HealthCheckOptions};
pub use hl7::{build_ack, Hl7Error, Hl7Parser, Hl7Validator, MshHeader};
pub use probe::{ConnectivityProbe, NetworkProbe};
pub use registry::SystemRegistry;
pub use service::IntegrationService;
