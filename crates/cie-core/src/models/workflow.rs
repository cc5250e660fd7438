//! 集成工作流模型

use super::FhirResourceType;
use crate::error::{IntegrationError, Result};
use crate::repository::Entity;
use crate::utils::generate_id;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// 工作流方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Inbound,
    Outbound,
    BiDirectional,
}

/// 工作流状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Inactive,
    Active,
}

/// 工作流触发方式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowTrigger {
    Manual,
    Schedule { cron: String },
    Event { event_type: String },
    Message { message_type: String },
}

impl Default for WorkflowTrigger {
    fn default() -> Self {
        Self::Manual
    }
}

impl WorkflowTrigger {
    fn validate(&self) -> Result<()> {
        let missing = match self {
            Self::Manual => None,
            Self::Schedule { cron } if cron.trim().is_empty() => Some("trigger.cron"),
            Self::Event { event_type } if event_type.trim().is_empty() => Some("trigger.event_type"),
            Self::Message { message_type } if message_type.trim().is_empty() => {
                Some("trigger.message_type")
            }
            _ => None,
        };
        match missing {
            Some(field) => Err(IntegrationError::BadRequest(format!("{} must not be empty", field))),
            None => Ok(()),
        }
    }
}

/// 步骤类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Receive,
    Transform,
    Validate,
    Route,
    Send,
    Store,
    Notify,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Transform => "transform",
            Self::Validate => "validate",
            Self::Route => "route",
            Self::Send => "send",
            Self::Store => "store",
            Self::Notify => "notify",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// receive步骤配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ReceiveConfig {
    pub source: Option<String>,
    pub require_payload: bool,
}

/// 字段映射，路径以 `.` 分隔
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub required: bool,
}

/// transform步骤配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TransformConfig {
    pub mappings: Vec<FieldMapping>,
}

/// validate步骤配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ValidateConfig {
    pub required_fields: Vec<String>,
    pub resource_type: Option<FhirResourceType>,
}

/// 路由规则：字段值相等时路由到目标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteRule {
    pub field: String,
    pub equals: Value,
    pub destination: String,
}

/// route步骤配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RouteConfig {
    pub rules: Vec<RouteRule>,
    pub default_destination: Option<String>,
}

/// send步骤配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendConfig {
    pub system_id: String,
}

/// store步骤配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreConfig {
    pub key: String,
}

/// notify步骤配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotifyConfig {
    pub channel: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// 工作流步骤
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub order: u32,
    #[serde(default)]
    pub configuration: Value,
}

impl WorkflowStep {
    /// 将配置解析为对应步骤类型的强类型结构
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.configuration {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            IntegrationError::BadRequest(format!(
                "Invalid configuration for {} step {}: {}",
                self.step_type, self.id, e
            ))
        })
    }

    /// 在定义阶段校验步骤配置
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(IntegrationError::BadRequest("step id must not be empty".to_string()));
        }
        match self.step_type {
            StepType::Receive => self.typed_config::<ReceiveConfig>().map(|_| ()),
            StepType::Transform => {
                let config: TransformConfig = self.typed_config()?;
                if config
                    .mappings
                    .iter()
                    .any(|m| m.source.is_empty() || m.target.is_empty())
                {
                    return Err(IntegrationError::BadRequest(format!(
                        "transform step {} has an empty mapping path",
                        self.id
                    )));
                }
                Ok(())
            }
            StepType::Validate => self.typed_config::<ValidateConfig>().map(|_| ()),
            StepType::Route => {
                let config: RouteConfig = self.typed_config()?;
                if config.rules.is_empty() && config.default_destination.is_none() {
                    return Err(IntegrationError::BadRequest(format!(
                        "route step {} needs at least one rule or a default destination",
                        self.id
                    )));
                }
                Ok(())
            }
            StepType::Send => {
                let config: SendConfig = self.typed_config()?;
                if config.system_id.trim().is_empty() {
                    return Err(IntegrationError::BadRequest(format!(
                        "send step {} needs a systemId",
                        self.id
                    )));
                }
                Ok(())
            }
            StepType::Store => {
                let config: StoreConfig = self.typed_config()?;
                if config.key.trim().is_empty() {
                    return Err(IntegrationError::BadRequest(format!(
                        "store step {} needs a key",
                        self.id
                    )));
                }
                Ok(())
            }
            StepType::Notify => self.typed_config::<NotifyConfig>().map(|_| ()),
        }
    }
}

/// 工作流运行配置
///
/// `transactional` 与 `rollback_on_failure` 会被保存，但执行引擎不做补偿操作。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowConfiguration {
    pub parallel: bool,
    pub transactional: bool,
    pub rollback_on_failure: bool,
    pub logging: bool,
    pub monitoring: bool,
}

impl Default for WorkflowConfiguration {
    fn default() -> Self {
        Self {
            parallel: false,
            transactional: false,
            rollback_on_failure: false,
            logging: true,
            monitoring: true,
        }
    }
}

/// 执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// 单步执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// 单步执行记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub step_id: String,
    pub name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// 耗时（毫秒）
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 执行错误
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub step_id: String,
    pub error_type: String,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

/// 一次工作流执行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// 耗时（毫秒）
    pub duration: Option<u64>,
    pub status: ExecutionStatus,
    pub steps: Vec<StepExecution>,
    pub errors: Vec<ExecutionError>,
}

impl WorkflowExecution {
    pub fn start(workflow_id: &str) -> Self {
        Self {
            id: generate_id(),
            workflow_id: workflow_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            status: ExecutionStatus::Running,
            steps: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// 工作流执行统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatistics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    /// 成功执行的平均耗时（毫秒）
    pub average_execution_time: f64,
    pub execution_history: Vec<WorkflowExecution>,
}

impl WorkflowStatistics {
    /// 记录一次已结束的执行
    ///
    /// 平均值使用增量公式 `(old * (n - 1) + duration) / n`，`n` 为新的总执行次数，只在成功时更新。
    pub fn record_execution(&mut self, execution: WorkflowExecution) {
        self.total_executions += 1;
        match execution.status {
            ExecutionStatus::Completed => {
                self.successful_executions += 1;
                let n = self.total_executions as f64;
                let duration = execution.duration.unwrap_or(0) as f64;
                self.average_execution_time =
                    (self.average_execution_time * (n - 1.0) + duration) / n;
            }
            ExecutionStatus::Failed | ExecutionStatus::Running => {
                self.failed_executions += 1;
            }
        }
        self.execution_history.push(execution);
    }
}

/// 集成工作流
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationWorkflow {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub trigger: WorkflowTrigger,
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowStatus,
    pub configuration: WorkflowConfiguration,
    pub statistics: WorkflowStatistics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for IntegrationWorkflow {
    const KIND: &'static str = "IntegrationWorkflow";

    fn id(&self) -> &str {
        &self.id
    }
}

impl IntegrationWorkflow {
    /// 按 `order` 升序排列的步骤
    pub fn ordered_steps(&self) -> Vec<&WorkflowStep> {
        let mut steps: Vec<&WorkflowStep> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.order);
        steps
    }
}

/// 工作流定义请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub trigger: WorkflowTrigger,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub configuration: Option<WorkflowConfiguration>,
}

impl CreateWorkflowRequest {
    /// 校验定义：名称非空、至少一个步骤、order和id唯一、每步配置合法
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(IntegrationError::BadRequest("workflow name must not be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(IntegrationError::BadRequest(
                "workflow must define at least one step".to_string(),
            ));
        }
        self.trigger.validate()?;

        let mut orders = HashSet::new();
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !orders.insert(step.order) {
                return Err(IntegrationError::BadRequest(format!(
                    "duplicate step order {}",
                    step.order
                )));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(IntegrationError::BadRequest(format!(
                    "duplicate step id {}",
                    step.id
                )));
            }
            step.validate()?;
        }
        Ok(())
    }

    /// 构建新的工作流（初始为未激活状态）
    pub fn into_workflow(self) -> Result<IntegrationWorkflow> {
        self.validate()?;
        let now = Utc::now();
        Ok(IntegrationWorkflow {
            id: generate_id(),
            name: self.name,
            description: self.description,
            workflow_type: self.workflow_type,
            trigger: self.trigger,
            steps: self.steps,
            status: WorkflowStatus::Inactive,
            configuration: self.configuration.unwrap_or_default(),
            statistics: WorkflowStatistics::default(),
            created_at: now,
            updated_at: now,
        })
    }
}
