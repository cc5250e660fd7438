//! 步骤处理器
//!
//! 每种步骤类型对应一个 [`StepHandler`]，通过 [`StepRegistry`] 注册。
//! 新的步骤类型只需注册新的处理器，执行引擎无需修改。

use async_trait::async_trait;
use cie_core::{
    IntegrationError, IntegrationEventType, NotifyConfig, ProcessingOutcome, ReceiveConfig,
    Result, RouteConfig, SendConfig, StepType, StoreConfig, SystemStatus, TransformConfig,
    ValidateConfig, WorkflowStep,
};
use cie_integration::{EventLogger, FhirValidator, SystemRegistry};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// 单次执行期间在步骤间传递的上下文
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: String,
    pub payload: Value,
    pub variables: Map<String, Value>,
    pub stored: BTreeMap<String, Value>,
    pub route: Option<String>,
    pub sent_to: Vec<String>,
}

impl ExecutionContext {
    pub fn new(workflow_id: &str, execution_id: &str, payload: Value) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            execution_id: execution_id.to_string(),
            payload,
            ..Default::default()
        }
    }
}

/// 步骤处理器接口
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()>;
}

/// 步骤类型到处理器的注册表
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置处理器
    pub fn with_defaults(registry: Arc<SystemRegistry>, events: Arc<EventLogger>) -> Self {
        let mut steps = Self::new();
        steps.register(StepType::Receive, Arc::new(ReceiveHandler));
        steps.register(StepType::Transform, Arc::new(TransformHandler));
        steps.register(
            StepType::Validate,
            Arc::new(ValidateHandler {
                validator: FhirValidator::new(),
            }),
        );
        steps.register(StepType::Route, Arc::new(RouteHandler));
        steps.register(
            StepType::Send,
            Arc::new(SendHandler {
                registry,
                events: events.clone(),
            }),
        );
        steps.register(StepType::Store, Arc::new(StoreHandler));
        steps.register(StepType::Notify, Arc::new(NotifyHandler { events }));
        steps
    }

    pub fn register(&mut self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type, handler);
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&step_type).cloned()
    }
}

fn step_failed(step: &WorkflowStep, message: impl Into<String>) -> IntegrationError {
    IntegrationError::StepFailed {
        step_id: step.id.clone(),
        message: message.into(),
    }
}

/// 按 `.` 分隔的路径读取JSON值
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// 按路径写入JSON值，沿途缺失或非对象的节点替换为对象
pub fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *value = new_value;
        return;
    };

    let mut current = value;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), new_value);
    }
}

struct ReceiveHandler;

#[async_trait]
impl StepHandler for ReceiveHandler {
    async fn execute(&self, step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()> {
        let config: ReceiveConfig = step.typed_config()?;
        if config.require_payload && context.payload.is_null() {
            return Err(step_failed(step, "no payload received"));
        }
        if let Some(source) = config.source {
            context
                .variables
                .insert("source".to_string(), Value::String(source));
        }
        debug!("Step {} received payload for execution {}", step.id, context.execution_id);
        Ok(())
    }
}

struct TransformHandler;

#[async_trait]
impl StepHandler for TransformHandler {
    async fn execute(&self, step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()> {
        let config: TransformConfig = step.typed_config()?;
        for mapping in &config.mappings {
            match get_path(&context.payload, &mapping.source).cloned() {
                Some(value) => set_path(&mut context.payload, &mapping.target, value),
                None if mapping.required => {
                    return Err(step_failed(
                        step,
                        format!("required source field {} is missing", mapping.source),
                    ))
                }
                None => debug!("Optional source field {} is missing", mapping.source),
            }
        }
        Ok(())
    }
}

struct ValidateHandler {
    validator: FhirValidator,
}

#[async_trait]
impl StepHandler for ValidateHandler {
    async fn execute(&self, step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()> {
        let config: ValidateConfig = step.typed_config()?;
        for field in &config.required_fields {
            if matches!(get_path(&context.payload, field), None | Some(Value::Null)) {
                return Err(step_failed(step, format!("required field {} is missing", field)));
            }
        }
        if let Some(resource_type) = config.resource_type {
            if let Err(issues) = self.validator.validate(resource_type, &context.payload) {
                let messages: Vec<String> = issues.into_iter().map(|i| i.message).collect();
                return Err(step_failed(step, messages.join("; ")));
            }
        }
        Ok(())
    }
}

struct RouteHandler;

#[async_trait]
impl StepHandler for RouteHandler {
    async fn execute(&self, step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()> {
        let config: RouteConfig = step.typed_config()?;
        let destination = config
            .rules
            .iter()
            .find(|rule| get_path(&context.payload, &rule.field) == Some(&rule.equals))
            .map(|rule| rule.destination.clone())
            .or(config.default_destination)
            .ok_or_else(|| step_failed(step, "no routing rule matched"))?;

        debug!("Execution {} routed to {}", context.execution_id, destination);
        context
            .variables
            .insert("destination".to_string(), Value::String(destination.clone()));
        context.route = Some(destination);
        Ok(())
    }
}

struct SendHandler {
    registry: Arc<SystemRegistry>,
    events: Arc<EventLogger>,
}

#[async_trait]
impl StepHandler for SendHandler {
    async fn execute(&self, step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()> {
        let config: SendConfig = step.typed_config()?;
        let system = self.registry.get(&config.system_id).await?;
        if system.status != SystemStatus::Active {
            return Err(step_failed(
                step,
                format!("target system {} is not active", system.name),
            ));
        }

        self.registry
            .record_outcome(&system.id, ProcessingOutcome::Completed, None)
            .await?;
        self.events
            .log(
                IntegrationEventType::MessageSent,
                &system.id,
                Some(&context.execution_id),
            )
            .await;
        info!("Execution {} dispatched payload to {}", context.execution_id, system.name);
        context.sent_to.push(system.id);
        Ok(())
    }
}

struct StoreHandler;

#[async_trait]
impl StepHandler for StoreHandler {
    async fn execute(&self, step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()> {
        let config: StoreConfig = step.typed_config()?;
        context.stored.insert(config.key, context.payload.clone());
        Ok(())
    }
}

struct NotifyHandler {
    events: Arc<EventLogger>,
}

#[async_trait]
impl StepHandler for NotifyHandler {
    async fn execute(&self, step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()> {
        let config: NotifyConfig = step.typed_config()?;
        self.events
            .log(
                IntegrationEventType::NotificationSent,
                &context.workflow_id,
                Some(&context.execution_id),
            )
            .await;
        info!(
            "Notification sent on {} to {} recipients",
            config.channel,
            config.recipients.len()
        );
        Ok(())
    }
}
