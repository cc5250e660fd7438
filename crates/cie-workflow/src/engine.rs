//! 工作流引擎
//!
//! 管理工作流定义的生命周期，并按 `order` 升序逐步执行。
//! 第一个失败的步骤终止本次执行，后续步骤不会被尝试。

use chrono::Utc;
use cie_core::utils::millis_between;
use cie_core::{
    CreateWorkflowRequest, ExecutionError, ExecutionStatus, IntegrationError,
    IntegrationEventType, IntegrationWorkflow, Repository, Result, StepExecution, StepStatus,
    WorkflowExecution,
};
use cie_integration::EventLogger;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::state_machine::{
    ExecutionEvent, ExecutionStateMachine, WorkflowEvent, WorkflowStateMachine,
};
use crate::steps::{ExecutionContext, StepRegistry};

/// 工作流执行事件使用的系统标识
const WORKFLOW_SYSTEM_ID: &str = "workflow";

/// 工作流引擎
pub struct WorkflowEngine {
    repository: Arc<dyn Repository<IntegrationWorkflow>>,
    steps: StepRegistry,
    events: Arc<EventLogger>,
    state_machine: WorkflowStateMachine,
    execution_state_machine: ExecutionStateMachine,
}

impl WorkflowEngine {
    pub fn new(
        repository: Arc<dyn Repository<IntegrationWorkflow>>,
        steps: StepRegistry,
        events: Arc<EventLogger>,
    ) -> Self {
        Self {
            repository,
            steps,
            events,
            state_machine: WorkflowStateMachine::new(),
            execution_state_machine: ExecutionStateMachine::new(),
        }
    }

    /// 创建工作流（未激活状态）
    pub async fn create_workflow(&self, request: CreateWorkflowRequest) -> Result<IntegrationWorkflow> {
        let workflow = self.repository.create(request.into_workflow()?).await?;
        info!(
            "Created workflow {} ({}) with {} steps",
            workflow.name,
            workflow.id,
            workflow.steps.len()
        );
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &str) -> Result<IntegrationWorkflow> {
        self.repository.require(id).await
    }

    pub async fn list_workflows(&self) -> Result<Vec<IntegrationWorkflow>> {
        let mut workflows = self
            .repository
            .list(&|_: &IntegrationWorkflow| true)
            .await?;
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<IntegrationWorkflow> {
        let workflow = self.repository.delete(id).await?;
        info!("Deleted workflow {} ({})", workflow.name, id);
        Ok(workflow)
    }

    pub async fn activate(&self, id: &str) -> Result<IntegrationWorkflow> {
        self.apply_event(id, WorkflowEvent::Activate).await
    }

    pub async fn deactivate(&self, id: &str) -> Result<IntegrationWorkflow> {
        self.apply_event(id, WorkflowEvent::Deactivate).await
    }

    async fn apply_event(&self, id: &str, event: WorkflowEvent) -> Result<IntegrationWorkflow> {
        let expected = self.repository.require(id).await?.status;
        let next = self.state_machine.transition(expected, event)?;

        let workflow = self
            .repository
            .update(
                id,
                Box::new(move |workflow: &mut IntegrationWorkflow| {
                    if workflow.status != expected {
                        return Err(IntegrationError::InvalidStateTransition {
                            from: format!("{:?}", workflow.status),
                            event: format!("{:?}", event),
                        });
                    }
                    workflow.status = next;
                    workflow.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await?;
        info!("Workflow {} status updated to {:?}", id, workflow.status);
        Ok(workflow)
    }

    /// 以空输入执行工作流
    pub async fn execute(&self, id: &str) -> Result<WorkflowExecution> {
        self.execute_with_payload(id, Value::Null).await
    }

    /// 执行工作流
    ///
    /// 普通步骤失败以 `failed` 状态的执行记录返回；
    /// 未注册处理器的步骤类型在记录执行后返回 `UnknownStepType`。
    pub async fn execute_with_payload(&self, id: &str, payload: Value) -> Result<WorkflowExecution> {
        let workflow = self.repository.require(id).await?;
        if !self.state_machine.can_execute(workflow.status) {
            return Err(IntegrationError::BadRequest(format!(
                "Workflow {} is not active",
                id
            )));
        }
        if workflow.configuration.parallel {
            debug!("Workflow {} requests parallel execution, running sequentially", id);
        }

        let mut execution = WorkflowExecution::start(&workflow.id);
        let mut context = ExecutionContext::new(&workflow.id, &execution.id, payload);
        let mut unknown_step_type = None;
        info!("Starting execution {} of workflow {}", execution.id, workflow.name);

        for step in workflow.ordered_steps() {
            let started = Utc::now();
            let result = match self.steps.get(step.step_type) {
                Some(handler) => handler.execute(step, &mut context).await,
                None => {
                    unknown_step_type = Some(step.step_type);
                    Err(IntegrationError::UnknownStepType(step.step_type.to_string()))
                }
            };
            let finished = Utc::now();

            let (status, error) = match &result {
                Ok(()) => (StepStatus::Completed, None),
                Err(e) => (StepStatus::Failed, Some(e.to_string())),
            };
            execution.steps.push(StepExecution {
                step_id: step.id.clone(),
                name: step.name.clone(),
                step_type: step.step_type,
                status,
                start_time: started,
                end_time: finished,
                duration: millis_between(&started, &finished),
                error,
            });

            if let Err(e) = result {
                warn!(
                    "Step {} ({}) of execution {} failed: {}",
                    step.id, step.step_type, execution.id, e
                );
                execution.errors.push(ExecutionError {
                    step_id: step.id.clone(),
                    error_type: e.kind().to_string(),
                    error_message: e.to_string(),
                    timestamp: finished,
                    resolved: false,
                });
                break;
            }
        }

        let event = if execution.errors.is_empty() {
            ExecutionEvent::AllStepsCompleted
        } else {
            ExecutionEvent::StepFailed
        };
        execution.status = self
            .execution_state_machine
            .transition(execution.status, event)?;
        let end_time = Utc::now();
        execution.end_time = Some(end_time);
        execution.duration = Some(millis_between(&execution.start_time, &end_time));

        if execution.status == ExecutionStatus::Failed
            && (workflow.configuration.rollback_on_failure || workflow.configuration.transactional)
        {
            warn!(
                "Workflow {} requests rollback/transactional handling, which is not enacted; completed steps are kept",
                workflow.id
            );
        }

        self.events
            .log(
                IntegrationEventType::TransformationCompleted,
                WORKFLOW_SYSTEM_ID,
                Some(&execution.id),
            )
            .await;

        let record = execution.clone();
        self.repository
            .update(
                id,
                Box::new(move |workflow: &mut IntegrationWorkflow| {
                    workflow.statistics.record_execution(record);
                    workflow.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await
            .map_err(|e| {
                error!(
                    "Statistics for execution {} of workflow {} were not recorded: {}",
                    execution.id, id, e
                );
                e
            })?;

        if let Some(step_type) = unknown_step_type {
            error!(
                "Execution {} aborted: no handler registered for step type {}",
                execution.id, step_type
            );
            return Err(IntegrationError::UnknownStepType(step_type.to_string()));
        }

        info!(
            "Execution {} of workflow {} finished with {:?} in {} ms",
            execution.id,
            workflow.name,
            execution.status,
            execution.duration.unwrap_or_default()
        );
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepHandler;
    use async_trait::async_trait;
    use cie_core::{
        AuthenticationConfig, EventStatus, InMemoryRepository, RegisterSystemRequest, StepType,
        SystemConfiguration, SystemStatus, SystemType, UpdateSystemRequest, WorkflowConfiguration,
        WorkflowStatus, WorkflowStep, WorkflowTrigger, WorkflowType,
    };
    use cie_integration::{InMemoryEventSink, SystemRegistry};
    use serde_json::json;
    use std::sync::Mutex;

    /// 记录被执行的步骤，遇到指定ID时失败
    struct RecordingHandler {
        attempted: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl StepHandler for RecordingHandler {
        async fn execute(&self, step: &WorkflowStep, _context: &mut ExecutionContext) -> Result<()> {
            self.attempted.lock().unwrap().push(step.id.clone());
            if self.fail_on.as_deref() == Some(step.id.as_str()) {
                return Err(IntegrationError::StepFailed {
                    step_id: step.id.clone(),
                    message: "downstream rejected payload".to_string(),
                });
            }
            Ok(())
        }
    }

    /// 执行期间删除所属工作流
    struct DeletingHandler {
        repository: Arc<InMemoryRepository<IntegrationWorkflow>>,
    }

    #[async_trait]
    impl StepHandler for DeletingHandler {
        async fn execute(&self, _step: &WorkflowStep, context: &mut ExecutionContext) -> Result<()> {
            self.repository.delete(&context.workflow_id).await?;
            Ok(())
        }
    }

    fn step(id: &str, step_type: StepType, order: u32, configuration: Value) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: id.to_uppercase(),
            step_type,
            order,
            configuration,
        }
    }

    fn request(steps: Vec<WorkflowStep>) -> CreateWorkflowRequest {
        CreateWorkflowRequest {
            name: "ADT to FHIR".to_string(),
            description: "Admissions feed".to_string(),
            workflow_type: WorkflowType::Inbound,
            trigger: WorkflowTrigger::Message {
                message_type: "ADT".to_string(),
            },
            steps,
            configuration: None,
        }
    }

    fn recording_engine(fail_on: Option<&str>) -> (WorkflowEngine, Arc<RecordingHandler>, Arc<InMemoryEventSink>) {
        let handler = Arc::new(RecordingHandler {
            attempted: Mutex::new(Vec::new()),
            fail_on: fail_on.map(str::to_string),
        });
        let mut steps = StepRegistry::new();
        for step_type in [StepType::Receive, StepType::Transform, StepType::Send] {
            steps.register(step_type, handler.clone());
        }
        let memory = Arc::new(InMemoryEventSink::new(50));
        let events = Arc::new(EventLogger::new("cie-test", "test").with_sink(memory.clone()));
        let engine = WorkflowEngine::new(Arc::new(InMemoryRepository::new()), steps, events);
        (engine, handler, memory)
    }

    fn abc() -> Vec<WorkflowStep> {
        vec![
            step("c", StepType::Send, 3, json!({"systemId": "sys"})),
            step("a", StepType::Receive, 1, Value::Null),
            step("b", StepType::Transform, 2, json!({"mappings": []})),
        ]
    }

    #[tokio::test]
    async fn test_sequential_abort() {
        let (engine, handler, memory) = recording_engine(Some("b"));
        let workflow = engine.create_workflow(request(abc())).await.unwrap();
        engine.activate(&workflow.id).await.unwrap();

        let execution = engine.execute(&workflow.id).await.unwrap();

        assert_eq!(*handler.attempted.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.steps.len(), 2);
        let last = execution.steps.last().unwrap();
        assert_eq!(last.step_id, "b");
        assert_eq!(last.status, StepStatus::Failed);
        assert_eq!(execution.errors.len(), 1);
        assert_eq!(execution.errors[0].step_id, "b");
        assert_eq!(execution.errors[0].error_type, "step_failed");
        assert!(!execution.errors[0].resolved);
        assert!(execution.end_time.is_some());

        let workflow = engine.get_workflow(&workflow.id).await.unwrap();
        assert_eq!(workflow.statistics.total_executions, 1);
        assert_eq!(workflow.statistics.failed_executions, 1);
        assert_eq!(workflow.statistics.average_execution_time, 0.0);

        let event = &memory.recent(1).await[0];
        assert_eq!(event.event_type, IntegrationEventType::TransformationCompleted);
        assert_eq!(event.status, EventStatus::Success);
        assert_eq!(event.message_id.as_deref(), Some(execution.id.as_str()));
    }

    #[tokio::test]
    async fn test_event_logged_when_workflow_deleted_mid_execution() {
        let repository = Arc::new(InMemoryRepository::new());
        let mut steps = StepRegistry::new();
        steps.register(
            StepType::Receive,
            Arc::new(DeletingHandler {
                repository: repository.clone(),
            }),
        );
        let memory = Arc::new(InMemoryEventSink::new(10));
        let events = Arc::new(EventLogger::new("cie-test", "test").with_sink(memory.clone()));
        let engine = WorkflowEngine::new(repository.clone(), steps, events);

        let workflow = engine
            .create_workflow(request(vec![step("a", StepType::Receive, 1, Value::Null)]))
            .await
            .unwrap();
        engine.activate(&workflow.id).await.unwrap();

        let result = engine.execute(&workflow.id).await;
        assert!(matches!(result, Err(IntegrationError::NotFound { .. })));
        assert!(repository.is_empty());

        let recorded = memory.recent(10).await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].event_type, IntegrationEventType::TransformationCompleted);
        assert_eq!(recorded[0].system_id, "workflow");
        assert!(recorded[0].message_id.is_some());
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_event_logged() {
        let (engine, handler, memory) = recording_engine(None);
        let workflow = engine.create_workflow(request(abc())).await.unwrap();
        engine.activate(&workflow.id).await.unwrap();

        let execution = engine.execute(&workflow.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(*handler.attempted.lock().unwrap(), vec!["a", "b", "c"]);

        let event = &memory.recent(1).await[0];
        assert_eq!(event.event_type, IntegrationEventType::TransformationCompleted);
        assert_eq!(event.system_id, "workflow");
        assert_eq!(event.message_id.as_deref(), Some(execution.id.as_str()));
    }

    #[tokio::test]
    async fn test_execution_requires_active_workflow() {
        let (engine, _, _) = recording_engine(None);
        let workflow = engine.create_workflow(request(abc())).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Inactive);

        assert!(matches!(
            engine.execute(&workflow.id).await,
            Err(IntegrationError::BadRequest(_))
        ));
        assert!(matches!(
            engine.execute("missing").await,
            Err(IntegrationError::NotFound { .. })
        ));

        engine.activate(&workflow.id).await.unwrap();
        assert!(matches!(
            engine.activate(&workflow.id).await,
            Err(IntegrationError::InvalidStateTransition { .. })
        ));
        engine.deactivate(&workflow.id).await.unwrap();
        assert!(engine.execute(&workflow.id).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_step_type_is_fatal() {
        let (engine, handler, memory) = recording_engine(None);
        let mut steps = abc();
        steps.push(step("d", StepType::Store, 4, json!({"key": "out"})));
        let workflow = engine.create_workflow(request(steps)).await.unwrap();
        engine.activate(&workflow.id).await.unwrap();

        let result = engine.execute(&workflow.id).await;
        assert!(matches!(result, Err(IntegrationError::UnknownStepType(t)) if t == "store"));
        assert_eq!(handler.attempted.lock().unwrap().len(), 3);

        let workflow = engine.get_workflow(&workflow.id).await.unwrap();
        assert_eq!(workflow.statistics.failed_executions, 1);
        let recorded = &workflow.statistics.execution_history[0];
        assert_eq!(recorded.status, ExecutionStatus::Failed);
        assert_eq!(recorded.errors[0].error_type, "unknown_step_type");
        let event = &memory.recent(1).await[0];
        assert_eq!(event.event_type, IntegrationEventType::TransformationCompleted);
        assert_eq!(event.status, EventStatus::Success);
    }

    #[tokio::test]
    async fn test_rollback_flags_are_accepted() {
        let (engine, _, _) = recording_engine(Some("a"));
        let mut definition = request(abc());
        definition.configuration = Some(WorkflowConfiguration {
            rollback_on_failure: true,
            transactional: true,
            ..Default::default()
        });
        let workflow = engine.create_workflow(definition).await.unwrap();
        assert!(workflow.configuration.rollback_on_failure);
        engine.activate(&workflow.id).await.unwrap();

        let execution = engine.execute(&workflow.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.steps.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_executions_keep_counters() {
        let (engine, _, _) = recording_engine(None);
        let engine = Arc::new(engine);
        let workflow = engine.create_workflow(request(abc())).await.unwrap();
        engine.activate(&workflow.id).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..200 {
            let engine = engine.clone();
            let id = workflow.id.clone();
            handles.push(tokio::spawn(async move { engine.execute(&id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let workflow = engine.get_workflow(&workflow.id).await.unwrap();
        assert_eq!(workflow.statistics.total_executions, 200);
        assert_eq!(workflow.statistics.successful_executions, 200);
        assert_eq!(workflow.statistics.execution_history.len(), 200);
    }

    #[tokio::test]
    async fn test_receive_transform_send_end_to_end() {
        let events = Arc::new(EventLogger::new("cie-test", "test"));
        let registry = Arc::new(SystemRegistry::new(
            Arc::new(InMemoryRepository::new()),
            events.clone(),
        ));
        let system = registry
            .register(RegisterSystemRequest {
                name: "FHIR Hub".to_string(),
                system_type: SystemType::Fhir,
                vendor: "HAPI".to_string(),
                version: "6".to_string(),
                configuration: SystemConfiguration {
                    endpoint: "https://fhir.local/r4".to_string(),
                    protocol: "https".to_string(),
                    port: None,
                    authentication: AuthenticationConfig::None,
                    timeout: 5000,
                    retry_attempts: 0,
                    retry_delay: 0,
                    batch_size: None,
                    headers: Default::default(),
                    mapping: Default::default(),
                    validation: Default::default(),
                },
            })
            .await
            .unwrap();
        registry
            .update(
                &system.id,
                UpdateSystemRequest {
                    status: Some(SystemStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let engine = WorkflowEngine::new(
            Arc::new(InMemoryRepository::new()),
            StepRegistry::with_defaults(registry.clone(), events.clone()),
            events,
        );
        let workflow = engine
            .create_workflow(request(vec![
                step("receive", StepType::Receive, 1, json!({"source": "HIS"})),
                step(
                    "transform",
                    StepType::Transform,
                    2,
                    json!({"mappings": [{"source": "pid.mrn", "target": "identifier.value"}]}),
                ),
                step("send", StepType::Send, 3, json!({"systemId": system.id.clone()})),
            ]))
            .await
            .unwrap();
        engine.activate(&workflow.id).await.unwrap();

        let execution = engine
            .execute_with_payload(&workflow.id, json!({"pid": {"mrn": "MRN001"}}))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.steps.len(), 3);

        let workflow = engine.get_workflow(&workflow.id).await.unwrap();
        assert_eq!(workflow.statistics.total_executions, 1);
        assert_eq!(workflow.statistics.successful_executions, 1);
        assert_eq!(workflow.statistics.execution_history.len(), 1);
        assert_eq!(
            registry.get(&system.id).await.unwrap().statistics.successful_messages,
            1
        );
    }

    #[tokio::test]
    async fn test_workflow_lifecycle() {
        let (engine, _, _) = recording_engine(None);
        let first = engine.create_workflow(request(abc())).await.unwrap();
        let second = engine.create_workflow(request(abc())).await.unwrap();
        assert_eq!(engine.list_workflows().await.unwrap().len(), 2);

        assert!(engine.create_workflow(request(Vec::new())).await.is_err());

        engine.delete_workflow(&first.id).await.unwrap();
        let remaining = engine.list_workflows().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
        assert!(engine.get_workflow(&first.id).await.is_err());
    }
}
