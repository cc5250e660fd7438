//! 工作流状态机
//!
//! 工作流本身：`inactive --activate--> active --deactivate--> inactive`；
//! 单次执行：`running --> completed | failed`。

use cie_core::{ExecutionStatus, IntegrationError, Result, WorkflowStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 工作流状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    Activate,
    Deactivate,
}

/// 工作流状态机
#[derive(Debug)]
pub struct WorkflowStateMachine {
    transitions: HashMap<(WorkflowStatus, WorkflowEvent), WorkflowStatus>,
}

impl WorkflowStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();
        transitions.insert((WorkflowStatus::Inactive, WorkflowEvent::Activate), WorkflowStatus::Active);
        transitions.insert((WorkflowStatus::Active, WorkflowEvent::Deactivate), WorkflowStatus::Inactive);
        Self { transitions }
    }

    pub fn can_transition(&self, from: WorkflowStatus, event: WorkflowEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    pub fn transition(&self, from: WorkflowStatus, event: WorkflowEvent) -> Result<WorkflowStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| IntegrationError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    /// 只有激活状态允许执行
    pub fn can_execute(&self, status: WorkflowStatus) -> bool {
        status == WorkflowStatus::Active
    }
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 执行状态转换事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionEvent {
    AllStepsCompleted,
    StepFailed,
}

/// 单次执行状态机
#[derive(Debug)]
pub struct ExecutionStateMachine {
    transitions: HashMap<(ExecutionStatus, ExecutionEvent), ExecutionStatus>,
}

impl ExecutionStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();
        transitions.insert(
            (ExecutionStatus::Running, ExecutionEvent::AllStepsCompleted),
            ExecutionStatus::Completed,
        );
        transitions.insert(
            (ExecutionStatus::Running, ExecutionEvent::StepFailed),
            ExecutionStatus::Failed,
        );
        Self { transitions }
    }

    pub fn transition(&self, from: ExecutionStatus, event: ExecutionEvent) -> Result<ExecutionStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| IntegrationError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }
}

impl Default for ExecutionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
