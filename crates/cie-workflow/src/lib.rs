//! # 集成工作流模块
//!
//! 提供多步骤集成工作流的管理与执行，包括：
//! - 工作流状态机：管理工作流激活/停用以及单次执行的生命周期
//! - 步骤处理器注册表：按步骤类型分派处理逻辑，内置七种步骤
//! - 工作流引擎：顺序执行步骤并原子地维护执行统计

pub mod engine;
pub mod state_machine;
pub mod steps;

// 重新导出主要类型
pub use engine::WorkflowEngine;
pub use state_machine::{ExecutionEvent, ExecutionStateMachine, WorkflowEvent, WorkflowStateMachine};
pub use steps::{ExecutionContext, StepHandler, StepRegistry};
