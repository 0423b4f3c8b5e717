// Workflow Automation Engine
//
// Event-triggered state machine moving contacts through step graphs with
// durable scheduling, at-most-once delivery, and full audit logs.

pub mod conditions;
pub mod definition;
pub mod engine;
pub mod execution;
pub mod processors;
pub mod triggers;

pub use conditions::{FieldRef, FieldScope, LogicalOperator, Predicate, PredicateOperator};
pub use definition::{
    ActionKind, ConditionConfig, FrequencyCap, Guard, MessageConfig, RetryPolicy, SplitTestConfig,
    SplitVariant, Step, StepConnection, StepKind, TriggerSpec, WaitConfig, WaitUnit,
    WorkflowDefinition, WorkflowRegistry, WorkflowSettings, WorkflowStatus,
};
pub use engine::WorkflowEngine;
pub use execution::{Execution, ExecutionLogEntry, ExecutionStatus, LogOutcome};
pub use triggers::{Decision, EventSource, RejectReason, TriggerEvent, TriggerGate, TriggerKind};
