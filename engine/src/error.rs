//! Error taxonomy for the workflow engine.
//!
//! Validation problems are rejected when a definition is published and never
//! reach execution; step failures are terminal for a single execution and
//! never propagate to others.

use thiserror::Error;
use uuid::Uuid;

use crate::workflows::definition::WorkflowStatus;

/// A malformed workflow definition, caught at publish time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("workflow has no steps")]
    EmptyWorkflow,
    #[error("duplicate step id: {0}")]
    DuplicateStepId(Uuid),
    #[error("step {step_id} connects to unknown step {target}")]
    DanglingConnection { step_id: Uuid, target: Uuid },
    #[error("workflow has no entry step (every step has an incoming connection)")]
    NoEntryStep,
    #[error("workflow has {0} entry steps, expected exactly one")]
    MultipleEntrySteps(usize),
    #[error("split test step {0} has no variants")]
    EmptySplitTest(Uuid),
    #[error("split test step {step_id} variant percentages sum to {sum}, expected 100")]
    SplitPercentagesInvalid { step_id: Uuid, sum: u32 },
}

/// Terminal failure while processing a single step.
///
/// Transient collaborator failures are retried inside the processors; by the
/// time a `StepError` surfaces, retries are exhausted and the execution is
/// marked failed with this reason in its log.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("template {0} not found")]
    TemplateNotFound(Uuid),
    #[error("template render failed: {0}")]
    Render(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("delivery timed out after {0}s")]
    DeliveryTimeout(u64),
    #[error("no outgoing connection labeled '{label}' on step {step_id}")]
    MissingBranch { step_id: Uuid, label: String },
    #[error("contact store error: {0}")]
    Contact(String),
    #[error("contact mutation conflicted after {0} attempts")]
    MutationConflict(u32),
    #[error("webhook call failed: {0}")]
    Webhook(String),
    #[error("execution context is malformed: {0}")]
    Context(String),
}

/// Failure inside an execution store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("execution {0} not found")]
    NotFound(Uuid),
    #[error("execution {0} is not in a state that allows this transition")]
    InvalidTransition(Uuid),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Top-level engine API error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid workflow definition: {0}")]
    Validation(#[from] ValidationError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("workflow {id} has no version {version}")]
    VersionNotFound { id: Uuid, version: i32 },
    #[error("contact store error: {0}")]
    Contact(String),
    #[error("cannot move workflow from {from:?} to {to:?}")]
    InvalidStatusChange {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
}

pub type ValidationResult<T> = Result<T, ValidationError>;
pub type StepResult<T> = Result<T, StepError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type EngineResult<T> = Result<T, EngineError>;
