//! Workflow automation engine for the Cadence marketing platform.
//!
//! The engine is a durable, event-triggered state machine: trigger events
//! admit contacts into workflow definitions, executions advance step by step
//! under a periodic scheduler, and every transition is recorded in an
//! append-only log. All collaborators (template rendering, delivery, the
//! contact system of record, webhooks, persistence) are injected.

pub mod analytics;
pub mod collaborators;
pub mod config;
pub mod database;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod workflows;

pub use analytics::{AnalyticsAggregator, MessageStats, StepStats, WorkflowStats};
pub use collaborators::{
    ContactError, ContactStore, DeliveryError, DeliveryProvider, HttpWebhookCaller,
    MutationOutcome, RenderError, TemplateRenderer, WebhookCaller, WebhookError,
};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, StepError, StoreError, ValidationError};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::{
    AdvanceOutcome, AdvanceRequest, ExecutionStore, FrequencyCapStore, MemoryExecutionStore,
    MemoryFrequencyCapStore, PgExecutionStore, PgFrequencyCapStore,
};
pub use workflows::{
    Execution, ExecutionLogEntry, ExecutionStatus, LogOutcome, TriggerEvent, TriggerGate,
    TriggerKind, WorkflowDefinition, WorkflowEngine, WorkflowRegistry, WorkflowStatus,
};

#[cfg(test)]
mod tests;
