//! Workflow engine: data-driven multi-step agent orchestration.
//!
//! # Architecture
//!
//! ```text
//! workflow.yaml ──► WorkflowDefinition ──► plan::compile ──► ExecutionPlan
//!                                                               │
//!                                    WorkflowEngine ◄───────────┘
//!                                          │  (one task per run)
//!                  ExecutionContext ◄──────┤
//!                                          ▼
//!                                   StepDispatcher ──► LifecycleManager ──► agent process
//! ```

pub mod context;
pub mod dispatcher;
pub mod executor;
pub mod plan;
pub mod schema;
pub mod template;

pub use context::ExecutionContext;
pub use dispatcher::StepDispatcher;
pub use executor::WorkflowEngine;
pub use plan::ExecutionPlan;
pub use schema::{Condition, ExecutionMode, StepDefinition, WorkflowDefinition};
