//! Maestro Core: workflow orchestration over a catalog of external agent processes.
//!
//! The crate is transport-agnostic. Callers (the `maestro` CLI, or any service
//! wrapping it) construct an [`AppStateInner`] from a catalog and talk to it
//! with plain data in and out:
//!
//! - [`catalog`]: agent descriptors and workflow definitions
//! - [`lifecycle`]: start / stop / monitor agent processes
//! - [`workflow`]: plan, dispatch and record workflow runs
//! - [`store`]: the in-memory execution registry

pub mod agent;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod state;
pub mod store;
pub mod workflow;

pub use config::MaestroConfig;
pub use error::{CatalogError, LifecycleError, OrchestratorError, StepError};
pub use state::{AppState, AppStateInner};
