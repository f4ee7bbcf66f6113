//! Shared application state: the explicitly constructed object that wires the
//! catalog, the Lifecycle Manager and the workflow engine together.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::agent::{AgentLauncher, ProcessLauncher};
use crate::catalog::{AgentDescriptor, CatalogFile, DescriptorStore};
use crate::config::MaestroConfig;
use crate::error::{CatalogError, LifecycleError, OrchestratorError};
use crate::lifecycle::LifecycleManager;
use crate::models::{AgentProcessState, ExecutionRecord};
use crate::workflow::WorkflowEngine;

pub struct AppStateInner {
    pub catalog: Arc<DescriptorStore>,
    pub lifecycle: Arc<LifecycleManager>,
    pub engine: WorkflowEngine,
    pub config: MaestroConfig,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// State backed by real agent processes.
    pub fn new(catalog: DescriptorStore, config: MaestroConfig) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(&config.lifecycle));
        Self::with_launcher(catalog, config, launcher)
    }

    pub fn with_launcher(
        catalog: DescriptorStore,
        config: MaestroConfig,
        launcher: Arc<dyn AgentLauncher>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let lifecycle = Arc::new(LifecycleManager::new(
            catalog.clone(),
            launcher,
            config.lifecycle.clone(),
        ));
        let engine = WorkflowEngine::new(catalog.clone(), lifecycle.clone(), config.engine.clone());
        Self {
            catalog,
            lifecycle,
            engine,
            config,
        }
    }

    /// Load a catalog file and/or a directory of workflow files.
    pub fn load(
        catalog_path: Option<&Path>,
        workflows_dir: Option<&Path>,
    ) -> Result<Self, CatalogError> {
        let file = match catalog_path {
            Some(path) => CatalogFile::from_file(path)?,
            None => CatalogFile::default(),
        };
        let (mut catalog, config) = DescriptorStore::from_catalog(file)?;
        if let Some(dir) = workflows_dir {
            catalog.load_workflow_dir(dir)?;
        }
        tracing::info!(
            "[AppState] Catalog loaded: {} agents, {} workflows",
            catalog.list_agents().len(),
            catalog.list_workflows().len()
        );
        Ok(Self::new(catalog, config))
    }

    pub fn list_agents(&self) -> Vec<Arc<AgentDescriptor>> {
        self.catalog.list_agents()
    }

    pub async fn agent_status(
        &self,
        agent_name: &str,
    ) -> Result<AgentProcessState, LifecycleError> {
        self.lifecycle.status(agent_name).await
    }

    pub async fn start_agent(&self, agent_name: &str) -> Result<AgentProcessState, LifecycleError> {
        self.lifecycle.start(agent_name).await
    }

    pub async fn stop_agent(&self, agent_name: &str) -> Result<(), LifecycleError> {
        self.lifecycle.stop(agent_name).await
    }

    pub async fn execute(
        &self,
        workflow_name: &str,
        input: Value,
    ) -> Result<String, OrchestratorError> {
        self.engine.execute(workflow_name, input).await
    }

    pub async fn get_status(&self, run_id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        self.engine.get_status(run_id).await
    }

    /// Stop every agent this process started.
    pub async fn shutdown(&self) {
        let stopped = self.lifecycle.stop_all().await;
        if !stopped.is_empty() {
            tracing::info!("[AppState] Stopped agents: {}", stopped.join(", "));
        }
    }
}
