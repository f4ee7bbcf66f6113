//! Agent Descriptor Store.
//!
//! A read-only catalog of agent descriptors and workflow definitions. It is
//! built once at startup, from a catalog file and/or a directory of workflow
//! YAML files, and then shared behind an `Arc`.
//!
//! ```yaml
//! settings:
//!   engine:
//!     default_timeout_secs: 120
//! agents:
//!   - name: echo
//!     entrypoint: { command: maestro-echo-agent }
//! workflows:
//!   - name: hello
//!     steps:
//!       - { step_id: greet, agent_name: echo, action: echo, inputs: { text: "${input}" } }
//! ```

pub mod descriptor;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::MaestroConfig;
use crate::error::CatalogError;
use crate::workflow::schema::WorkflowDefinition;

pub use descriptor::{AgentDescriptor, Entrypoint};

/// On-disk catalog file layout.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub settings: MaestroConfig,
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

impl CatalogFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut file = Self::from_yaml(&content).map_err(|source| CatalogError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        if let Some(base) = path.parent() {
            for agent in &mut file.agents {
                if let Some(cwd) = agent.entrypoint.cwd.as_mut() {
                    if cwd.is_relative() {
                        *cwd = base.join(&*cwd);
                    }
                }
            }
        }
        Ok(file)
    }
}

#[derive(Debug, Default)]
pub struct DescriptorStore {
    agents: HashMap<String, Arc<AgentDescriptor>>,
    workflows: HashMap<String, Arc<WorkflowDefinition>>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a parsed catalog file, returning its settings alongside.
    pub fn from_catalog(file: CatalogFile) -> Result<(Self, MaestroConfig), CatalogError> {
        let mut store = Self::new();
        for agent in file.agents {
            store.register_agent(agent)?;
        }
        for workflow in file.workflows {
            store.register_workflow(workflow)?;
        }
        Ok((store, file.settings))
    }

    pub fn register_agent(&mut self, descriptor: AgentDescriptor) -> Result<(), CatalogError> {
        if self.agents.contains_key(&descriptor.name) {
            return Err(CatalogError::Duplicate {
                kind: "agent",
                name: descriptor.name,
            });
        }
        self.agents
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn register_workflow(&mut self, workflow: WorkflowDefinition) -> Result<(), CatalogError> {
        if self.workflows.contains_key(&workflow.name) {
            return Err(CatalogError::Duplicate {
                kind: "workflow",
                name: workflow.name,
            });
        }
        self.workflows
            .insert(workflow.name.clone(), Arc::new(workflow));
        Ok(())
    }

    /// Load every `.yaml` / `.yml` workflow file in `dir`.
    pub fn load_workflow_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, CatalogError> {
        let dir = dir.as_ref();
        let io_err = |source| CatalogError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if matches!(ext, "yaml" | "yml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut count = 0;
        for path in paths {
            let workflow = WorkflowDefinition::from_file(&path)?;
            tracing::info!(
                "[DescriptorStore] Loaded workflow: {} ({} steps)",
                workflow.name,
                workflow.steps.len()
            );
            self.register_workflow(workflow)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn get_descriptor(&self, agent_name: &str) -> Option<Arc<AgentDescriptor>> {
        self.agents.get(agent_name).cloned()
    }

    pub fn get_workflow(&self, workflow_name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(workflow_name).cloned()
    }

    /// All agents, sorted by name.
    pub fn list_agents(&self) -> Vec<Arc<AgentDescriptor>> {
        let mut agents: Vec<_> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    /// All workflows, sorted by name.
    pub fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut workflows: Vec<_> = self.workflows.values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }

    /// Agents carrying `tag` in their capability tags.
    pub fn find_by_tag(&self, tag: &str) -> Vec<Arc<AgentDescriptor>> {
        self.list_agents()
            .into_iter()
            .filter(|a| a.has_tag(tag))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
settings:
  engine:
    default_timeout_secs: 60
agents:
  - name: writer
    entrypoint: { command: "python3", args: ["writer.py"], cwd: "agents/writer" }
    capability_tags: [content]
  - name: analyst
    entrypoint: { command: "python3" }
workflows:
  - name: pipeline
    steps:
      - { step_id: a, agent_name: analyst }
"#;

    #[test]
    fn test_from_catalog() {
        let file = CatalogFile::from_yaml(CATALOG).unwrap();
        let (store, settings) = DescriptorStore::from_catalog(file).unwrap();
        assert_eq!(settings.engine.default_timeout_secs, 60);
        let names: Vec<_> = store.list_agents().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["analyst", "writer"]);
        assert!(store.get_workflow("pipeline").is_some());
        assert_eq!(store.find_by_tag("content").len(), 1);
    }

    #[test]
    fn test_relative_cwd_is_resolved_against_catalog_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, CATALOG).unwrap();
        let file = CatalogFile::from_file(&path).unwrap();
        let writer = file.agents.iter().find(|a| a.name == "writer").unwrap();
        assert_eq!(
            writer.entrypoint.cwd.as_deref(),
            Some(dir.path().join("agents/writer").as_path())
        );
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let mut store = DescriptorStore::new();
        let file = CatalogFile::from_yaml(CATALOG).unwrap();
        let agent = file.agents[0].clone();
        store.register_agent(agent.clone()).unwrap();
        assert!(matches!(
            store.register_agent(agent),
            Err(CatalogError::Duplicate { kind: "agent", .. })
        ));
    }

    #[test]
    fn test_load_workflow_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("one.yaml"),
            "name: one\nsteps:\n  - { step_id: s, agent_name: x }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let mut store = DescriptorStore::new();
        assert_eq!(store.load_workflow_dir(dir.path()).unwrap(), 1);
        assert!(store.get_workflow("one").is_some());
        assert!(store.load_workflow_dir(dir.path().join("missing")).is_err());
    }
}
