//! Agent descriptors: how to start an agent and what it needs.
//!
//! ```yaml
//! name: "web-researcher"
//! description: "Searches the web and summarises findings"
//! entrypoint:
//!   command: "python3"
//!   args: ["agents/web_researcher/main.py"]
//!   env:
//!     PYTHONUNBUFFERED: "1"
//! required_credentials: ["SERPAPI_KEY"]
//! capability_tags: ["research", "web"]
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Static description of one agent. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique catalog key
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(alias = "entry_point")]
    pub entrypoint: Entrypoint,

    /// Environment variables that must be set before the agent can start
    #[serde(default, alias = "api_keys")]
    pub required_credentials: Vec<String>,

    #[serde(default, alias = "capabilities")]
    pub capability_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entrypoint {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; relative paths are resolved against the catalog file.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment passed to the child on top of the orchestrator's own.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl AgentDescriptor {
    /// Required credentials absent (or empty) in the current environment.
    pub fn missing_credentials(&self) -> Vec<String> {
        self.required_credentials
            .iter()
            .filter(|key| {
                let from_entrypoint = self
                    .entrypoint
                    .env
                    .get(key.as_str())
                    .is_some_and(|v| !v.is_empty());
                let from_process = std::env::var_os(key.as_str()).is_some_and(|v| !v.is_empty());
                !from_entrypoint && !from_process
            })
            .cloned()
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.capability_tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(creds: &[&str]) -> AgentDescriptor {
        AgentDescriptor {
            name: "a".into(),
            description: None,
            entrypoint: Entrypoint {
                command: "true".into(),
                args: vec![],
                cwd: None,
                env: HashMap::from([("INLINE_KEY".to_string(), "set".to_string())]),
            },
            required_credentials: creds.iter().map(|s| s.to_string()).collect(),
            capability_tags: vec!["research".into()],
        }
    }

    #[test]
    fn test_missing_credentials() {
        let d = descriptor(&["MAESTRO_TEST_SURELY_UNSET_KEY", "INLINE_KEY"]);
        assert_eq!(d.missing_credentials(), vec!["MAESTRO_TEST_SURELY_UNSET_KEY".to_string()]);
        assert!(d.has_tag("research"));
    }

    #[test]
    fn test_parse_descriptor_aliases() {
        let yaml = r#"
name: "reddit"
entry_point:
  command: "python3"
  args: ["main.py"]
api_keys: ["REDDIT_TOKEN"]
capabilities: ["social"]
"#;
        let d: AgentDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(d.entrypoint.command, "python3");
        assert_eq!(d.required_credentials, vec!["REDDIT_TOKEN".to_string()]);
        assert!(d.has_tag("social"));
    }
}
