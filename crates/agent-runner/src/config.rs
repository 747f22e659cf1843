//! Runner Configuration

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Runtime knobs shared by both runners
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Remove a task from the registry once its response is finalized
    #[serde(default)]
    pub delete_task_on_finish: bool,

    /// Upper bound on steps executed by one `chat` call (`None` = unbounded)
    #[serde(default)]
    pub max_steps: Option<usize>,

    /// Token budget for the default chat memory window
    #[serde(default = "default_memory_token_limit")]
    pub memory_token_limit: u32,
}

fn default_memory_token_limit() -> u32 {
    8192
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            delete_task_on_finish: false,
            max_steps: None,
            memory_token_limit: default_memory_token_limit(),
        }
    }
}

impl RunnerConfig {
    /// Load from `AGENT_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load from any `AGENT_*` key lookup; blank values count as unset
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = var("AGENT_DELETE_TASK_ON_FINISH") {
            config.delete_task_on_finish = parse_bool("AGENT_DELETE_TASK_ON_FINISH", &value)?;
        }
        if let Some(value) = var("AGENT_MAX_STEPS") {
            let steps = value.parse().map_err(|_| {
                AgentError::Config(format!("AGENT_MAX_STEPS must be a number, got '{}'", value))
            })?;
            config.max_steps = Some(steps);
        }
        if let Some(value) = var("AGENT_MEMORY_TOKEN_LIMIT") {
            config.memory_token_limit = value.parse().map_err(|_| {
                AgentError::Config(format!(
                    "AGENT_MEMORY_TOKEN_LIMIT must be a number, got '{}'",
                    value
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no runner can work with
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == Some(0) {
            return Err(AgentError::Config("max_steps must be at least 1".into()));
        }
        if self.memory_token_limit == 0 {
            return Err(AgentError::Config("memory_token_limit must be positive".into()));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AgentError::Config(format!("{} must be a boolean, got '{}'", key, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert!(!config.delete_task_on_finish);
        assert_eq!(config.max_steps, None);
        assert_eq!(config.memory_token_limit, 8192);
    }

    #[test]
    fn test_from_json_partial() {
        let config = RunnerConfig::from_json(r#"{"max_steps": 25}"#).unwrap();
        assert_eq!(config.max_steps, Some(25));
        assert_eq!(config.memory_token_limit, 8192);
    }

    #[test]
    fn test_from_json_rejects_zero_steps() {
        let err = RunnerConfig::from_json(r#"{"max_steps": 0}"#).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("KEY", "Yes").unwrap());
        assert!(!parse_bool("KEY", "0").unwrap());
        assert!(parse_bool("KEY", "maybe").is_err());
    }

    #[test]
    fn test_from_vars() {
        let config = RunnerConfig::from_vars(vars(&[
            ("AGENT_DELETE_TASK_ON_FINISH", "true"),
            ("AGENT_MAX_STEPS", "12"),
            ("AGENT_MEMORY_TOKEN_LIMIT", " "),
        ]))
        .unwrap();

        assert!(config.delete_task_on_finish);
        assert_eq!(config.max_steps, Some(12));
        assert_eq!(config.memory_token_limit, 8192);

        assert_eq!(RunnerConfig::from_vars(vars(&[])).unwrap(), RunnerConfig::default());
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        let err = RunnerConfig::from_vars(vars(&[("AGENT_MAX_STEPS", "many")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(ref msg) if msg.contains("AGENT_MAX_STEPS")));

        let err = RunnerConfig::from_vars(vars(&[("AGENT_MAX_STEPS", "0")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        let from_env = RunnerConfig::from_env();
        let expected = RunnerConfig::from_vars(|key| std::env::var(key).ok());
        assert_eq!(from_env.ok(), expected.ok());
    }
}
