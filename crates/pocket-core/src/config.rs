//! Runtime settings
//!
//! Defaults, optionally overlaid by a TOML file, then by `POCKET_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::EnrichmentRule;
use crate::error::{AgentError, Result};
use crate::provider::{GenerationOptions, DEFAULT_MODEL};
use crate::reasoning::{LoopConfig, DEFAULT_MAX_ITERATIONS};
use crate::registry::ProviderEndpoint;
use crate::session::ConcurrencyPolicy;

pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: String,
    pub initial_model: Option<String>,
    pub max_tokens: u32,
    pub max_iterations: usize,
    pub tool_timeout_secs: u64,
    pub model_timeout_secs: u64,
    pub streaming: bool,
    pub concurrency: ConcurrencyPolicy,
    pub validate_arguments: bool,
    pub providers: Vec<ProviderEndpoint>,
    pub enrichment: Vec<EnrichmentRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            initial_model: None,
            max_tokens: 1000,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout_secs: 60,
            model_timeout_secs: 120,
            streaming: false,
            concurrency: ConcurrencyPolicy::Queue,
            validate_arguments: true,
            providers: Vec::new(),
            enrichment: Vec::new(),
        }
    }
}

impl Settings {
    /// Defaults, then `path` if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AgentError::Config(format!("invalid settings file: {}", e)))
    }

    /// Overlay `POCKET_*` variables read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(model) = get("POCKET_MODEL") {
            self.model = model;
        }
        if let Some(model) = get("POCKET_INITIAL_MODEL") {
            self.initial_model = Some(model);
        }
        if let Some(v) = get("POCKET_MAX_TOKENS") {
            self.max_tokens = parse("POCKET_MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("POCKET_MAX_ITERATIONS") {
            self.max_iterations = parse("POCKET_MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = get("POCKET_TOOL_TIMEOUT_SECS") {
            self.tool_timeout_secs = parse("POCKET_TOOL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("POCKET_MODEL_TIMEOUT_SECS") {
            self.model_timeout_secs = parse("POCKET_MODEL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("POCKET_STREAMING") {
            self.streaming = parse_bool("POCKET_STREAMING", &v)?;
        }
        if let Some(v) = get("POCKET_CONCURRENCY") {
            self.concurrency = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        if self.max_tokens == 0 {
            return Err(AgentError::Config("max_tokens must be at least 1".into()));
        }
        if self.tool_timeout_secs == 0 || self.model_timeout_secs == 0 {
            return Err(AgentError::Config("timeouts must be at least one second".into()));
        }
        Ok(())
    }

    pub fn generation(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            initial_model: self.initial_model.clone(),
            max_tokens: self.max_tokens,
            temperature: None,
        }
    }

    pub fn loop_config(&self, system_prompt: impl Into<String>) -> LoopConfig {
        LoopConfig {
            system_prompt: system_prompt.into(),
            max_iterations: self.max_iterations,
            generation: self.generation(),
            model_timeout: Duration::from_secs(self.model_timeout_secs),
            streaming: self.streaming,
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// The LLM credential; startup must fail without it
pub fn require_api_key(lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    lookup(API_KEY_VAR)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AgentError::Config(format!("{} is not set", API_KEY_VAR)))
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| AgentError::Config(format!("{} has an invalid value: {}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AgentError::Config(format!("{} has an invalid value: {}", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).into(), (*v).into())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.max_iterations, 5);
        assert_eq!(s.max_tokens, 1000);
        assert_eq!(s.concurrency, ConcurrencyPolicy::Queue);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_toml_file() {
        let raw = r#"
            model = "claude-3-5-haiku-20241022"
            max_iterations = 3
            concurrency = "reject"

            [[providers]]
            name = "wallet"
            command = "node"
            args = ["servers/wallet.js"]

            [[enrichment]]
            tool = "get-staking-info"
            argument = "wallet"
            fact = "wallet_address"
        "#;
        let s = Settings::from_toml_str(raw).unwrap();
        assert_eq!(s.max_iterations, 3);
        assert_eq!(s.concurrency, ConcurrencyPolicy::Reject);
        assert_eq!(s.providers[0].args, vec!["servers/wallet.js"]);
        assert_eq!(s.enrichment[0].tool, "get-staking-info");
        assert_eq!(s.max_tokens, 1000);
    }

    #[test]
    fn test_env_overrides() {
        let mut s = Settings::default();
        s.apply_env(env(&[
            ("POCKET_MAX_ITERATIONS", "7"),
            ("POCKET_STREAMING", "yes"),
            ("POCKET_INITIAL_MODEL", "claude-3-haiku-20240307"),
            ("POCKET_MODEL", "  "),
        ]))
        .unwrap();
        assert_eq!(s.max_iterations, 7);
        assert!(s.streaming);
        assert_eq!(s.initial_model.as_deref(), Some("claude-3-haiku-20240307"));
        assert_eq!(s.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_bad_env_value() {
        let mut s = Settings::default();
        let err = s.apply_env(env(&[("POCKET_MAX_TOKENS", "lots")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(msg) if msg.contains("POCKET_MAX_TOKENS")));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let s = Settings {
            max_iterations: 0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_api_key_required() {
        assert!(require_api_key(env(&[])).is_err());
        assert!(require_api_key(env(&[("ANTHROPIC_API_KEY", "")])).is_err());
        assert_eq!(require_api_key(env(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap(), "sk-test");
    }
}
