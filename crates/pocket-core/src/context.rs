//! Session Context
//!
//! Facts derived from raw user text (for example a wallet address) that
//! pre-fill tool arguments the model left out and are surfaced to the
//! model through the system prompt.
//!
//! Detection rules are pluggable through [`ContextDetector`]; which tool
//! arguments a fact may fill is configuration, held in an
//! [`EnrichmentTable`]. Both are bundled in a shared [`ContextProfile`]
//! from which every session gets its own [`ContextStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// A named detection rule over raw user text
pub trait ContextDetector: Send + Sync {
    /// Name of the fact this detector produces
    fn fact(&self) -> &str;

    /// First matching value in the text, if any
    fn detect(&self, text: &str) -> Option<String>;

    /// Line appended to the system prompt for a remembered value
    fn describe(&self, value: &str) -> String {
        format!("Known {}: {}", self.fact(), value)
    }
}

/// Regex-based detector with an optional validation step
pub struct PatternDetector {
    fact: String,
    pattern: Regex,
    validator: Option<fn(&str) -> bool>,
    label: Option<String>,
}

impl PatternDetector {
    pub fn new(fact: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| AgentError::Config(format!("invalid detection pattern: {}", e)))?;
        Ok(Self {
            fact: fact.into(),
            pattern,
            validator: None,
            label: None,
        })
    }

    /// Candidates must also pass this check
    pub fn with_validator(mut self, validator: fn(&str) -> bool) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Human label used in the prompt line
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl ContextDetector for PatternDetector {
    fn fact(&self) -> &str {
        &self.fact
    }

    fn detect(&self, text: &str) -> Option<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str())
            .find(|candidate| self.validator.is_none_or(|valid| valid(candidate)))
            .map(str::to_string)
    }

    fn describe(&self, value: &str) -> String {
        format!("Known {}: {}", self.label.as_deref().unwrap_or(&self.fact), value)
    }
}

/// "Fill `argument` of `tool` from `fact`"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRule {
    pub tool: String,
    pub argument: String,
    pub fact: String,
}

impl EnrichmentRule {
    pub fn new(tool: impl Into<String>, argument: impl Into<String>, fact: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            argument: argument.into(),
            fact: fact.into(),
        }
    }
}

/// Explicit table of enrichable tool arguments
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrichmentTable {
    rules: Vec<EnrichmentRule>,
}

impl EnrichmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: EnrichmentRule) -> Self {
        self.push(rule);
        self
    }

    /// Add a rule; an identical rule is not added twice
    pub fn push(&mut self, rule: EnrichmentRule) {
        if !self.rules.contains(&rule) {
            self.rules.push(rule);
        }
    }

    pub fn extend(&mut self, rules: impl IntoIterator<Item = EnrichmentRule>) {
        for rule in rules {
            self.push(rule);
        }
    }

    pub fn rules_for<'a>(&'a self, tool: &'a str) -> impl Iterator<Item = &'a EnrichmentRule> {
        self.rules.iter().filter(move |r| r.tool == tool)
    }

    pub fn rules(&self) -> &[EnrichmentRule] {
        &self.rules
    }
}

/// Detectors plus enrichment table, shared by all sessions
#[derive(Default)]
pub struct ContextProfile {
    detectors: Vec<Arc<dyn ContextDetector>>,
    enrichment: EnrichmentTable,
}

impl ContextProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(mut self, detector: impl ContextDetector + 'static) -> Self {
        self.detectors.push(Arc::new(detector));
        self
    }

    pub fn with_rule(mut self, rule: EnrichmentRule) -> Self {
        self.enrichment.push(rule);
        self
    }

    pub fn with_enrichment(mut self, rules: impl IntoIterator<Item = EnrichmentRule>) -> Self {
        self.enrichment.extend(rules);
        self
    }

    pub fn enrichment(&self) -> &EnrichmentTable {
        &self.enrichment
    }

    fn detector(&self, fact: &str) -> Option<&Arc<dyn ContextDetector>> {
        self.detectors.iter().find(|d| d.fact() == fact)
    }
}

/// A fact found in user text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedFact {
    pub fact: String,
    pub value: String,
}

/// Per-session store of remembered facts
#[derive(Clone)]
pub struct ContextStore {
    profile: Arc<ContextProfile>,
    facts: BTreeMap<String, String>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(Arc::new(ContextProfile::default()))
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore").field("facts", &self.facts).finish()
    }
}

impl ContextStore {
    pub fn new(profile: Arc<ContextProfile>) -> Self {
        Self {
            profile,
            facts: BTreeMap::new(),
        }
    }

    /// Run every detector over the text. Pure.
    pub fn observe(&self, text: &str) -> Vec<DetectedFact> {
        self.profile
            .detectors
            .iter()
            .filter_map(|d| {
                d.detect(text).map(|value| DetectedFact {
                    fact: d.fact().to_string(),
                    value,
                })
            })
            .collect()
    }

    /// Store or overwrite a fact
    pub fn remember(&mut self, fact: impl Into<String>, value: impl Into<String>) {
        self.facts.insert(fact.into(), value.into());
    }

    /// Clear one fact
    pub fn forget(&mut self, fact: &str) -> Option<String> {
        self.facts.remove(fact)
    }

    pub fn get(&self, fact: &str) -> Option<&str> {
        self.facts.get(fact).map(String::as_str)
    }

    pub fn facts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.facts.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Observe and remember in one step
    pub fn absorb(&mut self, text: &str) -> Vec<DetectedFact> {
        let found = self.observe(text);
        for fact in &found {
            tracing::debug!(fact = %fact.fact, "Remembered context fact from user text");
            self.remember(fact.fact.clone(), fact.value.clone());
        }
        found
    }

    /// Fill listed arguments that are missing or empty. Present values are never replaced.
    pub fn apply(&self, tool: &str, mut arguments: Map<String, Value>) -> Map<String, Value> {
        for rule in self.profile.enrichment.rules_for(tool) {
            let Some(value) = self.facts.get(&rule.fact) else {
                continue;
            };
            if arguments.get(&rule.argument).is_some_and(|v| !is_empty_value(v)) {
                continue;
            }
            tracing::debug!(tool, argument = %rule.argument, fact = %rule.fact, "Filled argument from session context");
            arguments.insert(rule.argument.clone(), Value::String(value.clone()));
        }
        arguments
    }

    /// System prompt lines for remembered facts
    pub fn prompt_section(&self) -> Option<String> {
        if self.facts.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .facts
            .iter()
            .map(|(fact, value)| match self.profile.detector(fact) {
                Some(detector) => detector.describe(value),
                None => format!("Known {}: {}", fact, value),
            })
            .collect();
        Some(format!("### SESSION CONTEXT:\n- {}", lines.join("\n- ")))
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
