use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::ToleranceConfig;

/// A config value as it appears in a TOML workflow definition: a scalar, a
/// list, or a nested table. Kept loosely typed because each worker's
/// `validate` interprets its own schema (§4.5, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<StepConfigValue>),
    Table(HashMap<String, StepConfigValue>),
}

impl StepConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StepConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StepConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StepConfigValue]> {
        match self {
            StepConfigValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Per-step error policy (§4.8 Error policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorPolicy {
    #[default]
    Fail,
    Continue,
    Retry,
}

fn default_on_error() -> StepErrorPolicy {
    StepErrorPolicy::Fail
}

/// One entry in a workflow definition's ordered step list (§3 Step).
///
/// `type` and the deprecated `action` alias both deserialize into
/// `step_type`; when a TOML document somehow supplies both keys (not
/// representable in a single TOML table, but reachable when definitions
/// are assembled programmatically) `type` wins, per the spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,

    #[serde(rename = "type", alias = "action")]
    pub step_type: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub config: HashMap<String, StepConfigValue>,

    #[serde(default = "default_on_error")]
    pub on_error: StepErrorPolicy,

    /// Comma-separated predecessor step names; empty means "the previous
    /// step in declaration order" (resolved by [`crate::model::topo_sort`]).
    #[serde(default)]
    pub depends: Option<String>,

    /// Max attempts for `on_error = retry`; defaults applied by the
    /// orchestrator when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Step {
    /// Parsed `depends` list, trimmed and with empties dropped.
    pub fn depends_on(&self) -> Vec<String> {
        self.depends
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Top-level workflow definition (§3, §6). Read-only to the core; owned
/// externally by whatever stores and edits workflow definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub workflow_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default, with = "option_duration_secs")]
    pub timeout: Option<Duration>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub config: HashMap<String, StepConfigValue>,
    #[serde(default)]
    pub variables: HashMap<String, String>,

    #[serde(rename = "step", default)]
    pub steps: HashMap<String, Step>,

    #[serde(default)]
    pub error_tolerance: ToleranceConfig,
}

fn default_enabled() -> bool {
    true
}

impl WorkflowDefinition {
    /// Steps in their TOML table's declaration order is not recoverable
    /// from a `HashMap`; instead steps are ordered by [`crate::model::topo_sort`]
    /// using `depends`, falling back to name for ties.
    pub fn steps_by_name(&self) -> &HashMap<String, Step> {
        &self.steps
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_secs().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_alias_resolves_to_type() {
        let toml = r#"
            name = "legacy"
            type = "crawler"
        "#;
        let step: Step = toml::from_str(toml).unwrap();
        assert_eq!(step.step_type, "crawler");
    }

    #[test]
    fn depends_on_splits_and_trims() {
        let step = Step {
            name: "b".into(),
            step_type: "transform".into(),
            description: None,
            config: HashMap::new(),
            on_error: StepErrorPolicy::Fail,
            depends: Some(" a , c".into()),
            max_attempts: None,
        };
        assert_eq!(step.depends_on(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn parses_full_workflow_document() {
        let doc = r#"
            id = "wf-1"
            name = "example"

            [step.fetch]
            type = "crawler"
            on_error = "retry"

            [step.index]
            type = "reindex"
            depends = "fetch"

            [error_tolerance]
            max_child_failures = 3
            failure_action = "stop_all"
        "#;
        let def: WorkflowDefinition = toml::from_str(doc).unwrap();
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.error_tolerance.max_child_failures, 3);
    }
}
