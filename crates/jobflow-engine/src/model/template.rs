//! Placeholder substitution for Step config values (§4.8 step 3, §6).
//!
//! `{name}` in a string config value is substituted from a key/value
//! credentials store at orchestrator startup. Unresolved placeholders in
//! required fields abort the workflow before any step runs (the
//! "placeholder safety" invariant in §8).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::workflow::StepConfigValue;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_.\-]+)\}").expect("valid placeholder regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unresolved placeholder `{{{0}}}`")]
    Unresolved(String),
}

/// Substitute every `{name}` occurrence in a string using `vars`.
///
/// A string consisting of exactly one placeholder (`"{api_key}"`) resolves
/// to the looked-up value with its native type preserved when the
/// credential store records one (callers pass credentials already decoded
/// to `StepConfigValue`); partial matches (`"prefix-{id}"`) always resolve
/// to a string.
fn resolve_string(
    input: &str,
    vars: &HashMap<String, StepConfigValue>,
) -> Result<StepConfigValue, TemplateError> {
    if let Some(caps) = PLACEHOLDER.captures(input) {
        if caps.get(0).unwrap().as_str() == input {
            let key = &caps[1];
            return vars
                .get(key)
                .cloned()
                .ok_or_else(|| TemplateError::Unresolved(key.to_string()));
        }
    }

    let mut missing = None;
    let resolved = PLACEHOLDER.replace_all(input, |caps: &regex::Captures| {
        let key = &caps[1];
        match vars.get(key).and_then(|v| v.as_str().map(str::to_string)) {
            Some(value) => value,
            None => {
                if missing.is_none() {
                    missing = Some(key.to_string());
                }
                String::new()
            }
        }
    });

    if let Some(key) = missing {
        return Err(TemplateError::Unresolved(key));
    }

    Ok(StepConfigValue::String(resolved.into_owned()))
}

fn resolve_value(
    value: &StepConfigValue,
    vars: &HashMap<String, StepConfigValue>,
) -> Result<StepConfigValue, TemplateError> {
    match value {
        StepConfigValue::String(s) => resolve_string(s, vars),
        StepConfigValue::List(items) => {
            let resolved = items
                .iter()
                .map(|item| resolve_value(item, vars))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StepConfigValue::List(resolved))
        }
        StepConfigValue::Table(map) => {
            let mut resolved = HashMap::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_value(v, vars)?);
            }
            Ok(StepConfigValue::Table(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve every placeholder in a step's config map. Returns the first
/// unresolved placeholder as an error; the orchestrator treats this as a
/// validation error and creates no jobs (§7 kind 1, §8 placeholder safety).
pub fn resolve_placeholders(
    config: &HashMap<String, StepConfigValue>,
    vars: &HashMap<String, StepConfigValue>,
) -> Result<HashMap<String, StepConfigValue>, TemplateError> {
    let mut resolved = HashMap::with_capacity(config.len());
    for (k, v) in config {
        resolved.insert(k.clone(), resolve_value(v, vars)?);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, StepConfigValue> {
        let mut m = HashMap::new();
        m.insert(
            "api_key".to_string(),
            StepConfigValue::String("secret".to_string()),
        );
        m
    }

    #[test]
    fn resolves_whole_value_placeholder() {
        let mut config = HashMap::new();
        config.insert(
            "key".to_string(),
            StepConfigValue::String("{api_key}".to_string()),
        );
        let resolved = resolve_placeholders(&config, &vars()).unwrap();
        assert_eq!(
            resolved["key"],
            StepConfigValue::String("secret".to_string())
        );
    }

    #[test]
    fn resolves_embedded_placeholder() {
        let mut config = HashMap::new();
        config.insert(
            "url".to_string(),
            StepConfigValue::String("https://example.com/{api_key}/x".to_string()),
        );
        let resolved = resolve_placeholders(&config, &vars()).unwrap();
        assert_eq!(
            resolved["url"],
            StepConfigValue::String("https://example.com/secret/x".to_string())
        );
    }

    #[test]
    fn unresolved_required_placeholder_errors() {
        let mut config = HashMap::new();
        config.insert(
            "key".to_string(),
            StepConfigValue::String("{missing_cred}".to_string()),
        );
        let err = resolve_placeholders(&config, &vars()).unwrap_err();
        assert_eq!(err, TemplateError::Unresolved("missing_cred".to_string()));
    }

    #[test]
    fn non_string_values_pass_through() {
        let mut config = HashMap::new();
        config.insert("count".to_string(), StepConfigValue::Integer(3));
        let resolved = resolve_placeholders(&config, &vars()).unwrap();
        assert_eq!(resolved["count"], StepConfigValue::Integer(3));
    }
}
