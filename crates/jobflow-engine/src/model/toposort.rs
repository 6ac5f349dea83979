//! Dependency ordering for workflow steps (§4.8 step 4, §9 cyclic graphs).

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::workflow::Step;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopoError {
    #[error("step `{step}` depends on unknown step `{missing}`")]
    UnknownPredecessor { step: String, missing: String },

    #[error("cycle detected among steps: {0:?}")]
    Cycle(Vec<String>),
}

/// Order `steps` (keyed by name) so every step appears after everything it
/// `depends` on. A step with no `depends` falls back to depending on the
/// step immediately preceding it in the map's iteration order — since a
/// `HashMap` has no stable order, declaration order is instead taken from
/// `declared_order`, the order step tables appeared in the source document.
pub fn topo_sort<'a>(
    steps: &'a HashMap<String, Step>,
    declared_order: &[String],
) -> Result<Vec<&'a Step>, TopoError> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();

    for (i, name) in declared_order.iter().enumerate() {
        let step = steps
            .get(name)
            .unwrap_or_else(|| panic!("declared_order entry `{name}` missing from steps"));
        let explicit = step.depends_on();
        let deps: Vec<&str> = if explicit.is_empty() {
            if i == 0 {
                vec![]
            } else {
                vec![declared_order[i - 1].as_str()]
            }
        } else {
            for dep in &explicit {
                if !steps.contains_key(dep) {
                    return Err(TopoError::UnknownPredecessor {
                        step: name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
            explicit.iter().map(|s| steps.get_key_value(s).unwrap().0.as_str()).collect()
        };
        edges.insert(name.as_str(), deps);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_progress: HashSet<&str> = HashSet::new();
    let mut ordered: Vec<&str> = Vec::with_capacity(declared_order.len());

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
        ordered: &mut Vec<&'a str>,
    ) -> Result<(), TopoError> {
        if visited.contains(node) {
            return Ok(());
        }
        if in_progress.contains(node) {
            return Err(TopoError::Cycle(vec![node.to_string()]));
        }
        in_progress.insert(node);
        if let Some(deps) = edges.get(node) {
            for dep in deps {
                if let Err(TopoError::Cycle(mut chain)) =
                    visit(dep, edges, visited, in_progress, ordered)
                {
                    chain.push(node.to_string());
                    return Err(TopoError::Cycle(chain));
                }
            }
        }
        in_progress.remove(node);
        visited.insert(node);
        ordered.push(node);
        Ok(())
    }

    for name in declared_order {
        visit(name.as_str(), &edges, &mut visited, &mut in_progress, &mut ordered)?;
    }

    Ok(ordered
        .into_iter()
        .map(|name| steps.get(name).expect("ordered name came from steps"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepErrorPolicy;

    fn step(name: &str, depends: Option<&str>) -> Step {
        Step {
            name: name.to_string(),
            step_type: "transform".to_string(),
            description: None,
            config: HashMap::new(),
            on_error: StepErrorPolicy::Fail,
            depends: depends.map(str::to_string),
            max_attempts: None,
        }
    }

    #[test]
    fn defaults_to_declaration_order_when_no_depends() {
        let mut steps = HashMap::new();
        steps.insert("a".to_string(), step("a", None));
        steps.insert("b".to_string(), step("b", None));
        let order = vec!["a".to_string(), "b".to_string()];

        let sorted = topo_sort(&steps, &order).unwrap();
        assert_eq!(sorted.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn explicit_depends_reorders() {
        let mut steps = HashMap::new();
        steps.insert("a".to_string(), step("a", None));
        steps.insert("b".to_string(), step("b", Some("a")));
        let order = vec!["b".to_string(), "a".to_string()];

        let sorted = topo_sort(&steps, &order).unwrap();
        assert_eq!(sorted.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn unknown_predecessor_rejected() {
        let mut steps = HashMap::new();
        steps.insert("a".to_string(), step("a", Some("ghost")));
        let order = vec!["a".to_string()];

        let err = topo_sort(&steps, &order).unwrap_err();
        assert!(matches!(err, TopoError::UnknownPredecessor { .. }));
    }

    #[test]
    fn cycle_rejected() {
        let mut steps = HashMap::new();
        steps.insert("a".to_string(), step("a", Some("b")));
        steps.insert("b".to_string(), step("b", Some("a")));
        let order = vec!["a".to_string(), "b".to_string()];

        let err = topo_sort(&steps, &order).unwrap_err();
        assert!(matches!(err, TopoError::Cycle(_)));
    }
}
