//! Combines static knowledge-base verdicts with runtime results

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::ecosystem::Ecosystem;
use crate::model::{ComponentResult, StatusCounts};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedAnalysis {
    pub components: Vec<ComponentResult>,
    pub counts: StatusCounts,
}

/// Runtime results take precedence over static ones for the same
/// `(ecosystem, name, version)`. Static order is kept; runtime-only results follow in
/// their own order.
pub fn merge(
    static_results: Vec<ComponentResult>,
    dynamic_results: Vec<ComponentResult>,
) -> MergedAnalysis {
    let mut dynamic: HashMap<ResultKey, ComponentResult> = HashMap::new();
    let mut dynamic_order: Vec<ResultKey> = Vec::new();
    for result in dynamic_results {
        let key = owned_key(&result);
        if dynamic.insert(key.clone(), result).is_none() {
            dynamic_order.push(key);
        }
    }

    let mut components = Vec::with_capacity(static_results.len() + dynamic_order.len());
    let mut used: HashSet<ResultKey> = HashSet::new();
    for result in static_results {
        let key = owned_key(&result);
        match dynamic.get(&key) {
            Some(runtime) => {
                debug!(
                    "Runtime result replaces static result for {}/{}@{}",
                    key.0, key.1, key.2
                );
                components.push(runtime.clone());
                used.insert(key);
            }
            None => components.push(result),
        }
    }

    for key in dynamic_order {
        if used.contains(&key) {
            continue;
        }
        if let Some(result) = dynamic.remove(&key) {
            components.push(result);
        }
    }

    let counts = StatusCounts::from_results(&components);
    MergedAnalysis { components, counts }
}

type ResultKey = (Ecosystem, String, String);

fn owned_key(result: &ComponentResult) -> ResultKey {
    let (ecosystem, name, version) = result.key();
    (ecosystem, name.to_string(), version.to_string())
}

/// Reads component results from an isolation result document, either
/// `{"components": [...]}` or a bare list. Items without an `ecosystem`
/// get `default_ecosystem`; malformed items are skipped.
pub fn parse_runtime_components(
    content: &str,
    default_ecosystem: Ecosystem,
) -> Vec<ComponentResult> {
    let document: Value = match serde_json::from_str(content.trim()) {
        Ok(document) => document,
        Err(e) => {
            warn!("Runtime output is not JSON: {}", e);
            return Vec::new();
        }
    };

    let items = match document {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("components") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!("Runtime output has no components list");
                return Vec::new();
            }
        },
        _ => {
            warn!("Unexpected runtime output shape");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|mut item| {
            if let Value::Object(object) = &mut item {
                object
                    .entry("ecosystem")
                    .or_insert_with(|| Value::String(default_ecosystem.as_str().to_string()));
            }
            serde_json::from_value::<ComponentResult>(item)
                .inspect_err(|e| warn!("Skipping malformed component: {}", e))
                .ok()
        })
        .collect()
}
