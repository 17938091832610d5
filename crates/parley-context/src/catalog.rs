//! Model catalog

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Capabilities of a chat model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub model: String,
    pub name: String,
    pub context_max_tokens: usize,
}

impl ModelSpec {
    pub fn new(model: impl Into<String>, name: impl Into<String>, context_max_tokens: usize) -> Self {
        Self {
            model: model.into(),
            name: name.into(),
            context_max_tokens,
        }
    }
}

/// Looks up model capabilities by identifier.
pub trait ModelCatalog: Send + Sync {
    fn lookup(&self, model: &str) -> Option<ModelSpec>;

    fn list(&self) -> Vec<ModelSpec>;
}

/// Fixed, in-memory catalog.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    models: BTreeMap<String, ModelSpec>,
}

impl StaticCatalog {
    pub fn new(models: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|spec| (spec.model.clone(), spec))
                .collect(),
        }
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new([
            ModelSpec::new("gpt-3.5-turbo", "GPT-3.5", 4000),
            ModelSpec::new("gpt-3.5-turbo-16k", "GPT-3.5 16k", 16000),
            ModelSpec::new("gpt-4", "GPT-4", 8000),
            ModelSpec::new("gpt-4-32k", "GPT-4 32k", 32000),
        ])
    }
}

impl ModelCatalog for StaticCatalog {
    fn lookup(&self, model: &str) -> Option<ModelSpec> {
        self.models.get(model).cloned()
    }

    fn list(&self) -> Vec<ModelSpec> {
        self.models.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_knows_gpt4() {
        let catalog = StaticCatalog::default();
        assert_eq!(catalog.lookup("gpt-4").unwrap().context_max_tokens, 8000);
        assert!(catalog.lookup("gpt-5-imaginary").is_none());
    }

    #[test]
    fn spec_serializes_camel_case() {
        let spec = ModelSpec::new("gpt-4", "GPT-4", 8000);
        let encoded = serde_json::to_value(spec).unwrap();
        assert_eq!(encoded["contextMaxTokens"], 8000);
    }
}
