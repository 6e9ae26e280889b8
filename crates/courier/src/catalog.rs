use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SYSTEM_DEFAULT_MODEL: &str = "gpt-4o";
pub const SYSTEM_DEFAULT_REASONING_EFFORT: &str = "medium";

/// One model the broker is allowed to use, with its default generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDeployment {
    /// Identifier clients select the deployment by
    pub id: String,
    /// Model name sent to the provider
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

impl ModelDeployment {
    /// A deployment whose id and model name are the same
    pub fn named<S: Into<String>>(model: S) -> Self {
        let model = model.into();
        Self {
            id: model.clone(),
            model,
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSummary {
    /// Every deployment keyed by its id
    pub available_models: BTreeMap<String, ModelDeployment>,
    pub default_model: String,
    pub default_reasoning_effort: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    deployments: Vec<ModelDeployment>,
    default_model: Option<String>,
    default_reasoning_effort: Option<String>,
}

impl ModelCatalog {
    pub fn new(deployments: Vec<ModelDeployment>) -> Self {
        Self {
            deployments,
            ..Default::default()
        }
    }

    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model.filter(|m| !m.is_empty());
        self
    }

    pub fn with_default_reasoning_effort(mut self, effort: Option<String>) -> Self {
        self.default_reasoning_effort = effort.filter(|e| !e.is_empty());
        self
    }

    pub fn default_model(&self) -> &str {
        self.default_model.as_deref().unwrap_or(SYSTEM_DEFAULT_MODEL)
    }

    pub fn default_reasoning_effort(&self) -> &str {
        self.default_reasoning_effort
            .as_deref()
            .unwrap_or(SYSTEM_DEFAULT_REASONING_EFFORT)
    }

    /// The deployment for a requested id. Unknown ids resolve to the default model.
    pub fn resolve(&self, requested: Option<&str>) -> ModelDeployment {
        let wanted = requested
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.default_model());

        self.find(wanted)
            .or_else(|| self.find(self.default_model()))
            .cloned()
            .unwrap_or_else(|| ModelDeployment::named(self.default_model()))
    }

    fn find(&self, id: &str) -> Option<&ModelDeployment> {
        self.deployments.iter().find(|d| d.id == id)
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            available_models: self
                .deployments
                .iter()
                .map(|d| (d.id.clone(), d.clone()))
                .collect(),
            default_model: self.default_model().to_string(),
            default_reasoning_effort: self.default_reasoning_effort().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(id: &str, model: &str) -> ModelDeployment {
        ModelDeployment {
            id: id.to_string(),
            model: model.to_string(),
            temperature: Some(0.2),
            max_tokens: Some(4096),
            reasoning_effort: None,
        }
    }

    #[test]
    fn test_empty_catalog_summary() {
        let summary = ModelCatalog::default().summary();
        assert!(summary.available_models.is_empty());
        assert_eq!(summary.default_model, SYSTEM_DEFAULT_MODEL);
        assert_eq!(summary.default_reasoning_effort, SYSTEM_DEFAULT_REASONING_EFFORT);

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            value,
            json!({
                "availableModels": {},
                "defaultModel": "gpt-4o",
                "defaultReasoningEffort": "medium"
            })
        );
    }

    #[test]
    fn test_configured_defaults() {
        let catalog = ModelCatalog::new(vec![deployment("fast", "gpt-4o-mini")])
            .with_default_model(Some("fast".to_string()))
            .with_default_reasoning_effort(Some("low".to_string()));
        let summary = catalog.summary();
        assert_eq!(summary.default_model, "fast");
        assert_eq!(summary.default_reasoning_effort, "low");
        assert_eq!(summary.available_models.len(), 1);

        let value = serde_json::to_value(&summary).unwrap();
        let fast = &value["availableModels"]["fast"];
        assert_eq!(fast["id"], "fast");
        assert_eq!(fast["model"], "gpt-4o-mini");
        assert_eq!(fast["maxTokens"], 4096);
        assert!(fast.get("reasoningEffort").is_none());
    }

    #[test]
    fn test_resolve() {
        let catalog = ModelCatalog::new(vec![
            deployment("fast", "gpt-4o-mini"),
            deployment("gpt-4o", "gpt-4o-2024-08-06"),
        ]);

        assert_eq!(catalog.resolve(Some("fast")).model, "gpt-4o-mini");
        assert_eq!(catalog.resolve(None).model, "gpt-4o-2024-08-06");
        assert_eq!(catalog.resolve(Some("retired")).model, "gpt-4o-2024-08-06");
        assert_eq!(catalog.resolve(Some("fast")).max_tokens, Some(4096));
    }

    #[test]
    fn test_resolve_without_deployments_uses_default_name() {
        let resolved = ModelCatalog::default().resolve(Some("anything"));
        assert_eq!(resolved, ModelDeployment::named(SYSTEM_DEFAULT_MODEL));
    }
}
