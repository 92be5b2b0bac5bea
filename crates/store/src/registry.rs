//! In-memory model registry.

use std::collections::HashMap;

use async_trait::async_trait;
use flowgate_core::error::StoreError;
use flowgate_core::model::{ChatModel, LlmProvider, ModelRegistry, ModelType};

/// Models and providers keyed by id. Read-only after construction.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    models: Vec<ChatModel>,
    providers: HashMap<String, LlmProvider>,
}

impl InMemoryRegistry {
    pub fn new(models: Vec<ChatModel>, providers: Vec<LlmProvider>) -> Self {
        Self {
            models,
            providers: providers.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl ModelRegistry for InMemoryRegistry {
    async fn get_by_model_id(&self, model_id: &str) -> Result<ChatModel, StoreError> {
        self.models
            .iter()
            .find(|m| m.model_id == model_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("model {model_id}")))
    }

    async fn get_by_id(&self, id: &str) -> Result<ChatModel, StoreError> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("model {id}")))
    }

    async fn list_by_client_type(&self, client_type: &str, model_type: ModelType) -> Result<Vec<ChatModel>, StoreError> {
        Ok(self
            .models
            .iter()
            .filter(|m| m.model_type == model_type)
            .filter(|m| {
                self.providers
                    .get(&m.provider_id)
                    .is_some_and(|p| p.client_type.eq_ignore_ascii_case(client_type))
            })
            .cloned()
            .collect())
    }

    async fn provider_by_id(&self, provider_id: &str) -> Result<LlmProvider, StoreError> {
        self.providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("provider {provider_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InMemoryRegistry {
        let provider = |id: &str, ct: &str| LlmProvider {
            id: id.into(),
            client_type: ct.into(),
            ..Default::default()
        };
        let model = |id: &str, model_id: &str, provider_id: &str| ChatModel {
            id: id.into(),
            model_id: model_id.into(),
            provider_id: provider_id.into(),
            ..Default::default()
        };
        InMemoryRegistry::new(
            vec![
                model("m1", "gpt-4o", "p-openai"),
                model("m2", "claude-sonnet", "p-anthropic"),
                ChatModel {
                    model_type: ModelType::Embedding,
                    ..model("m3", "text-embedding-3", "p-openai")
                },
            ],
            vec![provider("p-openai", "openai"), provider("p-anthropic", "anthropic")],
        )
    }

    #[tokio::test]
    async fn lookups_by_both_ids() {
        let r = registry();
        assert_eq!(r.get_by_model_id("claude-sonnet").await.unwrap().id, "m2");
        assert_eq!(r.get_by_id("m1").await.unwrap().model_id, "gpt-4o");
        assert!(matches!(r.get_by_id("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_filters_client_and_model_type() {
        let r = registry();
        let chat = r.list_by_client_type("openai", ModelType::Chat).await.unwrap();
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].id, "m1");
        let embed = r.list_by_client_type("openai", ModelType::Embedding).await.unwrap();
        assert_eq!(embed[0].id, "m3");
    }
}
