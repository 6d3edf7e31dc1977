//! Stored message templates referenced by `template_id` on campaign steps.

use async_trait::async_trait;
use campaign_core::types::{MessageTemplate, TemplateId};
use dashmap::DashMap;

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(&self, id: TemplateId) -> anyhow::Result<Option<MessageTemplate>>;
}

/// In-memory template store.
/// Production: replace with the platform's template service.
#[derive(Default)]
pub struct InMemoryTemplates {
    templates: DashMap<TemplateId, MessageTemplate>,
}

impl InMemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, template: MessageTemplate) {
        self.templates.insert(template.id, template);
    }

    pub fn remove(&self, id: TemplateId) -> Option<MessageTemplate> {
        self.templates.remove(&id).map(|(_, t)| t)
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplates {
    async fn get_template(&self, id: TemplateId) -> anyhow::Result<Option<MessageTemplate>> {
        Ok(self.templates.get(&id).map(|t| t.clone()))
    }
}
