use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use campaign_core::types::CustomerId;
use campaign_core::CampaignResult;
use tracing::{debug, warn};

use crate::directory::CustomerDirectory;
use crate::filter::AudienceFilter;

/// Computes a campaign's audience: the union of its static customer ids and
/// the customers matched by its dynamic filter, deduplicated and ascending.
pub struct AudienceResolver {
    directory: Arc<dyn CustomerDirectory>,
}

impl AudienceResolver {
    pub fn new(directory: Arc<dyn CustomerDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn CustomerDirectory> {
        &self.directory
    }

    pub async fn resolve(
        &self,
        static_ids: &[CustomerId],
        filter: Option<&AudienceFilter>,
    ) -> CampaignResult<Vec<CustomerId>> {
        let mut audience = BTreeSet::new();

        for &id in static_ids {
            if audience.contains(&id) {
                continue;
            }
            match self.directory.get_customer(id).await? {
                Some(_) => {
                    audience.insert(id);
                }
                None => warn!(customer_id = id, "Static audience id not in directory, dropping"),
            }
        }

        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            let mut group_members = HashSet::new();
            for &group_id in &filter.group_ids {
                group_members.extend(self.directory.group_members(group_id).await?);
            }

            let matched = self
                .directory
                .list_customers()
                .await?
                .into_iter()
                .filter(|c| filter.matches(c, &group_members))
                .map(|c| c.id);
            audience.extend(matched);
        }

        debug!(
            static_ids = static_ids.len(),
            resolved = audience.len(),
            "Audience resolved"
        );
        Ok(audience.into_iter().collect())
    }
}
