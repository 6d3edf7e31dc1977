//! Request and response shapes specific to the REST surface. Domain types
//! are serialized as-is from `campaign_drip::types`.

use campaign_drip::types::{Campaign, CampaignStats, NewStep};
use serde::{Deserialize, Serialize};

/// A campaign with its live counters.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignView {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub stats: CampaignStats,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSteps {
    pub steps: Vec<NewStep>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
