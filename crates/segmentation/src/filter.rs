//! Dynamic audience filter rules.
//!
//! Every key that is present must match (logical AND). String comparisons are
//! trimmed and case-insensitive. A filter with no keys matches nobody.

use std::collections::HashSet;

use campaign_core::types::{Customer, CustomerId, GroupId};
use campaign_core::{CampaignError, CampaignResult};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudienceFilter {
    /// Customer must carry at least one of these tags.
    #[serde(
        default,
        alias = "tag",
        deserialize_with = "string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tags: Vec<String>,
    /// Customer must belong to at least one of these groups.
    #[serde(
        default,
        alias = "group_id",
        deserialize_with = "one_or_many_ids",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub group_ids: Vec<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_marketed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_email_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_whatsapp_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sms_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

impl AudienceFilter {
    /// Parse the `filter_rules` JSON of a campaign. `null` and `{}` both mean
    /// "no dynamic audience".
    pub fn from_value(value: &serde_json::Value) -> CampaignResult<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }
        let filter: AudienceFilter = serde_json::from_value(value.clone())
            .map_err(|e| CampaignError::validation(format!("invalid filter_rules: {e}")))?;
        Ok((!filter.is_empty()).then_some(filter))
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.group_ids.is_empty()
            && self.country.is_none()
            && self.country_code.is_none()
            && self.has_marketed.is_none()
            && self.last_email_status.is_none()
            && self.last_whatsapp_status.is_none()
            && self.last_sms_status.is_none()
            && self.email.is_none()
            && self.whatsapp.is_none()
            && self.mobile.is_none()
    }

    /// Whether `customer` satisfies every present rule. `group_members` is the
    /// union of the members of `group_ids`, resolved by the caller.
    pub fn matches(&self, customer: &Customer, group_members: &HashSet<CustomerId>) -> bool {
        if self.is_empty() {
            return false;
        }

        if !self.tags.is_empty() {
            let wanted: HashSet<String> = self.tags.iter().map(|t| normalize(t)).collect();
            if !customer.tags.iter().any(|t| wanted.contains(&normalize(t))) {
                return false;
            }
        }

        if !self.group_ids.is_empty() && !group_members.contains(&customer.id) {
            return false;
        }

        if let Some(expected) = self.has_marketed {
            if customer.has_marketed != expected {
                return false;
            }
        }

        let text_rules = [
            (&self.country, &customer.country),
            (&self.country_code, &customer.country_code),
            (&self.last_email_status, &customer.last_email_status),
            (&self.last_whatsapp_status, &customer.last_whatsapp_status),
            (&self.last_sms_status, &customer.last_sms_status),
            (&self.email, &customer.email),
            (&self.whatsapp, &customer.whatsapp),
            (&self.mobile, &customer.mobile),
        ];
        text_rules
            .iter()
            .all(|(rule, actual)| match rule {
                Some(expected) => text_eq(actual.as_deref(), expected),
                None => true,
            })
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn text_eq(actual: Option<&str>, expected: &str) -> bool {
    actual.is_some_and(|a| normalize(a) == normalize(expected))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<StringOrList>::deserialize(deserializer)?;
    let values = match raw {
        None => Vec::new(),
        Some(StringOrList::One(s)) => s.split(',').map(str::to_string).collect(),
        Some(StringOrList::Many(v)) => v,
    };
    Ok(values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdOrList {
    One(GroupId),
    Many(Vec<GroupId>),
}

fn one_or_many_ids<'de, D>(deserializer: D) -> Result<Vec<GroupId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<IdOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(IdOrList::One(id)) => vec![id],
        Some(IdOrList::Many(ids)) => ids,
    })
}
