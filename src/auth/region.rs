//! Serving region and partition from the Teams discovery config
//!
//! The web client caches its region discovery result in localStorage under a
//! key ending in [`DISCOVERY_CONFIG_KEY`]. The value wraps an `item` holding
//! the region, an optional partition and the `regionGtms` service URL map.

use serde_json::Value;
use std::collections::HashMap;

use crate::session::SessionDocument;

/// Suffix of the localStorage key holding the discovery config.
pub const DISCOVERY_CONFIG_KEY: &str = "DISCOVER-REGION-GTM";

const TEAMS_API_BASE: &str = "https://teams.microsoft.com/api/mt";
const DEFAULT_CHAT_SERVICE: &str = "https://amer.ng.msg.teams.microsoft.com";
const CHATSVCAGG: &str = "https://chatsvcagg.teams.microsoft.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    pub region: String,
    pub region_partition: Option<String>,
    pub has_partition: bool,
    /// Middle-tier base URL for this region (and partition, if any).
    pub teams_base_url: String,
    /// Service name -> base URL, from `regionGtms`.
    pub gtms: HashMap<String, String>,
}

impl RegionConfig {
    /// Find and parse the discovery config in any origin.
    pub fn from_session(doc: &SessionDocument) -> Option<Self> {
        doc.entries()
            .filter(|(_, _, entry)| entry.name.ends_with(DISCOVERY_CONFIG_KEY))
            .find_map(|(_, _, entry)| {
                let value: Value = serde_json::from_str(&entry.value).ok()?;
                Self::from_discovery(&value)
            })
    }

    pub fn from_discovery(value: &Value) -> Option<Self> {
        let item = value.get("item").unwrap_or(value);

        let gtms: HashMap<String, String> = item
            .get("regionGtms")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let region = item
            .get("region")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(String::from)
            .or_else(|| region_from_middle_tier(gtms.get("middleTier")?))?;

        let region_partition = item
            .get("partition")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(String::from);
        let has_partition = region_partition.is_some();

        let teams_base_url = match &region_partition {
            Some(partition) => format!("{}/part/{}", TEAMS_API_BASE, partition),
            None => format!("{}/{}", TEAMS_API_BASE, region),
        };

        Some(Self {
            region,
            region_partition,
            has_partition,
            teams_base_url,
            gtms,
        })
    }

    /// Service URL from `regionGtms`, or `default` when not advertised.
    pub fn service_url(&self, service: &str, default: &str) -> String {
        self.gtms
            .get(service)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn chat_service_url(&self) -> String {
        self.service_url("chatService", DEFAULT_CHAT_SERVICE)
    }

    pub fn chatsvcagg_url(&self) -> String {
        self.service_url("chatServiceAggregator", CHATSVCAGG)
    }
}

/// ".../api/mt/emea" -> "emea"
fn region_from_middle_tier(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(String::from)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session::{Origin, StorageEntry};
    use serde_json::json;

    pub(crate) fn discovery_entry(region: &str, partition: Option<&str>) -> StorageEntry {
        StorageEntry {
            name: format!("tmp.auth.v1.oid-1.Discover.{}", DISCOVERY_CONFIG_KEY),
            value: json!({
                "item": {
                    "region": region,
                    "partition": partition,
                    "regionGtms": {
                        "chatService": format!("https://{}.ng.msg.teams.microsoft.com", region),
                        "middleTier": format!("https://teams.microsoft.com/api/mt/{}", region),
                    }
                },
                "expiry": 0,
            })
            .to_string(),
        }
    }

    #[test]
    fn test_region_without_partition() {
        let doc = SessionDocument {
            cookies: vec![],
            origins: vec![Origin {
                origin: "https://teams.microsoft.com".into(),
                entries: vec![discovery_entry("emea", None)],
            }],
        };
        let region = RegionConfig::from_session(&doc).unwrap();
        assert_eq!(region.region, "emea");
        assert!(!region.has_partition);
        assert_eq!(region.teams_base_url, "https://teams.microsoft.com/api/mt/emea");
        assert_eq!(region.chat_service_url(), "https://emea.ng.msg.teams.microsoft.com");
        assert_eq!(region.chatsvcagg_url(), CHATSVCAGG);
    }

    #[test]
    fn test_region_with_partition() {
        let region = RegionConfig::from_discovery(&json!({
            "item": {"region": "amer", "partition": "amer02"}
        }))
        .unwrap();
        assert!(region.has_partition);
        assert_eq!(region.region_partition.as_deref(), Some("amer02"));
        assert_eq!(region.teams_base_url, "https://teams.microsoft.com/api/mt/part/amer02");
    }

    #[test]
    fn test_region_inferred_from_middle_tier() {
        let region = RegionConfig::from_discovery(&json!({
            "regionGtms": {"middleTier": "https://teams.microsoft.com/api/mt/apac/"}
        }))
        .unwrap();
        assert_eq!(region.region, "apac");
    }

    #[test]
    fn test_missing_config() {
        assert!(RegionConfig::from_session(&SessionDocument::default()).is_none());
        assert!(RegionConfig::from_discovery(&json!({"item": {}})).is_none());
    }
}
