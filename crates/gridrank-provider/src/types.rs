//! Maps ranking provider request and response types.
//!
//! The provider wraps every response in a `{"status_code": 20000, ...}`
//! envelope whose `items` array mixes several result kinds, distinguished by
//! a `"type"` tag. Only organic `maps_search` items carry ranking data; they
//! are validated into [`SearchItem`] at this boundary so nothing downstream
//! touches the raw wire shape.

use gridrank_core::{Coordinate, Device};
use serde::{Deserialize, Serialize};

/// Envelope status code the provider uses for success.
pub const STATUS_OK: i64 = 20000;

/// Number of result slots requested per query.
pub const SEARCH_DEPTH: u32 = 20;

/// One query against the provider: a keyword at a coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub keyword: String,
    pub coordinate: Coordinate,
    pub zoom: u8,
    pub language: String,
    pub device: Device,
}

impl SearchRequest {
    /// Location string in the provider's `lat,lng,zoomz` format.
    #[must_use]
    pub fn location(&self) -> String {
        format!(
            "{:.7},{:.7},{}z",
            self.coordinate.lat, self.coordinate.lng, self.zoom
        )
    }
}

/// A validated organic result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    /// 1-based rank within the organic results.
    pub rank: u32,
    pub title: String,
    pub domain: Option<String>,
    pub url: Option<String>,
    pub cid: Option<u64>,
    pub place_id: Option<String>,
}

/// Map zoom level for a scan radius.
#[must_use]
pub fn zoom_for_radius(radius_km: f64) -> u8 {
    if radius_km <= 1.0 {
        15
    } else if radius_km <= 3.0 {
        14
    } else if radius_km <= 7.0 {
        13
    } else if radius_km <= 15.0 {
        12
    } else {
        11
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct SearchBody<'a> {
    pub keyword: &'a str,
    pub location_coordinate: String,
    pub language_code: &'a str,
    pub device: &'a str,
    pub depth: u32,
}

impl<'a> From<&'a SearchRequest> for SearchBody<'a> {
    fn from(request: &'a SearchRequest) -> Self {
        Self {
            keyword: &request.keyword,
            location_coordinate: request.location(),
            language_code: &request.language,
            device: request.device.as_str(),
            depth: SEARCH_DEPTH,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchEnvelope {
    pub status_code: i64,
    #[serde(default)]
    pub status_message: Option<String>,
    /// Items are kept raw so one malformed entry does not sink the page.
    #[serde(default)]
    pub items: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum WireItem {
    MapsSearch(WireOrganic),
    MapsPaidItem {
        #[serde(default)]
        title: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireOrganic {
    pub rank_group: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cid: Option<WireCid>,
    #[serde(default)]
    pub place_id: Option<String>,
}

/// The provider sends `cid` as a decimal string, older payloads as a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireCid {
    Number(u64),
    Text(String),
}

impl WireOrganic {
    /// Validates the organic item, returning the reason when it is unusable.
    pub(crate) fn validate(self) -> Result<SearchItem, String> {
        let rank = u32::try_from(self.rank_group)
            .ok()
            .filter(|r| *r >= 1)
            .ok_or_else(|| format!("rank {} out of range", self.rank_group))?;

        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| format!("item at rank {rank} has no title"))?;

        let cid = match self.cid {
            None => None,
            Some(WireCid::Number(n)) => Some(n),
            Some(WireCid::Text(s)) if s.trim().is_empty() => None,
            Some(WireCid::Text(s)) => Some(
                s.trim()
                    .parse::<u64>()
                    .map_err(|_| format!("item at rank {rank} has non-numeric cid '{s}'"))?,
            ),
        };

        Ok(SearchItem {
            rank,
            title,
            domain: non_blank(self.domain),
            url: non_blank(self.url),
            cid,
            place_id: non_blank(self.place_id),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decodes the envelope's item list into validated organic items sorted by
/// rank. Ads and unknown item types are dropped; malformed organic items are
/// skipped with a warning.
pub(crate) fn collect_items(keyword: &str, raw: Vec<serde_json::Value>) -> Vec<SearchItem> {
    let mut items: Vec<SearchItem> = raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<WireItem>(value) {
            Ok(WireItem::MapsSearch(organic)) => match organic.validate() {
                Ok(item) => Some(item),
                Err(reason) => {
                    tracing::warn!(keyword, %reason, "skipping invalid provider item");
                    None
                }
            },
            Ok(WireItem::MapsPaidItem { title }) => {
                tracing::debug!(keyword, ?title, "skipping paid item");
                None
            }
            Ok(WireItem::Unknown) => {
                tracing::debug!(keyword, "skipping unknown provider item type");
                None
            }
            Err(e) => {
                tracing::warn!(keyword, error = %e, "skipping malformed provider item");
                None
            }
        })
        .collect();
    items.sort_by_key(|item| item.rank);
    items
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn zoom_steps_down_as_radius_grows() {
        assert_eq!(zoom_for_radius(0.5), 15);
        assert_eq!(zoom_for_radius(1.0), 15);
        assert_eq!(zoom_for_radius(2.0), 14);
        assert_eq!(zoom_for_radius(5.0), 13);
        assert_eq!(zoom_for_radius(10.0), 12);
        assert_eq!(zoom_for_radius(40.0), 11);
    }

    #[test]
    fn location_uses_lat_lng_zoom_format() {
        let request = SearchRequest {
            keyword: "pizza".to_string(),
            coordinate: Coordinate::new(40.7306, -74.0027),
            zoom: 14,
            language: "en".to_string(),
            device: Device::Desktop,
        };
        assert_eq!(request.location(), "40.7306000,-74.0027000,14z");
    }

    #[test]
    fn collect_items_keeps_organic_sorted_and_drops_ads() {
        let raw = vec![
            json!({"type": "maps_search", "rank_group": 2, "title": "Second", "cid": "42"}),
            json!({"type": "maps_paid_item", "title": "Sponsored"}),
            json!({"type": "maps_search", "rank_group": 1, "title": "First", "cid": 7}),
            json!({"type": "local_pack_teaser"}),
        ];
        let items = collect_items("pizza", raw);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First");
        assert_eq!(items[0].cid, Some(7));
        assert_eq!(items[1].cid, Some(42));
    }

    #[test]
    fn collect_items_skips_malformed_organic_items() {
        let raw = vec![
            json!({"type": "maps_search", "rank_group": 0, "title": "Zero rank"}),
            json!({"type": "maps_search", "rank_group": 3, "title": "  "}),
            json!({"type": "maps_search", "rank_group": 4, "title": "Bad cid", "cid": "abc"}),
            json!({"type": "maps_search", "title": "No rank"}),
            json!({"type": "maps_search", "rank_group": 5, "title": "Good", "domain": ""}),
        ];
        let items = collect_items("pizza", raw);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].rank, 5);
        assert_eq!(items[0].domain, None);
    }

    #[test]
    fn blank_cid_string_is_treated_as_absent() {
        let raw = vec![json!({"type": "maps_search", "rank_group": 1, "title": "A", "cid": ""})];
        let items = collect_items("pizza", raw);
        assert_eq!(items[0].cid, None);
    }
}
