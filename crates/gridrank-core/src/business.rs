use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

/// Snapshot of the business being tracked.
///
/// A scan clones this at start time, so later edits to the source record
/// never reach an in-flight or finished scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessIdentity {
    pub name: String,
    pub domain: Option<String>,
    #[serde(default)]
    pub address: Address,
    pub coordinate: Coordinate,
    /// Provider-assigned numeric business ID ("cid").
    pub cid: Option<u64>,
    /// Provider-assigned opaque place identifier.
    pub place_id: Option<String>,
}

impl BusinessIdentity {
    #[must_use]
    pub fn new(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            name: name.into(),
            domain: None,
            address: Address::default(),
            coordinate,
            cid: None,
            place_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub text: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Keyword {
    #[must_use]
    pub fn active(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            active: true,
        }
    }

    /// Returns the trimmed text of each active keyword, in declaration order,
    /// with blanks and case-insensitive duplicates removed.
    #[must_use]
    pub fn active_texts(keywords: &[Keyword]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        keywords
            .iter()
            .filter(|k| k.active)
            .map(|k| k.text.trim())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.to_lowercase()))
            .map(str::to_owned)
            .collect()
    }
}
