//! Locates the tracked business inside a ranked result list.
//!
//! Matching runs tier by tier across *all* candidates: a strong identifier
//! match anywhere in the list beats a textual match ranked higher. Within a
//! tier the best-ranked candidate wins.

use std::collections::HashSet;
use std::sync::LazyLock;

use gridrank_core::{BusinessIdentity, Competitor, MatchTier};
use gridrank_provider::SearchItem;
use regex::Regex;

pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.6;
pub const MAX_COMPETITORS: usize = 5;
/// Fewest significant words a title must share to count as an overlap match.
pub const MIN_SHARED_WORDS: usize = 2;

const STOPWORDS: &[&str] = &[
    "the", "and", "of", "at", "in", "on", "for", "by", "to", "llc", "inc", "co", "corp", "ltd",
    "company",
];

static HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z][a-z0-9+.\-]*://)?(?:[^@/]*@)?([^/:?#]+)").expect("valid regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub rank: Option<u32>,
    pub url: Option<String>,
    pub tier: Option<MatchTier>,
}

#[derive(Debug, Clone, Copy)]
pub struct EntityMatcher {
    overlap_threshold: f64,
}

impl Default for EntityMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAP_THRESHOLD)
    }
}

impl EntityMatcher {
    #[must_use]
    pub fn new(overlap_threshold: f64) -> Self {
        Self { overlap_threshold }
    }

    #[must_use]
    pub fn overlap_threshold(&self) -> f64 {
        self.overlap_threshold
    }

    /// Finds the business in `items`. Items need not be sorted.
    #[must_use]
    pub fn match_business(&self, items: &[SearchItem], business: &BusinessIdentity) -> MatchOutcome {
        let name = normalize_name(&business.name);
        let target = Target {
            business,
            name_words: significant_words(&name),
            name: &name,
            domain: business.domain.as_deref().and_then(normalize_domain),
            overlap_threshold: self.overlap_threshold,
        };

        for tier in TIER_ORDER {
            if let Some(best) = items
                .iter()
                .filter(|item| target.matches(tier, item))
                .min_by_key(|item| item.rank)
            {
                return MatchOutcome {
                    rank: Some(best.rank),
                    url: best.url.clone().or_else(|| best.domain.clone()),
                    tier: Some(tier),
                };
            }
        }
        MatchOutcome::default()
    }
}

const TIER_ORDER: [MatchTier; 5] = [
    MatchTier::NumericId,
    MatchTier::PlaceId,
    MatchTier::ExactName,
    MatchTier::WordOverlap,
    MatchTier::Domain,
];

/// The business identity, pre-normalized once per result list.
struct Target<'a> {
    business: &'a BusinessIdentity,
    name: &'a str,
    name_words: HashSet<&'a str>,
    domain: Option<String>,
    overlap_threshold: f64,
}

impl Target<'_> {
    fn matches(&self, tier: MatchTier, item: &SearchItem) -> bool {
        match tier {
            MatchTier::NumericId => self.business.cid.is_some() && item.cid == self.business.cid,
            MatchTier::PlaceId => match (&self.business.place_id, &item.place_id) {
                (Some(ours), Some(theirs)) => !ours.is_empty() && ours == theirs,
                _ => false,
            },
            MatchTier::ExactName => !self.name.is_empty() && normalize_name(&item.title) == self.name,
            MatchTier::WordOverlap => {
                word_overlap(&self.name_words, &normalize_name(&item.title))
                    >= self.overlap_threshold
            }
            MatchTier::Domain => self
                .domain
                .as_ref()
                .is_some_and(|ours| candidate_domain(item).as_ref() == Some(ours)),
        }
    }
}

/// The first [`MAX_COMPETITORS`] items by rank, regardless of match outcome.
#[must_use]
pub fn top_competitors(items: &[SearchItem]) -> Vec<Competitor> {
    let mut sorted: Vec<&SearchItem> = items.iter().collect();
    sorted.sort_by_key(|item| item.rank);
    sorted
        .into_iter()
        .take(MAX_COMPETITORS)
        .map(|item| Competitor {
            name: item.title.clone(),
            rank: item.rank,
        })
        .collect()
}

/// Lowercase, apostrophes dropped, other non-alphanumerics turned into
/// spaces, whitespace collapsed.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    let mapped: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(*c, '\'' | '\u{2019}' | '\u{2018}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Bare lowercase host: scheme, credentials, leading `www.`, port, path and
/// trailing dot removed.
#[must_use]
pub fn normalize_domain(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let host = HOST_RE.captures(&lowered)?.get(1)?.as_str();
    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);
    (!host.is_empty()).then(|| host.to_string())
}

fn candidate_domain(item: &SearchItem) -> Option<String> {
    item.domain
        .as_deref()
        .and_then(normalize_domain)
        .or_else(|| item.url.as_deref().and_then(normalize_domain))
}

fn significant_words(normalized: &str) -> HashSet<&str> {
    normalized
        .split(' ')
        .filter(|w| w.chars().count() >= 2 && !STOPWORDS.contains(w))
        .collect()
}

/// Share of the business's significant words that also appear in the
/// candidate title. Zero when fewer than [`MIN_SHARED_WORDS`] are shared, so
/// a one-word name never matches every title containing that word.
fn word_overlap(business_words: &HashSet<&str>, candidate: &str) -> f64 {
    let candidate_words = significant_words(candidate);
    let shared = business_words
        .iter()
        .filter(|w| candidate_words.contains(*w))
        .count();
    if shared < MIN_SHARED_WORDS {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = shared as f64 / business_words.len() as f64;
    ratio
}
