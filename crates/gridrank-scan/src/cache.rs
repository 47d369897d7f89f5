//! Run-scoped memoization of provider results.

use std::collections::HashMap;
use std::sync::Arc;

use gridrank_core::Coordinate;
use gridrank_provider::SearchItem;

const COORD_SCALE: f64 = 100_000.0;

/// (keyword, coordinate rounded to 5 decimal places).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    keyword: String,
    lat_e5: i64,
    lng_e5: i64,
}

impl CacheKey {
    #[must_use]
    pub fn new(keyword: &str, coordinate: Coordinate) -> Self {
        Self {
            keyword: keyword.to_string(),
            lat_e5: round_e5(coordinate.lat),
            lng_e5: round_e5(coordinate.lng),
        }
    }

    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }
}

// Coordinates are validated to +-180, well inside i64 after scaling.
#[allow(clippy::cast_possible_truncation)]
fn round_e5(value: f64) -> i64 {
    (value * COORD_SCALE).round() as i64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Provider results for one scan run. A hit hands back the same shared
/// payload the live call produced.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<CacheKey, Arc<[SearchItem]>>,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<[SearchItem]>> {
        match self.entries.get(key) {
            Some(items) => {
                self.hits += 1;
                tracing::debug!(keyword = key.keyword(), "result cache hit");
                Some(Arc::clone(items))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, key: CacheKey, items: Arc<[SearchItem]>) {
        self.entries.insert(key, items);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}
