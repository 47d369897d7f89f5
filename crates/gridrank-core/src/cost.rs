use rust_decimal::Decimal;

/// Default provider price per (keyword, point) query: 0.002.
pub const DEFAULT_COST_PER_QUERY: Decimal = Decimal::from_parts(2, 0, 0, false, 3);

/// Estimated spend for a scan of `point_count` points across
/// `keyword_count` keywords. Linear in the product of the two counts.
#[must_use]
pub fn estimate_cost(point_count: u32, keyword_count: u32, cost_per_query: Decimal) -> Decimal {
    let queries = u64::from(point_count) * u64::from(keyword_count);
    Decimal::from(queries) * cost_per_query
}
