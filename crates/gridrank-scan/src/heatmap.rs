//! Per-keyword summary statistics over a scan grid.

use std::collections::HashMap;

use gridrank_core::{GridPoint, HeatmapData, HeatmapPoint, RankObservation};

/// Heat value for a rank: the closer to the top, the hotter.
#[must_use]
pub fn intensity(rank: Option<u32>) -> f64 {
    match rank {
        Some(r) if r <= 3 => 1.0,
        Some(r) if r <= 10 => 0.7,
        Some(r) if r <= 20 => 0.4,
        _ => 0.0,
    }
}

/// Folds `observations` for `keyword` over `grid` into heatmap statistics.
///
/// Observations for other keywords are ignored. Grid points without an
/// observation count as not ranking. The result depends only on the set of
/// observations, so recomputing after a replay gives the same output.
#[must_use]
pub fn aggregate(keyword: &str, grid: &[GridPoint], observations: &[RankObservation]) -> HeatmapData {
    let ranks: HashMap<u32, Option<u32>> = observations
        .iter()
        .filter(|o| o.keyword == keyword)
        .map(|o| (o.position, o.rank))
        .collect();

    let points: Vec<HeatmapPoint> = grid
        .iter()
        .map(|p| {
            let rank = ranks.get(&p.position).copied().flatten();
            HeatmapPoint {
                position: p.position,
                coordinate: p.coordinate,
                rank,
                intensity: intensity(rank),
            }
        })
        .collect();

    let ranked: Vec<u32> = points.iter().filter_map(|p| p.rank).collect();
    let total_points = u32::try_from(points.len()).unwrap_or(u32::MAX);
    let points_ranking = u32::try_from(ranked.len()).unwrap_or(u32::MAX);
    let top3_count = u32::try_from(ranked.iter().filter(|r| **r <= 3).count()).unwrap_or(u32::MAX);

    let average_rank = if ranked.is_empty() {
        0.0
    } else {
        ranked.iter().map(|r| f64::from(*r)).sum::<f64>() / f64::from(points_ranking)
    };
    let visibility_score = if total_points == 0 {
        0.0
    } else {
        f64::from(top3_count) / f64::from(total_points) * 100.0
    };

    HeatmapData {
        keyword: keyword.to_string(),
        points,
        total_points,
        average_rank,
        points_ranking,
        not_ranking: total_points - points_ranking,
        top3_count,
        visibility_score,
    }
}

#[cfg(test)]
mod tests {
    use gridrank_core::{Coordinate, GridSize};

    use super::*;
    use crate::grid::generate_grid;

    fn grid() -> Vec<GridPoint> {
        generate_grid(Coordinate::new(40.73, -74.0), GridSize::Three, 2.0)
    }

    fn obs(keyword: &str, position: u32, rank: Option<u32>) -> RankObservation {
        RankObservation {
            rank,
            ..RankObservation::no_data(keyword, position)
        }
    }

    #[test]
    fn intensity_bands() {
        assert!((intensity(Some(1)) - 1.0).abs() < f64::EPSILON);
        assert!((intensity(Some(3)) - 1.0).abs() < f64::EPSILON);
        assert!((intensity(Some(4)) - 0.7).abs() < f64::EPSILON);
        assert!((intensity(Some(10)) - 0.7).abs() < f64::EPSILON);
        assert!((intensity(Some(20)) - 0.4).abs() < f64::EPSILON);
        assert!(intensity(Some(21)).abs() < f64::EPSILON);
        assert!(intensity(None).abs() < f64::EPSILON);
    }

    #[test]
    fn counts_ranked_and_unranked_points() {
        let observations = vec![
            obs("pizza", 1, Some(1)),
            obs("pizza", 5, Some(5)),
            obs("pizza", 9, Some(12)),
            obs("pizza", 2, None),
        ];
        let heatmap = aggregate("pizza", &grid(), &observations);
        assert_eq!(heatmap.total_points, 9);
        assert_eq!(heatmap.points_ranking, 3);
        assert_eq!(heatmap.not_ranking, 6);
        assert_eq!(heatmap.top3_count, 1);
        assert!((heatmap.average_rank - 6.0).abs() < 1e-9);
        assert!((heatmap.visibility_score - 100.0 / 9.0).abs() < 1e-9);
        assert!((heatmap.points[4].intensity - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn no_rankings_gives_zero_average() {
        let heatmap = aggregate("pizza", &grid(), &[]);
        assert_eq!(heatmap.points_ranking, 0);
        assert_eq!(heatmap.not_ranking, 9);
        assert!(heatmap.average_rank.abs() < f64::EPSILON);
        assert!(heatmap.visibility_score.abs() < f64::EPSILON);
    }

    #[test]
    fn ignores_other_keywords() {
        let heatmap = aggregate("pizza", &grid(), &[obs("pasta", 1, Some(1))]);
        assert_eq!(heatmap.points_ranking, 0);
    }

    #[test]
    fn empty_grid_has_zero_visibility() {
        let heatmap = aggregate("pizza", &[], &[]);
        assert_eq!(heatmap.total_points, 0);
        assert!(heatmap.visibility_score.abs() < f64::EPSILON);
    }

    #[test]
    fn order_of_observations_does_not_matter() {
        let mut observations = vec![
            obs("pizza", 3, Some(2)),
            obs("pizza", 7, Some(8)),
            obs("pizza", 1, None),
        ];
        let forward = aggregate("pizza", &grid(), &observations);
        observations.reverse();
        assert_eq!(aggregate("pizza", &grid(), &observations), forward);
    }

    #[test]
    fn visibility_stays_within_bounds() {
        let all_top: Vec<RankObservation> = (1..=9).map(|p| obs("pizza", p, Some(1))).collect();
        let heatmap = aggregate("pizza", &grid(), &all_top);
        assert!((heatmap.visibility_score - 100.0).abs() < 1e-9);
        assert_eq!(heatmap.points_ranking + heatmap.not_ranking, heatmap.total_points);
    }
}
