//! Sample-point lattice around a business location.

use gridrank_core::{Coordinate, GridPoint, GridSize};

const KM_PER_DEGREE_LAT: f64 = 111.0;
const EARTH_RADIUS_KM: f64 = 6371.0;
/// Keeps the longitude conversion finite near the poles.
const MIN_COS_LAT: f64 = 0.01;

/// Builds the `N x N` lattice centred on `center`, spanning `2 * radius_km`
/// on both axes.
///
/// Rows run north to south, columns west to east, and positions are
/// numbered row-major from 1. Each point carries its great-circle distance
/// from the centre.
#[must_use]
pub fn generate_grid(center: Coordinate, grid_size: GridSize, radius_km: f64) -> Vec<GridPoint> {
    let side = grid_size.side();
    let spacing_km = if side > 1 {
        2.0 * radius_km / f64::from(side - 1)
    } else {
        0.0
    };
    let half_span_km = if side > 1 { radius_km } else { 0.0 };
    let km_per_degree_lng = KM_PER_DEGREE_LAT * center.lat.to_radians().cos().max(MIN_COS_LAT);

    let mut points = Vec::with_capacity(grid_size.point_count() as usize);
    for row in 0..side {
        let north_km = half_span_km - f64::from(row) * spacing_km;
        for col in 0..side {
            let east_km = -half_span_km + f64::from(col) * spacing_km;
            let coordinate = Coordinate::new(
                center.lat + north_km / KM_PER_DEGREE_LAT,
                center.lng + east_km / km_per_degree_lng,
            );
            let position = row * side + col + 1;
            points.push(GridPoint::unscanned(
                position,
                coordinate,
                haversine_km(center, coordinate),
            ));
        }
    }
    points
}

/// Great-circle distance between two coordinates in kilometres.
#[must_use]
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}
