//! Arrival estimates from straight-line distance.

const EARTH_RADIUS_KM: f64 = 6371.0;
/// Below this a vehicle is treated as stopped and the fallback speed applies
const MIN_MOVING_SPEED_KMH: f64 = 1.0;

/// Great-circle distance in kilometres
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Whole minutes to cover `distance_km`, never less than one
pub fn estimate_minutes(distance_km: f64, speed_kmh: Option<f64>, default_speed_kmh: f64) -> u64 {
    let speed = match speed_kmh {
        Some(s) if s.is_finite() && s >= MIN_MOVING_SPEED_KMH => s,
        _ => default_speed_kmh,
    };

    let minutes = (distance_km.max(0.0) / speed * 60.0).ceil();
    if minutes.is_finite() && minutes >= 1.0 {
        minutes as u64
    } else {
        1
    }
}

pub fn format_eta(minutes: u64) -> String {
    if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{minutes} minutes")
    }
}
