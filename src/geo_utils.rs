//! # Geographic utilities
//!
//! Great-circle distance on the WGS84 sphere, relative length comparison,
//! linear interpolation and the column statistics used for activity metadata.

/// WGS84 equatorial radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Haversine distance between two coordinates in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// `|l1 - l2| / mean(l1, l2)`. Two zero lengths are identical (0.0).
pub fn norm_length_diff(l1: f64, l2: f64) -> f64 {
    let mean = (l1 + l2) / 2.0;
    if mean == 0.0 {
        return 0.0;
    }
    (l1 - l2).abs() / mean
}

/// Linear interpolation between `a` and `b` at `portion` in [0, 1].
#[inline]
pub fn lerp(a: f64, b: f64, portion: f64) -> f64 {
    a + (b - a) * portion
}

/// Interpolate an optional value; `None` if either end is missing.
pub fn lerp_opt(a: Option<f64>, b: Option<f64>, portion: f64) -> Option<f64> {
    Some(lerp(a?, b?, portion))
}

/// Arithmetic mean, `None` for an empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean of the present values, `None` when all are missing.
pub fn mean_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = values.into_iter().flatten().collect();
    mean(&present)
}

/// Sample standard deviation (n - 1 denominator). `None` for fewer than 2 values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Sample standard deviation of the present values.
pub fn sample_std_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = values.into_iter().flatten().collect();
    sample_std(&present)
}
