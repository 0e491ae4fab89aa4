//! Shared unit conversions and rounding.
//!
//! Providers report in SI units (m/s, metres, mm); aviation users expect knots,
//! feet and flight levels. Everything past the provider boundary is in
//! aviation units.

const KNOTS_PER_MS: f64 = 1.943_844_5;
const FEET_PER_METRE: f64 = 3.280_84;

/// Convert metres per second to knots.
pub(crate) fn ms_to_knots(v: f64) -> f64 {
    v * KNOTS_PER_MS
}

pub(crate) fn metres_to_feet(v: f64) -> f64 {
    v * FEET_PER_METRE
}

/// Flight level (hundreds of feet) to feet.
pub(crate) fn flight_level_to_feet(fl: f64) -> f64 {
    fl * 100.0
}

/// Round to `dp` decimal places for display and JSON output.
///
/// Returns 0 for non-finite inputs so NaN never leaks into a response.
pub(crate) fn round_to(v: f64, dp: i32) -> f64 {
    if !v.is_finite() {
        tracing::warn!("round_to received non-finite value {}, defaulting to 0", v);
        return 0.0;
    }
    let factor = 10f64.powi(dp);
    (v * factor).round() / factor
}

/// Clamp to the 0..=1 range used by the turbulence and icing indices.
pub(crate) fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Arithmetic mean of the present values; `None` if there are none.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}
