//! Two-sided Student's t critical values at 95% confidence.

/// Critical values for 1..=30 degrees of freedom
const T_TABLE: [f64; 30] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045, 2.042,
];

/// Critical value beyond the table (normal approximation)
pub const T_INFINITY: f64 = 1.96;

/// Critical value for `df` degrees of freedom.
///
/// Zero degrees of freedom is treated as one.
pub fn critical_value(df: usize) -> f64 {
    match df {
        0 => T_TABLE[0],
        1..=30 => T_TABLE[df - 1],
        _ => T_INFINITY,
    }
}
