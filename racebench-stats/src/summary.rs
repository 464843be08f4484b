//! Summary Statistics
//!
//! Sample statistics over per-cycle periods: mean, sample variance, standard
//! error of the mean and the relative margin of error at 95% confidence.

use crate::student_t::critical_value;

/// Summary of one candidate's recorded cycles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryStatistics {
    /// Arithmetic mean
    pub mean: f64,
    /// Sample variance (n - 1 denominator)
    pub variance: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    /// Standard error of the mean
    pub sem: f64,
    /// Margin of error (`t * sem`)
    pub moe: f64,
    /// Margin of error relative to the mean, in percent
    pub rme: f64,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
    /// Number of samples
    pub sample_count: usize,
}

/// Compute summary statistics.
///
/// Fewer than two samples give zero variance and therefore a zero margin of
/// error; callers gate on sample count separately.
pub fn compute_summary(samples: &[f64]) -> SummaryStatistics {
    if samples.is_empty() {
        return SummaryStatistics::default();
    }

    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n as f64;

    let variance = if n < 2 {
        0.0
    } else {
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    };
    let std_dev = variance.sqrt();
    let sem = std_dev / (n as f64).sqrt();
    let moe = sem * critical_value(n.saturating_sub(1));
    let rme = if mean == 0.0 { 0.0 } else { (moe / mean) * 100.0 };

    let min = samples
        .iter()
        .cloned()
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(0.0);
    let max = samples
        .iter()
        .cloned()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(0.0);

    SummaryStatistics {
        mean,
        variance,
        std_dev,
        sem,
        moe,
        rme,
        min,
        max,
        sample_count: n,
    }
}
