use crate::core::histogram::Histogram;
use crate::types::{FloodError, FloodResult};
use serde::{Deserialize, Serialize};

/// Relative tolerance under which two between-class variances count as equal
const TIE_TOLERANCE: f64 = 1e-12;

/// Threshold selection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtsuParams {
    /// Threshold (dB) used when no data-driven threshold can be computed
    pub default_threshold: f64,
}

impl Default for OtsuParams {
    fn default() -> Self {
        Self { default_threshold: -15.0 }
    }
}

/// Where a threshold came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThresholdSource {
    Otsu,
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDecision {
    pub value: f64,
    pub source: ThresholdSource,
}

impl ThresholdDecision {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ThresholdSource::Fallback { .. })
    }
}

/// Otsu threshold selection over a bucket histogram
pub struct OtsuThresholdSelector {
    params: OtsuParams,
}

impl OtsuThresholdSelector {
    pub fn new(params: OtsuParams) -> Self {
        Self { params }
    }

    /// Between-class sum of squares for each split `k = 1..=N`.
    ///
    /// Split `k` puts buckets `0..k` in the lower class. Entry `k - 1` is
    /// `None` when either class is empty, which always holds for `k = N`.
    pub fn between_class_variance(histogram: &Histogram) -> Vec<Option<f64>> {
        let counts = &histogram.counts;
        let means = &histogram.bucket_means;
        let total: f64 = counts.iter().map(|&c| c as f64).sum();
        if total == 0.0 {
            return vec![None; counts.len()];
        }
        let sum: f64 = counts.iter().zip(means).map(|(&c, &m)| c as f64 * m).sum();
        let global_mean = sum / total;

        let mut scores = Vec::with_capacity(counts.len());
        let mut count_a = 0.0;
        let mut sum_a = 0.0;
        for (&c, &m) in counts.iter().zip(means) {
            count_a += c as f64;
            sum_a += c as f64 * m;
            let count_b = total - count_a;
            if count_a == 0.0 || count_b <= 0.0 {
                scores.push(None);
                continue;
            }
            let mean_a = sum_a / count_a;
            let mean_b = (sum - sum_a) / count_b;
            scores.push(Some(
                count_a * (mean_a - global_mean).powi(2) + count_b * (mean_b - global_mean).powi(2),
            ));
        }
        scores
    }

    /// Bucket mean of the split maximising between-class variance.
    ///
    /// Ties resolve to the larger bucket mean.
    pub fn select(&self, histogram: &Histogram) -> FloodResult<f64> {
        if histogram.counts.len() != histogram.bucket_means.len() {
            return Err(FloodError::DegenerateHistogram(format!(
                "{} bucket means for {} counts",
                histogram.bucket_means.len(),
                histogram.counts.len()
            )));
        }

        // Buckets from the reducer are already ascending; external ones may not be
        let mut order: Vec<usize> = (0..histogram.counts.len()).collect();
        order.sort_by(|&a, &b| histogram.bucket_means[a].total_cmp(&histogram.bucket_means[b]));
        let sorted = Histogram {
            bucket_means: order.iter().map(|&i| histogram.bucket_means[i]).collect(),
            counts: order.iter().map(|&i| histogram.counts[i]).collect(),
            ..histogram.clone()
        };

        let scores = Self::between_class_variance(&sorted);

        let mut best: Option<(usize, f64)> = None;
        for (k, score) in scores.iter().enumerate() {
            let score = match score {
                Some(s) if s.is_finite() => *s,
                _ => continue,
            };
            best = match best {
                None => Some((k, score)),
                Some((_, best_score)) => {
                    let tolerance = TIE_TOLERANCE * best_score.abs().max(score.abs());
                    // Later splits have larger bucket means
                    if score + tolerance >= best_score {
                        Some((k, score.max(best_score)))
                    } else {
                        best
                    }
                }
            };
        }

        match best {
            Some((k, score)) => {
                let threshold = sorted.bucket_means[k];
                log::debug!(
                    "Otsu split at bucket {} of {} (BSS {:.4})",
                    k,
                    sorted.counts.len(),
                    score
                );
                Ok(threshold)
            }
            None => Err(FloodError::DegenerateHistogram(format!(
                "{} histogram has {} populated bucket(s) and {} samples",
                histogram.band,
                histogram.populated_buckets(),
                histogram.total()
            ))),
        }
    }

    /// Otsu threshold, or the configured default when the histogram is
    /// missing, empty or degenerate
    pub fn select_or_fallback(&self, histogram: FloodResult<Histogram>) -> ThresholdDecision {
        let outcome = histogram.and_then(|h| {
            if h.is_empty() {
                Err(FloodError::DegenerateHistogram(format!("{} histogram is empty", h.band)))
            } else {
                self.select(&h)
            }
        });

        match outcome {
            Ok(value) => {
                log::info!("Otsu threshold: {:.3} dB", value);
                ThresholdDecision { value, source: ThresholdSource::Otsu }
            }
            Err(e) => {
                log::warn!(
                    "{}; falling back to default threshold {} dB",
                    e,
                    self.params.default_threshold
                );
                ThresholdDecision {
                    value: self.params.default_threshold,
                    source: ThresholdSource::Fallback { reason: e.to_string() },
                }
            }
        }
    }
}

impl Default for OtsuThresholdSelector {
    fn default() -> Self {
        Self::new(OtsuParams::default())
    }
}
