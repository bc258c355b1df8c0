//! Per-feature standardization (zero mean, unit variance).

use serde::{Deserialize, Serialize};

use crate::features::{FeatureVector, FEATURE_COUNT};

// ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

impl StandardScaler {
    // ---
    /// Fit on a non-empty batch. Constant features get a scale of `1`.
    pub(crate) fn fit(features: &[FeatureVector]) -> Self {
        // ---
        let n = features.len().max(1) as f64;
        let mut mean = [0.0; FEATURE_COUNT];
        let mut scale = [0.0; FEATURE_COUNT];

        for fv in features {
            for (m, x) in mean.iter_mut().zip(fv.as_array()) {
                *m += x;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        for fv in features {
            for ((s, m), x) in scale.iter_mut().zip(&mean).zip(fv.as_array()) {
                *s += (x - m).powi(2);
            }
        }
        for s in scale.iter_mut() {
            let std = (*s / n).sqrt();
            *s = if std > f64::EPSILON { std } else { 1.0 };
        }

        Self { mean, scale }
    }

    pub(crate) fn transform(&self, features: &[FeatureVector]) -> Vec<[f64; FEATURE_COUNT]> {
        // ---
        features
            .iter()
            .map(|fv| {
                let mut out = [0.0; FEATURE_COUNT];
                for (i, x) in fv.as_array().iter().enumerate() {
                    out[i] = (x - self.mean[i]) / self.scale[i];
                }
                out
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_standardizes_each_feature() {
        // ---
        let batch = vec![
            FeatureVector([1.0, 10.0, 5.0]),
            FeatureVector([3.0, 30.0, 5.0]),
        ];
        let scaler = StandardScaler::fit(&batch);
        let scaled = scaler.transform(&batch);

        assert_eq!(scaled[0], [-1.0, -1.0, 0.0]);
        assert_eq!(scaled[1], [1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_constant_feature_keeps_unit_scale() {
        // ---
        let batch = vec![FeatureVector([2.0, 2.0, 2.0]); 4];
        let scaler = StandardScaler::fit(&batch);

        assert_eq!(scaler.scale, [1.0; FEATURE_COUNT]);
        assert_eq!(
            scaler.transform(&[FeatureVector([3.0, 1.0, 2.0])])[0],
            [1.0, -1.0, 0.0]
        );
    }
}
