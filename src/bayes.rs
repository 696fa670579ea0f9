use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{DatasetPair, Partition};
use crate::error::{OrangeError, Result};

/// The known decision rule of the simulation: a point belongs to the shell
/// class exactly when its squared norm over the informative features lies in
/// `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesRule {
    pub low: f64,
    pub high: f64,
    pub shell_label: f64,
    pub informative_features: usize,
}

impl Default for BayesRule {
    fn default() -> Self {
        Self {
            low: 9.0,
            high: 16.0,
            shell_label: 1.0,
            informative_features: 4,
        }
    }
}

impl BayesRule {
    pub fn validate(&self) -> Result<()> {
        if self.low.is_nan() || self.high.is_nan() || self.low > self.high {
            return Err(OrangeError::InvalidConfig(format!(
                "Bayes interval [{}, {}] is empty",
                self.low, self.high
            )));
        }
        #[allow(clippy::float_cmp)]
        if self.shell_label.abs() != 1.0 {
            return Err(OrangeError::InvalidLabel(self.shell_label));
        }
        if self.informative_features == 0 {
            return Err(OrangeError::InvalidConfig(
                "at least one informative feature is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn classify(&self, squared_norm: f64) -> f64 {
        if (self.low..=self.high).contains(&squared_norm) {
            self.shell_label
        } else {
            -self.shell_label
        }
    }

    /// Misclassification rate of the rule on `records`, using only their
    /// leading informative features.
    pub fn error_rate(&self, records: &Partition) -> Result<f64> {
        if records.n_features() < self.informative_features {
            return Err(OrangeError::FeatureMismatch {
                expected: self.informative_features,
                got: records.n_features(),
            });
        }
        if records.is_empty() {
            return Err(OrangeError::EmptyInput);
        }

        let mut wrong_predictions = 0;
        for (row, &label) in records.features.rows().into_iter().zip(&records.labels) {
            let squared_norm: f64 = row
                .iter()
                .take(self.informative_features)
                .map(|x| x * x)
                .sum();

            #[allow(clippy::float_cmp)]
            if self.classify(squared_norm) != label {
                wrong_predictions += 1;
            }
        }

        Ok(wrong_predictions as f64 / records.len() as f64)
    }

    /// Single Bayes error for both variants, computed on the pooled test
    /// records restricted to the informative features. Added noise columns
    /// do not change it, so it is reported under both columns.
    pub fn pooled_error_rate(&self, datasets: &DatasetPair) -> Result<f64> {
        let no_noise = datasets
            .no_noise
            .with_leading_features(self.informative_features)?;
        let six_noise = datasets
            .six_noise
            .with_leading_features(self.informative_features)?;
        let pooled = no_noise.concat(&six_noise)?;

        let error = self.error_rate(&pooled.test_records())?;
        info!(bayes_error = error, "computed Bayes error rate");

        Ok(error)
    }
}
