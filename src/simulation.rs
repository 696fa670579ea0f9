use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bayes::BayesRule;
use crate::dataset::{Dataset, DatasetPair, Split};
use crate::error::{OrangeError, Result};

/// Draws allowed per shell point before giving up on the interval.
const MAX_REJECTIONS: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub replicates: usize,
    pub train_per_class: usize,
    pub test_per_class: usize,
    pub noise_features: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            replicates: 50,
            train_per_class: 50,
            test_per_class: 500,
            noise_features: 6,
            seed: 12,
        }
    }
}

struct Generator<'a> {
    rng: StdRng,
    rule: &'a BayesRule,
}

impl Generator<'_> {
    fn normals(&mut self, count: usize) -> Vec<f64> {
        (0..count).map(|_| self.rng.sample(StandardNormal)).collect()
    }

    fn core_point(&mut self) -> Vec<f64> {
        self.normals(self.rule.informative_features)
    }

    /// Standard normal point conditioned on the squared norm falling inside
    /// the rule's interval.
    fn shell_point(&mut self) -> Result<Vec<f64>> {
        for _ in 0..MAX_REJECTIONS {
            let point = self.normals(self.rule.informative_features);
            let squared_norm: f64 = point.iter().map(|x| x * x).sum();
            if (self.rule.low..=self.rule.high).contains(&squared_norm) {
                return Ok(point);
            }
        }

        Err(OrangeError::InvalidConfig(format!(
            "no shell point in [{}, {}] after {MAX_REJECTIONS} draws",
            self.rule.low, self.rule.high
        )))
    }
}

/// Simulate `config.replicates` independent train/test samples of the
/// two-class problem with `noise_features` pure-noise columns appended.
pub fn simulate(
    config: &SimulationConfig,
    rule: &BayesRule,
    noise_features: usize,
    seed: u64,
) -> Result<Dataset> {
    rule.validate()?;

    let mut generator = Generator {
        rng: StdRng::seed_from_u64(seed),
        rule,
    };
    let width = rule.informative_features + noise_features;

    let mut replicate_ids = Vec::new();
    let mut splits = Vec::new();
    let mut labels = Vec::new();
    let mut values = Vec::new();

    for replicate in 0..config.replicates {
        for (split, per_class) in [
            (Split::Train, config.train_per_class),
            (Split::Test, config.test_per_class),
        ] {
            for label in [-rule.shell_label, rule.shell_label] {
                for _ in 0..per_class {
                    #[allow(clippy::float_cmp)]
                    let point = if label == rule.shell_label {
                        generator.shell_point()?
                    } else {
                        generator.core_point()
                    };

                    values.extend(point);
                    values.extend(generator.normals(noise_features));
                    replicate_ids.push(replicate);
                    splits.push(split);
                    labels.push(label);
                }
            }
        }
    }

    let features = Array2::from_shape_vec((labels.len(), width), values)
        .map_err(|e| OrangeError::InvalidConfig(e.to_string()))?;

    Dataset::new(replicate_ids, splits, Array1::from(labels), features)
}

/// Both benchmark variants; the noisy one is drawn from its own stream.
pub fn simulate_pair(config: &SimulationConfig, rule: &BayesRule) -> Result<DatasetPair> {
    let no_noise = simulate(config, rule, 0, config.seed)?;
    let six_noise = simulate(
        config,
        rule,
        config.noise_features,
        config.seed.wrapping_add(1),
    )?;

    info!(
        replicates = config.replicates,
        records = no_noise.len(),
        noise_features = config.noise_features,
        seed = config.seed,
        "simulated datasets"
    );

    Ok(DatasetPair {
        no_noise,
        six_noise,
    })
}
