use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::BinaryClassifier;
use crate::dataset::{Dataset, Partition, Replicate};
use crate::error::{OrangeError, Result};
use crate::mars::{Mars, MarsConfig};
use crate::support_vector_machine::{SupportVectorMachine, SvmConfig};

/// A named classifier configuration as it appears in the results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Method {
    /// Swept over the cost grid, keeping the best test error.
    SupportVector {
        name: String,
        #[serde(flatten)]
        config: SvmConfig,
    },
    /// Fitted once per replicate.
    Mars {
        name: String,
        #[serde(flatten)]
        config: MarsConfig,
    },
}

impl Method {
    pub fn name(&self) -> &str {
        match self {
            Method::SupportVector { name, .. } | Method::Mars { name, .. } => name,
        }
    }
}

/// Mean and standard error of per-replicate test error rates.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEstimate {
    pub mean: f64,
    pub standard_error: f64,
    pub replicate_errors: Vec<f64>,
}

impl ErrorEstimate {
    /// Standard error is the population standard deviation divided by the
    /// square root of the replicate count.
    pub fn from_errors(replicate_errors: Vec<f64>) -> Result<Self> {
        if replicate_errors.is_empty() {
            return Err(OrangeError::EmptyInput);
        }

        let count = replicate_errors.len() as f64;
        let mean = replicate_errors.iter().sum::<f64>() / count;
        let variance = replicate_errors
            .iter()
            .map(|error| (error - mean).powi(2))
            .sum::<f64>()
            / count;

        Ok(Self {
            mean,
            standard_error: variance.sqrt() / count.sqrt(),
            replicate_errors,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSearchOutcome {
    pub best_error: f64,
    pub best_cost: f64,
}

/// `count` evenly spaced values from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (count - 1) as f64;
            (0..count)
                .map(|k| {
                    if k == count - 1 {
                        stop
                    } else {
                        start + k as f64 * step
                    }
                })
                .collect()
        }
    }
}

fn test_error<C: BinaryClassifier>(
    model: &mut C,
    train: &Partition,
    test: &Partition,
) -> Result<f64> {
    if train.n_features() != test.n_features() {
        return Err(OrangeError::FeatureMismatch {
            expected: train.n_features(),
            got: test.n_features(),
        });
    }

    model.fit(&train.to_matrix(), &train.to_label_vector())?;
    Ok(model.misclassification_rate(&test.to_matrix(), &test.to_label_vector()))
}

/// Fits one SVM per cost in `grid` and keeps the lowest test error. Ties go
/// to the earliest cost.
pub fn best_cost_over_grid(
    config: &SvmConfig,
    grid: &[f64],
    train: &Partition,
    test: &Partition,
) -> Result<GridSearchOutcome> {
    let mut best: Option<GridSearchOutcome> = None;

    for &cost in grid {
        let mut svm = SupportVectorMachine::new(*config, cost);
        let error = test_error(&mut svm, train, test)?;
        debug!(cost, error, "grid point");

        if best.map_or(true, |b| error < b.best_error) {
            best = Some(GridSearchOutcome {
                best_error: error,
                best_cost: cost,
            });
        }
    }

    best.ok_or_else(|| OrangeError::InvalidConfig("cost grid is empty".to_string()))
}

/// Test error of `method` on one replicate.
pub fn replicate_error(method: &Method, replicate: &Replicate, grid: &[f64]) -> Result<f64> {
    match method {
        Method::SupportVector { config, .. } => {
            let outcome = best_cost_over_grid(config, grid, &replicate.train, &replicate.test)?;
            debug!(
                replicate = replicate.id,
                error = outcome.best_error,
                cost = outcome.best_cost,
                "best cost"
            );
            Ok(outcome.best_error)
        }
        Method::Mars { config, .. } => {
            let mut mars = Mars::new(*config);
            let error = test_error(&mut mars, &replicate.train, &replicate.test)?;
            debug!(replicate = replicate.id, error, "MARS test error");
            Ok(error)
        }
    }
}

/// Runs `method` over replicates `0..replicates` of `dataset`.
pub fn estimate(
    dataset: &Dataset,
    method: &Method,
    replicates: usize,
    grid: &[f64],
) -> Result<ErrorEstimate> {
    let mut errors = Vec::with_capacity(replicates);
    for id in 0..replicates {
        let replicate = dataset.replicate(id)?;
        errors.push(replicate_error(method, &replicate, grid)?);
    }

    let estimate = ErrorEstimate::from_errors(errors)?;
    info!(
        method = method.name(),
        features = dataset.n_features(),
        mean = estimate.mean,
        standard_error = estimate.standard_error,
        "estimated test error"
    );

    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayes::BayesRule;
    use crate::simulation::{simulate, SimulationConfig};
    use crate::support_vector_machine::KernelType;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn small_dataset() -> Dataset {
        let config = SimulationConfig {
            replicates: 3,
            train_per_class: 20,
            test_per_class: 50,
            ..SimulationConfig::default()
        };
        simulate(&config, &BayesRule::default(), 0, 5).unwrap()
    }

    fn quadratic_svm() -> Method {
        Method::SupportVector {
            name: "SVM/poly 2".to_string(),
            config: SvmConfig {
                kernel: KernelType::Polynomial {
                    degree: 2,
                    gamma: crate::support_vector_machine::Gamma::Scale,
                    coef0: 0.0,
                },
                ..SvmConfig::default()
            },
        }
    }

    #[test]
    fn test_linspace_includes_endpoints() {
        let grid = linspace(0.01, 5.0, 20);

        assert_eq!(grid.len(), 20);
        assert_relative_eq!(grid[0], 0.01);
        assert_relative_eq!(grid[19], 5.0);
        assert_relative_eq!(grid[1] - grid[0], 4.99 / 19.0, epsilon = 1e-12);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
        assert!(linspace(1.0, 2.0, 0).is_empty());
    }

    #[test]
    fn test_standard_error_uses_population_deviation() {
        let estimate = ErrorEstimate::from_errors(vec![0.1, 0.3]).unwrap();

        assert_relative_eq!(estimate.mean, 0.2);
        assert_relative_eq!(estimate.standard_error, 0.1 / 2.0_f64.sqrt());
        assert!(ErrorEstimate::from_errors(Vec::new()).is_err());
    }

    #[test]
    fn test_grid_minimum_beats_every_single_cost() {
        let dataset = small_dataset();
        let replicate = dataset.replicate(0).unwrap();
        let Method::SupportVector { config, .. } = quadratic_svm() else {
            unreachable!()
        };
        let grid = linspace(0.01, 5.0, 5);

        let outcome =
            best_cost_over_grid(&config, &grid, &replicate.train, &replicate.test).unwrap();
        assert!(grid.contains(&outcome.best_cost));

        for &cost in &grid {
            let single =
                best_cost_over_grid(&config, &[cost], &replicate.train, &replicate.test).unwrap();
            assert!(outcome.best_error <= single.best_error);
        }
    }

    #[test]
    fn test_empty_grid_is_an_error() {
        let dataset = small_dataset();
        let replicate = dataset.replicate(0).unwrap();

        assert!(best_cost_over_grid(
            &SvmConfig::default(),
            &[],
            &replicate.train,
            &replicate.test
        )
        .is_err());
    }

    #[test]
    fn test_estimate_is_bounded_and_repeatable() {
        let dataset = small_dataset();
        let grid = linspace(0.01, 5.0, 3);
        let mars = Method::Mars {
            name: "MARS".to_string(),
            config: MarsConfig::default(),
        };

        for method in [quadratic_svm(), mars] {
            let first = estimate(&dataset, &method, 3, &grid).unwrap();
            let second = estimate(&dataset, &method, 3, &grid).unwrap();

            assert_eq!(first, second);
            assert_eq!(first.replicate_errors.len(), 3);
            assert!((0.0..=1.0).contains(&first.mean));
            assert!(first.standard_error >= 0.0);
            assert!(first.standard_error <= 1.0 / 3.0_f64.sqrt());
        }
    }

    #[test]
    fn test_missing_replicate_is_reported() {
        let dataset = small_dataset();

        assert!(matches!(
            estimate(&dataset, &quadratic_svm(), 4, &[1.0]),
            Err(OrangeError::EmptyPartition { replicate: 3, .. })
        ));
    }

    #[test]
    fn test_method_from_toml() {
        #[derive(Deserialize)]
        struct Methods {
            methods: Vec<Method>,
        }

        let parsed: Methods = toml::from_str(
            r#"
            [[methods]]
            kind = "support_vector"
            name = "SVM/poly 5"
            kernel = { type = "polynomial", degree = 5 }

            [[methods]]
            kind = "mars"
            name = "MARS"
            max_terms = 11
            "#,
        )
        .unwrap();

        assert_eq!(parsed.methods[0].name(), "SVM/poly 5");
        assert!(matches!(
            parsed.methods[0],
            Method::SupportVector {
                config: SvmConfig {
                    kernel: KernelType::Polynomial { degree: 5, .. },
                    ..
                },
                ..
            }
        ));
        assert!(matches!(
            parsed.methods[1],
            Method::Mars {
                config: MarsConfig { max_terms: 11, max_degree: 2, .. },
                ..
            }
        ));
    }

    proptest! {
        #[test]
        fn prop_estimate_bounds(errors in prop::collection::vec(0.0f64..=1.0, 1..80)) {
            let count = errors.len() as f64;
            let estimate = ErrorEstimate::from_errors(errors).unwrap();

            prop_assert!(estimate.mean >= 0.0 && estimate.mean <= 1.0 + 1e-12);
            prop_assert!(estimate.standard_error >= 0.0);
            prop_assert!(estimate.standard_error <= 0.5 / count.sqrt() + 1e-12);
        }
    }
}
