use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::BinaryClassifier;
use crate::error::{OrangeError, Result};

/// Floor for the curvature of a two-variable subproblem.
const TAU: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gamma {
    /// `1 / (n_features * Var(X))` over the training matrix.
    #[default]
    Scale,
    /// `1 / n_features`.
    Auto,
    Value(f64),
}

impl Gamma {
    fn resolve(self, samples: &DMatrix<f64>) -> f64 {
        let n_features = samples.ncols().max(1) as f64;
        match self {
            Gamma::Value(gamma) => gamma,
            Gamma::Auto => 1.0 / n_features,
            Gamma::Scale => {
                let count = samples.len().max(1) as f64;
                let mean = samples.iter().sum::<f64>() / count;
                let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;

                if variance > 0.0 {
                    1.0 / (n_features * variance)
                } else {
                    1.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelType {
    Linear,
    Polynomial {
        degree: u32,
        #[serde(default)]
        gamma: Gamma,
        #[serde(default)]
        coef0: f64,
    },
    Rbf {
        #[serde(default)]
        gamma: Gamma,
    },
}

/// A kernel with its data-dependent gamma fixed.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Kernel {
    Linear,
    Polynomial { degree: i32, gamma: f64, coef0: f64 },
    Rbf { gamma: f64 },
}

impl Kernel {
    fn resolve(kernel_type: KernelType, samples: &DMatrix<f64>) -> Self {
        match kernel_type {
            KernelType::Linear => Kernel::Linear,
            KernelType::Polynomial {
                degree,
                gamma,
                coef0,
            } => Kernel::Polynomial {
                degree: i32::try_from(degree).unwrap_or(i32::MAX),
                gamma: gamma.resolve(samples),
                coef0,
            },
            KernelType::Rbf { gamma } => Kernel::Rbf {
                gamma: gamma.resolve(samples),
            },
        }
    }

    fn evaluate(&self, first_sample: &DVector<f64>, second_sample: &DVector<f64>) -> f64 {
        match *self {
            Kernel::Linear => first_sample.dot(second_sample),
            Kernel::Polynomial {
                degree,
                gamma,
                coef0,
            } => gamma.mul_add(first_sample.dot(second_sample), coef0).powi(degree),
            Kernel::Rbf { gamma } => (-gamma * (first_sample - second_sample).norm_squared()).exp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmConfig {
    pub kernel: KernelType,
    /// Stop once the maximal KKT violation drops below this.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SvmConfig {
    fn default() -> Self {
        Self {
            kernel: KernelType::Linear,
            tolerance: 1e-3,
            max_iterations: 100_000,
        }
    }
}

/// Diagnostics from one solver run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSummary {
    pub iterations: usize,
    pub converged: bool,
    pub support_vectors: usize,
    pub objective: f64,
}

/// Soft-margin kernel SVM trained with SMO and second-order working set
/// selection.
pub struct SupportVectorMachine {
    config: SvmConfig,
    regularization: f64,
    kernel: Option<Kernel>,
    bias: f64,
    weights: Option<DVector<f64>>,
    support_vectors: Vec<DVector<f64>>,
    support_coefficients: Vec<f64>,
}

impl SupportVectorMachine {
    pub fn new(config: SvmConfig, regularization: f64) -> Self {
        Self {
            config,
            regularization,
            kernel: None,
            bias: 0.0,
            weights: None,
            support_vectors: Vec::new(),
            support_coefficients: Vec::new(),
        }
    }

    pub fn support_vector_count(&self) -> usize {
        self.support_vectors.len()
    }

    #[allow(clippy::too_many_lines)]
    #[allow(clippy::many_single_char_names)]
    pub fn solve(
        &mut self,
        samples: &DMatrix<f64>,
        labels: &DVector<f64>,
    ) -> Result<SolverSummary> {
        let n = samples.nrows();
        if n == 0 {
            return Err(OrangeError::EmptyInput);
        }
        if labels.len() != n {
            return Err(OrangeError::LengthMismatch {
                what: "labels",
                expected: n,
                got: labels.len(),
            });
        }
        if !(self.regularization > 0.0 && self.regularization.is_finite()) {
            return Err(OrangeError::InvalidConfig(format!(
                "SVM cost must be positive and finite, got {}",
                self.regularization
            )));
        }

        let kernel = Kernel::resolve(self.config.kernel, samples);
        let rows: Vec<DVector<f64>> = (0..n).map(|i| samples.row(i).transpose()).collect();
        let gram = DMatrix::from_fn(n, n, |i, j| kernel.evaluate(&rows[i], &rows[j]));
        let y = labels.as_slice();
        let c = self.regularization;

        let mut alphas = vec![0.0; n];
        let mut gradient = vec![-1.0; n];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.config.max_iterations {
            let Some((i, j)) =
                select_working_set(&gram, y, &alphas, &gradient, c, self.config.tolerance)
            else {
                converged = true;
                break;
            };
            iterations += 1;

            let prev_alpha_i = alphas[i];
            let prev_alpha_j = alphas[j];

            let mut curvature = gram[(i, i)] + gram[(j, j)] - 2.0 * gram[(i, j)];
            if curvature <= 0.0 {
                curvature = TAU;
            }

            #[allow(clippy::float_cmp)]
            if y[i] != y[j] {
                let delta = (-gradient[i] - gradient[j]) / curvature;
                let diff = alphas[i] - alphas[j];
                alphas[i] += delta;
                alphas[j] += delta;

                if diff > 0.0 {
                    if alphas[j] < 0.0 {
                        alphas[j] = 0.0;
                        alphas[i] = diff;
                    }
                } else if alphas[i] < 0.0 {
                    alphas[i] = 0.0;
                    alphas[j] = -diff;
                }

                if diff > 0.0 {
                    if alphas[i] > c {
                        alphas[i] = c;
                        alphas[j] = c - diff;
                    }
                } else if alphas[j] > c {
                    alphas[j] = c;
                    alphas[i] = c + diff;
                }
            } else {
                let delta = (gradient[i] - gradient[j]) / curvature;
                let sum = alphas[i] + alphas[j];
                alphas[i] -= delta;
                alphas[j] += delta;

                if sum > c {
                    if alphas[i] > c {
                        alphas[i] = c;
                        alphas[j] = sum - c;
                    }
                } else if alphas[j] < 0.0 {
                    alphas[j] = 0.0;
                    alphas[i] = sum;
                }

                if sum > c {
                    if alphas[j] > c {
                        alphas[j] = c;
                        alphas[i] = sum - c;
                    }
                } else if alphas[i] < 0.0 {
                    alphas[i] = 0.0;
                    alphas[j] = sum;
                }
            }

            let delta_i = alphas[i] - prev_alpha_i;
            let delta_j = alphas[j] - prev_alpha_j;
            for t in 0..n {
                gradient[t] +=
                    y[t] * (y[i] * gram[(t, i)] * delta_i + y[j] * gram[(t, j)] * delta_j);
            }
        }

        if !converged {
            warn!(
                cost = c,
                iterations, "SMO reached the iteration cap before converging"
            );
        }

        let rho = compute_rho(y, &alphas, &gradient, c);
        let objective = alphas
            .iter()
            .zip(&gradient)
            .map(|(alpha, g)| alpha * (g - 1.0))
            .sum::<f64>()
            / 2.0;

        let support_indices: Vec<usize> = (0..n).filter(|&i| alphas[i] > 0.0).collect();

        self.kernel = Some(kernel);
        self.bias = -rho;
        self.support_coefficients = support_indices.iter().map(|&i| alphas[i] * y[i]).collect();
        self.support_vectors = support_indices.iter().map(|&i| rows[i].clone()).collect();

        self.weights = if let Kernel::Linear = kernel {
            let mut weights = DVector::zeros(samples.ncols());
            for (coefficient, vector) in self.support_coefficients.iter().zip(&self.support_vectors)
            {
                weights.axpy(*coefficient, vector, 1.0);
            }
            Some(weights)
        } else {
            None
        };

        let summary = SolverSummary {
            iterations,
            converged,
            support_vectors: support_indices.len(),
            objective,
        };
        debug!(
            cost = c,
            iterations,
            support_vectors = summary.support_vectors,
            objective = summary.objective,
            "SMO finished"
        );

        Ok(summary)
    }

    pub fn decision_function(&self, features: &DVector<f64>) -> f64 {
        if let Some(weights) = &self.weights {
            return weights.dot(features) + self.bias;
        }

        let Some(kernel) = self.kernel else {
            return self.bias;
        };

        self.support_coefficients
            .iter()
            .zip(&self.support_vectors)
            .map(|(coefficient, vector)| coefficient * kernel.evaluate(vector, features))
            .sum::<f64>()
            + self.bias
    }
}

impl BinaryClassifier for SupportVectorMachine {
    fn fit(&mut self, samples: &DMatrix<f64>, labels: &DVector<f64>) -> Result<()> {
        self.solve(samples, labels).map(|_| ())
    }

    fn predict(&self, features: &DVector<f64>) -> f64 {
        if self.decision_function(features) >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }
}

/// Picks the maximal violating index `i` and, among the candidates for `j`,
/// the one with the largest second-order decrease of the dual objective.
/// Returns `None` once the violation gap is below `tolerance`.
fn select_working_set(
    gram: &DMatrix<f64>,
    y: &[f64],
    alphas: &[f64],
    gradient: &[f64],
    c: f64,
    tolerance: f64,
) -> Option<(usize, usize)> {
    let n = y.len();

    let mut gmax = f64::NEG_INFINITY;
    let mut first = None;
    for t in 0..n {
        if y[t] > 0.0 {
            if alphas[t] < c && -gradient[t] >= gmax {
                gmax = -gradient[t];
                first = Some(t);
            }
        } else if alphas[t] > 0.0 && gradient[t] >= gmax {
            gmax = gradient[t];
            first = Some(t);
        }
    }
    let i = first?;

    let mut gmax2 = f64::NEG_INFINITY;
    let mut second = None;
    let mut best_decrease = f64::INFINITY;
    for t in 0..n {
        let grad_diff = if y[t] > 0.0 {
            if alphas[t] <= 0.0 {
                continue;
            }
            gmax2 = gmax2.max(gradient[t]);
            gmax + gradient[t]
        } else {
            if alphas[t] >= c {
                continue;
            }
            gmax2 = gmax2.max(-gradient[t]);
            gmax - gradient[t]
        };

        if grad_diff > 0.0 {
            let curvature = gram[(i, i)] + gram[(t, t)] - 2.0 * gram[(i, t)];
            let curvature = if curvature > 0.0 { curvature } else { TAU };
            let decrease = -(grad_diff * grad_diff) / curvature;

            if decrease <= best_decrease {
                best_decrease = decrease;
                second = Some(t);
            }
        }
    }

    if gmax + gmax2 < tolerance {
        return None;
    }

    second.map(|j| (i, j))
}

/// Offset of the decision function: the mean of `y_i * G_i` over free
/// multipliers, or the middle of the feasible range when none are free.
fn compute_rho(y: &[f64], alphas: &[f64], gradient: &[f64], c: f64) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_count = 0;
    let mut free_sum = 0.0;

    for t in 0..y.len() {
        let yg = y[t] * gradient[t];

        if alphas[t] >= c {
            if y[t] < 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else if alphas[t] <= 0.0 {
            if y[t] > 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else {
            free_count += 1;
            free_sum += yg;
        }
    }

    if free_count > 0 {
        free_sum / free_count as f64
    } else if upper.is_finite() && lower.is_finite() {
        (upper + lower) / 2.0
    } else if upper.is_finite() {
        upper
    } else if lower.is_finite() {
        lower
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn separable_blobs() -> (DMatrix<f64>, DVector<f64>) {
        let samples = DMatrix::from_row_slice(
            6,
            2,
            &[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 3.0, 3.0, 3.0, 4.0, 4.0, 3.0],
        );
        let labels = DVector::from_vec(vec![-1.0, -1.0, -1.0, 1.0, 1.0, 1.0]);
        (samples, labels)
    }

    fn rings() -> (DMatrix<f64>, DVector<f64>) {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for (radius, label) in [(1.0, -1.0), (3.0, 1.0)] {
            for k in 0..8 {
                let angle = f64::from(k) * std::f64::consts::FRAC_PI_4;
                values.push(radius * angle.cos());
                values.push(radius * angle.sin());
                labels.push(label);
            }
        }
        (
            DMatrix::from_row_slice(16, 2, &values),
            DVector::from_vec(labels),
        )
    }

    #[test]
    fn test_linear_kernel_separates_blobs() {
        let (samples, labels) = separable_blobs();
        let mut svm = SupportVectorMachine::new(SvmConfig::default(), 10.0);

        let summary = svm.solve(&samples, &labels).unwrap();
        assert!(summary.converged);
        assert!(summary.support_vectors >= 2);
        assert_eq!(svm.support_vector_count(), summary.support_vectors);
        assert!(summary.objective < 0.0);
        assert!(svm.misclassification_rate(&samples, &labels).abs() < f64::EPSILON);
        assert!(svm.predict(&DVector::from_vec(vec![-1.0, -1.0])) < 0.0);
        assert!(svm.predict(&DVector::from_vec(vec![5.0, 5.0])) > 0.0);
    }

    #[test]
    fn test_quadratic_kernel_separates_rings() {
        let (samples, labels) = rings();
        let config = SvmConfig {
            kernel: KernelType::Polynomial {
                degree: 2,
                gamma: Gamma::Value(1.0),
                coef0: 0.0,
            },
            ..SvmConfig::default()
        };
        let mut svm = SupportVectorMachine::new(config, 10.0);

        svm.fit(&samples, &labels).unwrap();
        assert!(svm.misclassification_rate(&samples, &labels).abs() < f64::EPSILON);
    }

    #[test]
    fn test_linear_kernel_cannot_separate_rings() {
        let (samples, labels) = rings();
        let mut svm = SupportVectorMachine::new(SvmConfig::default(), 1.0);

        svm.fit(&samples, &labels).unwrap();
        assert!(svm.misclassification_rate(&samples, &labels) >= 0.25);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (samples, labels) = rings();
        let config = SvmConfig {
            kernel: KernelType::Rbf {
                gamma: Gamma::Scale,
            },
            ..SvmConfig::default()
        };

        let mut first = SupportVectorMachine::new(config, 2.0);
        let mut second = SupportVectorMachine::new(config, 2.0);
        let first_summary = first.solve(&samples, &labels).unwrap();
        let second_summary = second.solve(&samples, &labels).unwrap();

        assert_eq!(first_summary, second_summary);
        let point = DVector::from_vec(vec![0.3, -2.2]);
        assert_relative_eq!(
            first.decision_function(&point),
            second.decision_function(&point)
        );
    }

    #[test]
    fn test_single_class_predicts_that_class() {
        let samples = DMatrix::from_row_slice(3, 1, &[0.0, 1.0, 2.0]);
        let labels = DVector::from_element(3, 1.0);
        let mut svm = SupportVectorMachine::new(SvmConfig::default(), 1.0);

        svm.fit(&samples, &labels).unwrap();
        assert!(svm.predict(&DVector::from_vec(vec![-10.0])) > 0.0);
    }

    #[test]
    fn test_rejects_non_positive_cost() {
        let (samples, labels) = separable_blobs();
        let mut svm = SupportVectorMachine::new(SvmConfig::default(), 0.0);

        assert!(matches!(
            svm.fit(&samples, &labels),
            Err(OrangeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_empty_input() {
        let mut svm = SupportVectorMachine::new(SvmConfig::default(), 1.0);

        assert!(matches!(
            svm.fit(&DMatrix::zeros(0, 2), &DVector::zeros(0)),
            Err(OrangeError::EmptyInput)
        ));
    }

    #[test]
    fn test_gamma_scale_uses_overall_variance() {
        let samples = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 2.0, 2.0]);

        assert_relative_eq!(Gamma::Scale.resolve(&samples), 0.5);
        assert_relative_eq!(Gamma::Auto.resolve(&samples), 0.5);
        assert_relative_eq!(Gamma::Value(3.0).resolve(&samples), 3.0);
        assert_relative_eq!(Gamma::Scale.resolve(&DMatrix::zeros(2, 2)), 1.0);
    }

    #[test]
    fn test_kernel_config_from_toml() {
        let config: SvmConfig = toml::from_str(
            r#"
            tolerance = 0.01

            [kernel]
            type = "polynomial"
            degree = 2
            "#,
        )
        .unwrap();

        assert_eq!(
            config.kernel,
            KernelType::Polynomial {
                degree: 2,
                gamma: Gamma::Scale,
                coef0: 0.0
            }
        );
        assert_relative_eq!(config.tolerance, 0.01);
        assert_eq!(config.max_iterations, 100_000);
    }
}
