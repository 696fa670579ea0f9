//! Experiment configuration, loaded from TOML with compiled defaults for
//! anything the file leaves out.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bayes::BayesRule;
use crate::error::{OrangeError, Result};
use crate::estimator::{linspace, Method};
use crate::mars::MarsConfig;
use crate::simulation::SimulationConfig;
use crate::support_vector_machine::{Gamma, KernelType, SvmConfig};

/// Evenly spaced SVM costs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostGrid {
    pub start: f64,
    pub stop: f64,
    pub count: usize,
}

impl Default for CostGrid {
    fn default() -> Self {
        Self {
            start: 0.01,
            stop: 5.0,
            count: 20,
        }
    }
}

impl CostGrid {
    pub fn values(&self) -> Vec<f64> {
        linspace(self.start, self.stop, self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub replicates: usize,
    pub cost_grid: CostGrid,
    pub bayes: BayesRule,
    pub simulation: SimulationConfig,
    pub methods: Vec<Method>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            replicates: 50,
            cost_grid: CostGrid::default(),
            bayes: BayesRule::default(),
            simulation: SimulationConfig::default(),
            methods: default_methods(),
        }
    }
}

/// Offset of the default polynomial rows. With zero offset the kernel
/// `(gamma <x, x'>)^d` is homogeneous: odd degrees give an odd decision
/// function, so the degree 5 row cannot fit a radial boundary. Set `coef0`
/// in a `[[methods]]` table for the inhomogeneous kernel.
pub const DEFAULT_POLYNOMIAL_COEF0: f64 = 0.0;

fn polynomial_svm(degree: u32) -> Method {
    Method::SupportVector {
        name: format!("SVM/poly {degree}"),
        config: SvmConfig {
            kernel: KernelType::Polynomial {
                degree,
                gamma: Gamma::Scale,
                coef0: DEFAULT_POLYNOMIAL_COEF0,
            },
            ..SvmConfig::default()
        },
    }
}

/// The rows of the textbook comparison.
pub fn default_methods() -> Vec<Method> {
    vec![
        Method::SupportVector {
            name: "SV Classifier".to_string(),
            config: SvmConfig::default(),
        },
        polynomial_svm(2),
        polynomial_svm(5),
        polynomial_svm(10),
        Method::Mars {
            name: "MARS".to_string(),
            config: MarsConfig::default(),
        },
    ]
}

impl ExperimentConfig {
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| OrangeError::ConfigParse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.replicates == 0 {
            return Err(OrangeError::InvalidConfig(
                "replicates must be at least 1".to_string(),
            ));
        }
        if self.cost_grid.count == 0 {
            return Err(OrangeError::InvalidConfig("cost grid is empty".to_string()));
        }
        let positive = |cost: f64| cost > 0.0 && cost.is_finite();
        if !positive(self.cost_grid.start) || !positive(self.cost_grid.stop) {
            return Err(OrangeError::InvalidConfig(format!(
                "cost grid [{}, {}] must be positive",
                self.cost_grid.start, self.cost_grid.stop
            )));
        }
        if self.methods.is_empty() {
            return Err(OrangeError::InvalidConfig("no methods configured".to_string()));
        }
        self.bayes.validate()
    }
}
