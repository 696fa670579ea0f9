use tracing::info;

use crate::config::ExperimentConfig;
use crate::dataset::DatasetPair;
use crate::error::Result;
use crate::estimator::estimate;
use crate::report::{ReportRow, ResultsTable};

/// Runs every configured method over both dataset variants. Rows follow the
/// order of `config.methods`.
pub fn run(datasets: &DatasetPair, config: &ExperimentConfig) -> Result<ResultsTable> {
    config.validate()?;

    let bayes_error = config.bayes.pooled_error_rate(datasets)?;
    let grid = config.cost_grid.values();

    let mut rows = Vec::with_capacity(config.methods.len());
    for method in &config.methods {
        info!(method = method.name(), "running method");

        rows.push(ReportRow {
            name: method.name().to_string(),
            no_noise: estimate(&datasets.no_noise, method, config.replicates, &grid)?,
            six_noise: estimate(&datasets.six_noise, method, config.replicates, &grid)?,
        });
    }

    Ok(ResultsTable { rows, bayes_error })
}
