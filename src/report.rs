use std::fmt;

use crate::estimator::ErrorEstimate;

/// Minimum width of the method column; longer names widen it.
const NAME_WIDTH: usize = 22;
const COLUMN_WIDTH: usize = 22;
const COLUMN_GAP: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub name: String,
    pub no_noise: ErrorEstimate,
    pub six_noise: ErrorEstimate,
}

/// Mean test error (standard error) per method for both dataset variants,
/// followed by the Bayes error.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTable {
    pub rows: Vec<ReportRow>,
    pub bayes_error: f64,
}

fn cell(estimate: &ErrorEstimate) -> String {
    format!("{:.3} ({:.3})", estimate.mean, estimate.standard_error)
}

impl ResultsTable {
    fn name_width(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.name.chars().count() + COLUMN_GAP)
            .fold(NAME_WIDTH, usize::max)
    }
}

impl fmt::Display for ResultsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_width = self.name_width();

        writeln!(
            f,
            "{:<name$}{:<column$}{}",
            "Method",
            "No Noise Features",
            "Six Noise Features",
            name = name_width,
            column = COLUMN_WIDTH
        )?;
        writeln!(f, "{}", "-".repeat(name_width + 2 * COLUMN_WIDTH))?;

        for row in &self.rows {
            writeln!(
                f,
                "{:<name$}{:<column$}{}",
                row.name,
                cell(&row.no_noise),
                cell(&row.six_noise),
                name = name_width,
                column = COLUMN_WIDTH
            )?;
        }

        writeln!(
            f,
            "{:<name$}{:<column$}{:.3}",
            "Bayes",
            format!("{:.3}", self.bayes_error),
            self.bayes_error,
            name = name_width,
            column = COLUMN_WIDTH
        )
    }
}
