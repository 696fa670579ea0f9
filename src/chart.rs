use plotters::prelude::*;
use std::path::Path;

use crate::error::{OrangeError, Result};
use crate::report::ResultsTable;

/// Horizontal offset of the two variants around each method's slot.
const VARIANT_OFFSET: f64 = 0.15;

fn chart_error<E: std::fmt::Display>(error: E) -> OrangeError {
    OrangeError::Chart(error.to_string())
}

/// Renders mean test error with one-standard-error bars for both variants,
/// plus the Bayes error as a reference line, to an SVG file.
pub fn render(table: &ResultsTable, path: &Path) -> Result<()> {
    let slots = table.rows.len().max(1) as f64;
    let y_max = table
        .rows
        .iter()
        .flat_map(|row| {
            [
                row.no_noise.mean + row.no_noise.standard_error,
                row.six_noise.mean + row.six_noise.standard_error,
            ]
        })
        .fold(table.bayes_error, f64::max)
        .mul_add(1.1, 0.01)
        .min(1.0);

    let root = SVGBackend::new(path, (900, 520)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Skin of the orange: test error", ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(-0.5f64..(slots - 0.5), 0.0f64..y_max)
        .map_err(chart_error)?;

    let names: Vec<String> = table.rows.iter().map(|row| row.name.clone()).collect();
    let label_for = |x: &f64| -> String {
        let slot = x.round();
        if (x - slot).abs() > 1e-6 || slot < 0.0 {
            return String::new();
        }
        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        let index = slot as usize;
        names.get(index).cloned().unwrap_or_default()
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(table.rows.len().max(1))
        .x_label_formatter(&label_for)
        .y_desc("Mean test error")
        .draw()
        .map_err(chart_error)?;

    for (offset, color, variant) in [
        (-VARIANT_OFFSET, BLUE, "No noise features"),
        (VARIANT_OFFSET, RED, "Six noise features"),
    ] {
        chart
            .draw_series(table.rows.iter().enumerate().map(|(slot, row)| {
                let estimate = if offset < 0.0 {
                    &row.no_noise
                } else {
                    &row.six_noise
                };
                ErrorBar::new_vertical(
                    slot as f64 + offset,
                    (estimate.mean - estimate.standard_error).max(0.0),
                    estimate.mean,
                    estimate.mean + estimate.standard_error,
                    color.filled(),
                    8,
                )
            }))
            .map_err(chart_error)?
            .label(variant)
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    chart
        .draw_series(LineSeries::new(
            [(-0.5, table.bayes_error), (slots - 0.5, table.bayes_error)],
            BLACK.stroke_width(1),
        ))
        .map_err(chart_error)?
        .label("Bayes error")
        .legend(|(x, y)| PathElement::new(vec![(x - 8, y), (x + 8, y)], &BLACK));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(chart_error)?;

    root.present().map_err(chart_error)?;
    Ok(())
}
