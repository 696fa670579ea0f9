use approx::assert_abs_diff_eq;
use orange::{
    config::{CostGrid, ExperimentConfig},
    dataset::DatasetPair,
    experiment,
    report::ResultsTable,
    simulation::{simulate_pair, SimulationConfig},
};

fn config_with(replicates: usize, grid_points: usize) -> ExperimentConfig {
    ExperimentConfig {
        replicates,
        cost_grid: CostGrid {
            count: grid_points,
            ..CostGrid::default()
        },
        simulation: SimulationConfig {
            replicates,
            ..SimulationConfig::default()
        },
        ..ExperimentConfig::default()
    }
}

fn row<'a>(table: &'a ResultsTable, name: &str) -> &'a orange::report::ReportRow {
    table
        .rows
        .iter()
        .find(|row| row.name == name)
        .unwrap_or_else(|| panic!("missing row {name}"))
}

#[test]
fn test_simulated_benchmark_reproduces_textbook_ordering() {
    let config = config_with(10, 8);
    let datasets = simulate_pair(&config.simulation, &config.bayes).unwrap();
    assert_eq!(datasets.no_noise.n_features(), 4);
    assert_eq!(datasets.six_noise.n_features(), 10);

    let table = experiment::run(&datasets, &config).unwrap();
    println!("{table}");

    assert_eq!(table.rows.len(), 5);
    assert_abs_diff_eq!(table.bayes_error, 0.029, epsilon = 0.01);

    let linear = row(&table, "SV Classifier");
    assert!((0.3..=0.6).contains(&linear.no_noise.mean));
    assert!((0.3..=0.6).contains(&linear.six_noise.mean));

    let quadratic = row(&table, "SVM/poly 2");
    assert!(quadratic.no_noise.mean < 0.2);
    assert!(quadratic.no_noise.mean < linear.no_noise.mean);

    let mars = row(&table, "MARS");
    assert!(mars.no_noise.mean < 0.3);
    assert!(mars.no_noise.mean < linear.no_noise.mean);

    for row in &table.rows {
        for estimate in [&row.no_noise, &row.six_noise] {
            assert_eq!(estimate.replicate_errors.len(), 10);
            assert!(estimate.mean >= table.bayes_error - 0.05);
            assert!(estimate.standard_error <= 1.0 / 10.0_f64.sqrt());
        }
    }
}

#[test]
fn test_noise_does_not_help_the_quadratic_kernel() {
    let config = config_with(6, 6);
    let datasets = simulate_pair(&config.simulation, &config.bayes).unwrap();

    let table = experiment::run(&datasets, &config).unwrap();
    let quadratic = row(&table, "SVM/poly 2");

    assert!(quadratic.six_noise.mean + 0.02 >= quadratic.no_noise.mean);
}

#[test]
fn test_identical_inputs_give_identical_tables() {
    let config = config_with(3, 4);
    let datasets = simulate_pair(&config.simulation, &config.bayes).unwrap();

    let first = experiment::run(&datasets, &config).unwrap();
    let second = experiment::run(&datasets, &config).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn test_datasets_survive_a_round_trip() {
    let config = config_with(2, 3);
    let datasets = simulate_pair(&config.simulation, &config.bayes).unwrap();
    let expected = experiment::run(&datasets, &config).unwrap();
    let dir = tempfile::tempdir().unwrap();

    for path in [dir.path().join("tables"), dir.path().join("orange.npz")] {
        datasets.save(&path).unwrap();
        let loaded = DatasetPair::load(&path).unwrap();

        assert_eq!(loaded.no_noise.len(), datasets.no_noise.len());
        assert_eq!(loaded.six_noise.features(), datasets.six_noise.features());
        assert_eq!(experiment::run(&loaded, &config).unwrap(), expected);
    }
}

#[test]
fn test_too_few_replicates_in_data_is_an_error() {
    let datasets = simulate_pair(
        &SimulationConfig {
            replicates: 2,
            ..SimulationConfig::default()
        },
        &ExperimentConfig::default().bayes,
    )
    .unwrap();

    assert!(experiment::run(&datasets, &config_with(3, 2)).is_err());
}

/// Full textbook setup: 50 replicates and the 20-point cost grid. Slow in a
/// debug build; run with `cargo test --release -- --ignored`.
#[test]
#[ignore]
fn test_default_experiment_matches_textbook_table() {
    let config = ExperimentConfig::default();
    let datasets = simulate_pair(&config.simulation, &config.bayes).unwrap();

    let table = experiment::run(&datasets, &config).unwrap();
    println!("{table}");

    assert_abs_diff_eq!(table.bayes_error, 0.029, epsilon = 0.02);
    assert_abs_diff_eq!(
        row(&table, "SV Classifier").no_noise.mean,
        0.45,
        epsilon = 0.02
    );
    assert_abs_diff_eq!(row(&table, "SVM/poly 2").no_noise.mean, 0.075, epsilon = 0.02);
    assert_abs_diff_eq!(row(&table, "MARS").no_noise.mean, 0.144, epsilon = 0.02);

    for row in &table.rows {
        assert_eq!(row.no_noise.replicate_errors.len(), 50);
        assert_eq!(row.six_noise.replicate_errors.len(), 50);
    }
}
