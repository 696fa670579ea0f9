use orange::{
    chart,
    config::ExperimentConfig,
    dataset::DatasetPair,
    experiment,
    simulation::simulate_pair,
    OrangeError,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: orange [--config <file.toml>] [--data <file.npz|dir>] [--seed <n>] \
[--replicates <n>] [--write-data <file.npz|dir>] [--chart <file.svg>]";

const FLAGS: [&str; 6] = [
    "--config",
    "--data",
    "--seed",
    "--replicates",
    "--write-data",
    "--chart",
];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

fn parse_number_arg<T: std::str::FromStr>(
    args: &[String],
    flag: &str,
) -> Result<Option<T>, OrangeError> {
    parse_string_arg(args, flag)
        .map(|value| {
            value.parse::<T>().map_err(|_| {
                OrangeError::InvalidConfig(format!("{flag} expects a number, got {value:?}"))
            })
        })
        .transpose()
}

fn check_args(args: &[String]) -> Result<(), OrangeError> {
    let mut rest = args.iter();
    while let Some(arg) = rest.next() {
        if !FLAGS.contains(&arg.as_str()) {
            return Err(OrangeError::InvalidConfig(format!(
                "unknown argument {arg:?}\n{USAGE}"
            )));
        }
        if rest.next().is_none() {
            return Err(OrangeError::InvalidConfig(format!(
                "{arg} needs a value\n{USAGE}"
            )));
        }
    }

    Ok(())
}

fn load_config(args: &[String]) -> Result<ExperimentConfig, OrangeError> {
    let mut config = match parse_string_arg(args, "--config") {
        Some(path) => ExperimentConfig::load(Path::new(&path))?,
        None => ExperimentConfig::default(),
    };

    if let Some(seed) = parse_number_arg::<u64>(args, "--seed")? {
        config.simulation.seed = seed;
    }
    if let Some(replicates) = parse_number_arg::<usize>(args, "--replicates")? {
        config.replicates = replicates;
        config.simulation.replicates = replicates;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{USAGE}");
        return Ok(());
    }
    check_args(&args)?;

    let config = load_config(&args)?;

    let datasets = match parse_string_arg(&args, "--data") {
        Some(path) => {
            info!(path = %path, "loading datasets");
            DatasetPair::load(Path::new(&path))?
        }
        None => simulate_pair(&config.simulation, &config.bayes)?,
    };

    if let Some(path) = parse_string_arg(&args, "--write-data") {
        datasets.save(Path::new(&path))?;
        info!(path = %path, "wrote datasets");
    }

    let table = experiment::run(&datasets, &config)?;
    print!("{table}");

    if let Some(path) = parse_string_arg(&args, "--chart").map(PathBuf::from) {
        chart::render(&table, &path)?;
        info!(path = %path.display(), "rendered chart");
    }

    Ok(())
}
