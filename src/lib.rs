pub mod bayes;
pub mod chart;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod error;
pub mod estimator;
pub mod experiment;
pub mod mars;
pub mod report;
pub mod simulation;
pub mod support_vector_machine;

pub use error::{OrangeError, Result};
