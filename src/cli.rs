use clap::Parser;
use std::path::PathBuf;

use crate::optim::optimizer::{ConvergencePolicy, OptimizerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON optimization request (nutrition facts, recipe, meal parameters)
    #[arg(short, long)]
    pub request: PathBuf,

    /// Where to write the JSON report; printed to stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Return best-effort masses even if the calorie/mass targets are missed
    #[arg(long)]
    pub lenient: bool,

    /// Override the solver's outer iteration limit
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Log every solver iteration
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the environment configuration.
    pub fn apply_overrides(&self, config: &mut OptimizerConfig) {
        if self.lenient {
            config.convergence_policy = ConvergencePolicy::Lenient;
        }
        if let Some(max) = self.max_iterations {
            config.max_outer_iterations = max;
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
