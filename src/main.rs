use anyhow::{Context, Result};
use macro_recipe_optim::cli::parse_args;
use macro_recipe_optim::optim::optimizer::OptimizerConfig;
use macro_recipe_optim::request::{read_request, run_request, write_report};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok(); // Optimizer settings may live in .env

    let cli_args = parse_args();

    let default_level = if cli_args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = OptimizerConfig::from_env().context("Invalid optimizer configuration")?;
    cli_args.apply_overrides(&mut config);
    debug!(?config, "Optimizer configuration");

    info!("Reading optimization request from {}", cli_args.request.display());
    let request = read_request(&cli_args.request).await?;
    info!(
        "Request has {} nutrition facts and {} recipe lines",
        request.nutrition.len(),
        request.recipe.len()
    );

    let report = run_request(&request, &config, |message| debug!("{}", message))
        .with_context(|| format!("Failed to optimize recipe from '{}'", cli_args.request.display()))?;

    info!(
        status = ?report.result.status,
        kcal = report.after.totals.kcal,
        mass_g = report.after.totals.mass_g,
        "Optimization finished"
    );

    write_report(&report, cli_args.output.as_deref()).await?;
    Ok(())
}
