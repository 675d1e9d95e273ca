use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::error::RecipeError;
use crate::nutritional_matcher::NutritionTable;
use crate::optim::optimizer::{optimize_recipe, OptimizationResult, OptimizerConfig};
use crate::optim::targets::MealParams;
use crate::recipe::{IngredientFact, RecipeLine};
use crate::recipe_aggregator::{calculate_recipe_statistics, RecipeStatistics};

/// Everything one optimization run needs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OptimizationRequest {
    pub nutrition: Vec<IngredientFact>,
    pub recipe: Vec<RecipeLine>,
    pub meal: MealParams,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct OptimizationReport {
    pub before: RecipeStatistics,
    pub after: RecipeStatistics,
    /// Recipe lines carrying the optimized masses.
    pub recipe: Vec<RecipeLine>,
    pub result: OptimizationResult,
}

pub async fn read_request(path: &Path) -> Result<OptimizationRequest> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read request file '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request file '{}'", path.display()))
}

/// Writes the report as pretty JSON to `path`, or to stdout without one.
pub async fn write_report(report: &OptimizationReport, path: Option<&Path>) -> Result<()> {
    let rendered = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    match path {
        Some(path) => fs::write(path, rendered)
            .await
            .with_context(|| format!("Failed to write report to '{}'", path.display())),
        None => {
            println!("{}", rendered);
            Ok(())
        }
    }
}

/// Resolves the request's recipe, optimizes it and collects before/after statistics.
pub fn run_request(
    request: &OptimizationRequest,
    config: &OptimizerConfig,
    progress_updater: impl Fn(String),
) -> std::result::Result<OptimizationReport, RecipeError> {
    let table = NutritionTable::new(request.nutrition.clone())?;
    let recipe = table.resolve(&request.recipe)?;
    let target = request.meal.to_target()?;

    let before = calculate_recipe_statistics(&recipe);
    let result = optimize_recipe(&recipe, &target, config, progress_updater)?;
    let optimized = recipe.with_masses(&result.clamped_masses())?;

    Ok(OptimizationReport {
        before,
        after: calculate_recipe_statistics(&optimized),
        recipe: optimized.recipe_lines(),
        result,
    })
}
