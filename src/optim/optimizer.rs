use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RecipeError, Result};
use crate::optim::macros::MacroRatio;
use crate::optim::nutri_eval::RecipeModel;
use crate::optim::solver::{minimize, NonlinearProgram, SolverSettings, SolverStatus};
use crate::optim::targets::OptimizationTarget;
use crate::recipe::ResolvedRecipe;

pub const MAX_OUTER_ITERATIONS_ENV: &str = "RECIPE_OPTIM_MAX_OUTER_ITERATIONS";
pub const MAX_INNER_ITERATIONS_ENV: &str = "RECIPE_OPTIM_MAX_INNER_ITERATIONS";
pub const CONSTRAINT_TOLERANCE_ENV: &str = "RECIPE_OPTIM_CONSTRAINT_TOLERANCE";
pub const OPTIMALITY_TOLERANCE_ENV: &str = "RECIPE_OPTIM_OPTIMALITY_TOLERANCE";
pub const TIME_LIMIT_MS_ENV: &str = "RECIPE_OPTIM_TIME_LIMIT_MS";
pub const CONVERGENCE_POLICY_ENV: &str = "RECIPE_OPTIM_CONVERGENCE_POLICY";

/// What to do when the solver stops without meeting the constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergencePolicy {
    /// Fail with [`RecipeError::Convergence`].
    #[default]
    Strict,
    /// Return the masses anyway; the result carries the residuals.
    Lenient,
}

impl FromStr for ConvergencePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown convergence policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub max_outer_iterations: usize,
    pub max_inner_iterations: usize,
    /// Relative tolerance on the calorie and mass constraints.
    pub constraint_tolerance: f64,
    pub optimality_tolerance: f64,
    pub time_limit: Option<Duration>,
    pub convergence_policy: ConvergencePolicy,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let solver = SolverSettings::default();
        Self {
            max_outer_iterations: solver.max_outer_iterations,
            max_inner_iterations: solver.max_inner_iterations,
            constraint_tolerance: solver.constraint_tolerance,
            optimality_tolerance: solver.optimality_tolerance,
            time_limit: None,
            convergence_policy: ConvergencePolicy::default(),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RecipeError::Config(format!("{}='{}': {}", key, raw, e))),
        _ => Ok(None),
    }
}

impl OptimizerConfig {
    /// Reads overrides from `RECIPE_OPTIM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`OptimizerConfig::from_env`] but reads values through `lookup`.
    /// Missing or blank keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, MAX_OUTER_ITERATIONS_ENV)? {
            config.max_outer_iterations = v;
        }
        if let Some(v) = parse_var(&lookup, MAX_INNER_ITERATIONS_ENV)? {
            config.max_inner_iterations = v;
        }
        if let Some(v) = parse_var(&lookup, CONSTRAINT_TOLERANCE_ENV)? {
            config.constraint_tolerance = v;
        }
        if let Some(v) = parse_var(&lookup, OPTIMALITY_TOLERANCE_ENV)? {
            config.optimality_tolerance = v;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, TIME_LIMIT_MS_ENV)? {
            config.time_limit = Some(Duration::from_millis(ms));
        }
        if let Some(v) = parse_var(&lookup, CONVERGENCE_POLICY_ENV)? {
            config.convergence_policy = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_outer_iterations == 0 || self.max_inner_iterations == 0 {
            return Err(RecipeError::Config(
                "iteration limits must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("constraint tolerance", self.constraint_tolerance),
            ("optimality tolerance", self.optimality_tolerance),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(RecipeError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            max_outer_iterations: self.max_outer_iterations,
            max_inner_iterations: self.max_inner_iterations,
            constraint_tolerance: self.constraint_tolerance,
            optimality_tolerance: self.optimality_tolerance,
            time_limit: self.time_limit,
            ..SolverSettings::default()
        }
    }
}

/// Optimized masses, aligned with the recipe they were computed for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub masses: Vec<f64>,
    pub status: SolverStatus,
    pub objective: f64,
    /// Calories of the result minus the target calories.
    pub calorie_error: f64,
    /// Mass of the result minus the target mass; 0 without a mass target.
    pub mass_error: f64,
    /// Largest relative constraint residual.
    pub constraint_violation: f64,
    pub iterations: usize,
}

impl OptimizationResult {
    /// Masses with solver noise below zero clamped away.
    pub fn clamped_masses(&self) -> Vec<f64> {
        self.masses.iter().map(|m| m.max(0.0)).collect()
    }
}

/// Adapts [`RecipeModel`] to the solver. Constraints are divided by their
/// targets so the solver sees relative residuals.
struct RecipeProgram<'a> {
    model: &'a RecipeModel,
}

impl NonlinearProgram for RecipeProgram<'_> {
    fn dimension(&self) -> usize {
        self.model.len()
    }

    fn objective(&self, x: &[f64]) -> f64 {
        self.model.objective(x)
    }

    fn objective_gradient(&self, x: &[f64]) -> Vec<f64> {
        self.model.objective_gradient(x)
    }

    fn equality_constraints(&self, x: &[f64]) -> Vec<f64> {
        let target = self.model.target();
        let mut residuals = vec![self.model.calorie_constraint(x) / target.calories()];
        if let Some(mass) = target.total_mass() {
            residuals.push(self.model.mass_constraint(x) / mass);
        }
        residuals
    }

    fn constraint_jacobian(&self, _x: &[f64]) -> Vec<Vec<f64>> {
        let target = self.model.target();
        let mut rows: Vec<Vec<f64>> = vec![self
            .model
            .densities()
            .iter()
            .map(|d| d / target.calories())
            .collect()];
        if let Some(mass) = target.total_mass() {
            rows.push(vec![1.0 / mass; self.model.len()]);
        }
        rows
    }

    fn lower_bounds(&self) -> Vec<f64> {
        vec![0.0; self.model.len()]
    }
}

fn validate_recipe(recipe: &ResolvedRecipe) -> Result<()> {
    if recipe.is_empty() {
        return Err(RecipeError::EmptyRecipe);
    }
    recipe.iter().try_for_each(|l| l.fact.validate())
}

/// Finds ingredient masses that hit the calorie (and optional mass) target
/// while matching the target energy ratio as closely as possible.
///
/// # Arguments
/// * `recipe`: the resolved recipe; its current masses are ignored.
/// * `target`: calories, energy ratio and optional total mass.
/// * `config`: solver limits and the convergence policy.
/// * `progress_updater`: receives a message per solver iteration.
///
/// # Returns
/// One mass per recipe line, in recipe order. Under
/// [`ConvergencePolicy::Strict`] a result that misses the constraints is
/// returned as [`RecipeError::Convergence`] instead.
pub fn optimize_recipe(
    recipe: &ResolvedRecipe,
    target: &OptimizationTarget,
    config: &OptimizerConfig,
    progress_updater: impl Fn(String),
) -> Result<OptimizationResult> {
    validate_recipe(recipe)?;
    config.validate()?;

    let model = RecipeModel::new(recipe, *target);
    let ratio = target.energy_ratio();
    progress_updater(format!(
        "Optimizing {} ingredients for {:.1} kcal, mass {}, P/C/F {:.3}/{:.3}/{:.3}",
        model.len(),
        target.calories(),
        target
            .total_mass()
            .map_or_else(|| "unconstrained".to_string(), |m| format!("{:.1} g", m)),
        ratio.protein,
        ratio.carbohydrate,
        ratio.fat
    ));

    let program = RecipeProgram { model: &model };
    let outcome = minimize(&program, &model.initial_guess(), &config.solver_settings(), |it| {
        progress_updater(format!(
            "Iteration {}: objective {:.6}, violation {:.3e}, stationarity {:.3e}, penalty {:.1e} ({} inner steps)",
            it.iteration,
            it.objective,
            it.constraint_violation,
            it.stationarity,
            it.penalty,
            it.inner_iterations
        ));
    });
    progress_updater(format!(
        "Solver stopped: {:?} after {} outer iterations, violation {:.3e}",
        outcome.status, outcome.outer_iterations, outcome.constraint_violation
    ));

    if outcome.constraint_violation > config.constraint_tolerance
        && config.convergence_policy == ConvergencePolicy::Strict
    {
        return Err(RecipeError::Convergence {
            iterations: outcome.outer_iterations,
            violation: outcome.constraint_violation,
            tolerance: config.constraint_tolerance,
            best_masses: outcome.x,
        });
    }

    Ok(OptimizationResult {
        calorie_error: model.calorie_constraint(&outcome.x),
        mass_error: model.mass_constraint(&outcome.x),
        masses: outcome.x,
        status: outcome.status,
        objective: outcome.objective,
        constraint_violation: outcome.constraint_violation,
        iterations: outcome.outer_iterations,
    })
}

/// Convenience form of [`optimize_recipe`] with default settings that returns
/// only the masses.
pub fn optimize(
    recipe: &ResolvedRecipe,
    target_calories: f64,
    target_energy_ratio: MacroRatio,
    target_total_mass: Option<f64>,
) -> Result<Vec<f64>> {
    let target = OptimizationTarget::new(target_calories, target_energy_ratio, target_total_mass)?;
    optimize_recipe(recipe, &target, &OptimizerConfig::default(), |_| {}).map(|r| r.masses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{IngredientFact, RecipeLine};
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn recipe(facts: Vec<IngredientFact>) -> ResolvedRecipe {
        ResolvedRecipe::from_pairs(
            facts
                .into_iter()
                .map(|f| (RecipeLine::new(f.name.clone(), 100.0), f)),
        )
    }

    fn rice() -> IngredientFact {
        IngredientFact::new("Rice", 100.0, 130.0, 2.7, 28.0, 0.3).unwrap()
    }

    #[test]
    fn test_empty_recipe_fails_fast() {
        let target = OptimizationTarget::new(500.0, MacroRatio::new(1.0, 1.0, 1.0), None).unwrap();
        let calls = RefCell::new(0);
        let result = optimize_recipe(&ResolvedRecipe::default(), &target, &OptimizerConfig::default(), |_| {
            *calls.borrow_mut() += 1
        });
        assert_eq!(result, Err(RecipeError::EmptyRecipe));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn test_invalid_reference_data_rejected() {
        let broken = IngredientFact {
            name: "Broken".to_string(),
            serving_size_g: 100.0,
            calories: 0.0,
            protein_g: 1.0,
            carbohydrate_g: 1.0,
            fat_g: 1.0,
        };
        let result = optimize(&recipe(vec![rice(), broken]), 500.0, MacroRatio::new(1.0, 1.0, 1.0), None);
        assert!(matches!(result, Err(RecipeError::InvalidReferenceData { .. })));
    }

    #[test]
    fn test_single_ingredient_gets_calories_over_density() {
        let masses = optimize(&recipe(vec![rice()]), 650.0, MacroRatio::new(1.0, 1.0, 1.0), None).unwrap();
        assert_eq!(masses.len(), 1);
        assert!((masses[0] - 500.0).abs() < 500.0 * 1e-4, "{:?}", masses);
    }

    #[test]
    fn test_progress_messages_emitted() {
        let target = OptimizationTarget::new(650.0, MacroRatio::new(1.0, 1.0, 1.0), None).unwrap();
        let messages = RefCell::new(Vec::new());
        optimize_recipe(&recipe(vec![rice()]), &target, &OptimizerConfig::default(), |m| {
            messages.borrow_mut().push(m)
        })
        .unwrap();
        let messages = messages.into_inner();
        assert!(messages.len() >= 3);
        assert!(messages[0].starts_with("Optimizing 1 ingredients"));
        assert!(messages.iter().any(|m| m.starts_with("Iteration 1:")));
        assert!(messages.last().unwrap().starts_with("Solver stopped"));
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (MAX_OUTER_ITERATIONS_ENV, "20"),
            (CONSTRAINT_TOLERANCE_ENV, "1e-5"),
            (TIME_LIMIT_MS_ENV, "250"),
            (CONVERGENCE_POLICY_ENV, "Lenient"),
            (OPTIMALITY_TOLERANCE_ENV, " "),
        ]);
        let config = OptimizerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_outer_iterations, 20);
        assert_eq!(config.max_inner_iterations, OptimizerConfig::default().max_inner_iterations);
        assert_eq!(config.constraint_tolerance, 1e-5);
        assert_eq!(config.optimality_tolerance, OptimizerConfig::default().optimality_tolerance);
        assert_eq!(config.time_limit, Some(Duration::from_millis(250)));
        assert_eq!(config.convergence_policy, ConvergencePolicy::Lenient);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let err = OptimizerConfig::from_lookup(|k| {
            (k == MAX_INNER_ITERATIONS_ENV).then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, RecipeError::Config(_)));
        assert!(err.to_string().contains(MAX_INNER_ITERATIONS_ENV));

        let err = OptimizerConfig::from_lookup(|k| {
            (k == CONSTRAINT_TOLERANCE_ENV).then(|| "-1".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, RecipeError::Config(_)));

        assert!(OptimizerConfig::from_lookup(|k| {
            (k == CONVERGENCE_POLICY_ENV).then(|| "sometimes".to_string())
        })
        .is_err());
    }

    #[test]
    fn test_clamped_masses() {
        let result = OptimizationResult {
            masses: vec![-1e-12, 3.0],
            status: SolverStatus::Converged,
            objective: 0.0,
            calorie_error: 0.0,
            mass_error: 0.0,
            constraint_violation: 0.0,
            iterations: 1,
        };
        assert_eq!(result.clamped_masses(), vec![0.0, 3.0]);
    }
}
