use crate::error::Result;
use crate::optim::macros::{normalize_to_energy_ratio, MacroRatio, KCAL_PER_G};
use crate::optim::targets::OptimizationTarget;
use crate::recipe::ResolvedRecipe;

/// Weight of the ratio-fit term relative to the density term.
pub const RATIO_PENALTY_WEIGHT: f64 = 200.0;

/// Objective value returned when the candidate carries no macros at all.
pub const ZERO_MACRO_PENALTY: f64 = 1.0e6;

/// The recipe optimization problem as plain functions of the mass vector.
///
/// Masses are in grams and ordered like the recipe the model was built from.
/// Nothing here knows about the solver.
#[derive(Debug, Clone)]
pub struct RecipeModel {
    densities: Vec<f64>,
    macros_per_gram: Vec<[f64; 3]>,
    target: OptimizationTarget,
}

impl RecipeModel {
    pub fn new(recipe: &ResolvedRecipe, target: OptimizationTarget) -> Self {
        let densities = recipe.iter().map(|l| l.fact.density()).collect();
        let macros_per_gram = recipe
            .iter()
            .map(|l| {
                [
                    l.fact.protein_per_gram(),
                    l.fact.carbohydrate_per_gram(),
                    l.fact.fat_per_gram(),
                ]
            })
            .collect();
        Self {
            densities,
            macros_per_gram,
            target,
        }
    }

    pub fn len(&self) -> usize {
        self.densities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.densities.is_empty()
    }

    pub fn densities(&self) -> &[f64] {
        &self.densities
    }

    pub fn target(&self) -> &OptimizationTarget {
        &self.target
    }

    /// Splits the target calories evenly between ingredients and converts each
    /// share to grams.
    pub fn initial_guess(&self) -> Vec<f64> {
        let share = self.target.calories() / self.len() as f64;
        self.densities.iter().map(|d| share / d).collect()
    }

    pub fn total_mass(&self, masses: &[f64]) -> f64 {
        masses.iter().sum()
    }

    pub fn total_calories(&self, masses: &[f64]) -> f64 {
        masses.iter().zip(&self.densities).map(|(m, d)| m * d).sum()
    }

    /// Grams of protein, carbohydrate and fat supplied by the candidate masses.
    pub fn macro_grams(&self, masses: &[f64]) -> [f64; 3] {
        let mut totals = [0.0; 3];
        for (mass, per_gram) in masses.iter().zip(&self.macros_per_gram) {
            for (total, amount) in totals.iter_mut().zip(per_gram) {
                *total += mass * amount;
            }
        }
        totals
    }

    /// Energy ratio implied by the candidate masses.
    pub fn energy_ratio(&self, masses: &[f64]) -> Result<MacroRatio> {
        let grams = self.macro_grams(masses);
        let total: f64 = grams.iter().sum();
        let mass_ratio = if total > 0.0 {
            MacroRatio::from_array(grams.map(|g| g / total))
        } else {
            MacroRatio::from_array(grams)
        };
        normalize_to_energy_ratio(mass_ratio)
    }

    /// Macro calorie shares of the candidate, or `None` when it carries no
    /// macro energy. Unlike [`RecipeModel::energy_ratio`] this accepts any
    /// masses, so the objective stays smooth wherever the solver evaluates it.
    fn energy_shares(&self, masses: &[f64]) -> Option<([f64; 3], f64)> {
        let grams = self.macro_grams(masses);
        let energy: f64 = grams.iter().zip(KCAL_PER_G).map(|(g, w)| g * w).sum();
        if energy <= 0.0 {
            return None;
        }
        Some((std::array::from_fn(|k| KCAL_PER_G[k] * grams[k] / energy), energy))
    }

    /// Squared distance between the implied and the target energy ratio, or
    /// `None` when the candidate has no macro energy.
    pub fn ratio_penalty(&self, masses: &[f64]) -> Option<f64> {
        self.energy_shares(masses)
            .map(|(actual, _)| MacroRatio::from_array(actual).squared_distance(&self.target.energy_ratio()))
    }

    /// Mass-weighted mean density over total calories. Lower favours mixes of
    /// less calorie-dense ingredients.
    pub fn density_penalty(&self, masses: &[f64]) -> f64 {
        let total_mass = self.total_mass(masses);
        let total_calories = self.total_calories(masses);
        if total_mass <= 0.0 || total_calories <= 0.0 {
            return 0.0;
        }
        let mean_density = total_calories / total_mass;
        mean_density / total_calories
    }

    pub fn objective(&self, masses: &[f64]) -> f64 {
        match self.ratio_penalty(masses) {
            Some(ratio_penalty) => {
                ratio_penalty * RATIO_PENALTY_WEIGHT + self.density_penalty(masses)
            }
            None => ZERO_MACRO_PENALTY,
        }
    }

    /// Analytic gradient of [`RecipeModel::objective`].
    ///
    /// Zero on the no-macro plateau, where the objective is constant.
    pub fn objective_gradient(&self, masses: &[f64]) -> Vec<f64> {
        let mut gradient = vec![0.0; self.len()];
        let Some((actual, energy)) = self.energy_shares(masses) else {
            return gradient;
        };

        let target = self.target.energy_ratio().as_array();
        for (slot, per_gram) in gradient.iter_mut().zip(&self.macros_per_gram) {
            // Macro calories contributed by one gram of this ingredient.
            let ingredient_energy: f64 = per_gram.iter().zip(KCAL_PER_G).map(|(a, w)| a * w).sum();
            let mut d_ratio = 0.0;
            for k in 0..3 {
                let d_actual = (KCAL_PER_G[k] * per_gram[k] - actual[k] * ingredient_energy) / energy;
                d_ratio += 2.0 * (actual[k] - target[k]) * d_actual;
            }
            *slot = RATIO_PENALTY_WEIGHT * d_ratio;
        }

        // The density term reduces to 1 / total mass.
        let total_mass = self.total_mass(masses);
        if total_mass > 0.0 && self.total_calories(masses) > 0.0 {
            let d_density = -1.0 / (total_mass * total_mass);
            for slot in gradient.iter_mut() {
                *slot += d_density;
            }
        }
        gradient
    }

    /// Calories of the candidate minus the target calories.
    pub fn calorie_constraint(&self, masses: &[f64]) -> f64 {
        self.total_calories(masses) - self.target.calories()
    }

    /// Mass of the candidate minus the target mass; always 0 without a mass target.
    pub fn mass_constraint(&self, masses: &[f64]) -> f64 {
        match self.target.total_mass() {
            Some(mass) => self.total_mass(masses) - mass,
            None => 0.0,
        }
    }
}
