use serde::{Deserialize, Serialize};

use crate::optim::macros::{normalize_to_energy_ratio, MacroRatio};
use crate::recipe::ResolvedRecipe;

/// Absolute nutrition amounts for a recipe (or a 100 g portion of it).
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NutritionalSummary {
    pub mass_g: f64,
    pub kcal: f64,
    pub protein_g: f64,
    pub carbohydrate_g: f64,
    pub fat_g: f64,
    pub macros_g: f64,
}

impl NutritionalSummary {
    fn scaled(&self, factor: f64) -> Self {
        Self {
            mass_g: self.mass_g * factor,
            kcal: self.kcal * factor,
            protein_g: self.protein_g * factor,
            carbohydrate_g: self.carbohydrate_g * factor,
            fat_g: self.fat_g * factor,
            macros_g: self.macros_g * factor,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RecipeStatistics {
    pub totals: NutritionalSummary,
    /// `None` for a recipe with no mass.
    pub per_100g: Option<NutritionalSummary>,
    /// Calorie split between protein, carbs and fat; `None` when the recipe
    /// has no macros.
    pub energy_ratio: Option<MacroRatio>,
}

/// Totals a resolved recipe using the same per-gram formulas as the optimizer.
pub fn calculate_recipe_statistics(recipe: &ResolvedRecipe) -> RecipeStatistics {
    let mut totals = NutritionalSummary::default();
    for resolved in recipe.iter() {
        let mass = resolved.line.mass;
        let fact = &resolved.fact;
        totals.mass_g += mass;
        totals.kcal += mass * fact.density();
        totals.protein_g += mass * fact.protein_per_gram();
        totals.carbohydrate_g += mass * fact.carbohydrate_per_gram();
        totals.fat_g += mass * fact.fat_per_gram();
    }
    totals.macros_g = totals.protein_g + totals.carbohydrate_g + totals.fat_g;

    let energy_ratio = if totals.macros_g > 0.0 {
        normalize_to_energy_ratio(MacroRatio::new(
            totals.protein_g / totals.macros_g,
            totals.carbohydrate_g / totals.macros_g,
            totals.fat_g / totals.macros_g,
        ))
        .ok()
    } else {
        None
    };

    let per_100g = (totals.mass_g > 0.0).then(|| totals.scaled(100.0 / totals.mass_g));

    RecipeStatistics {
        totals,
        per_100g,
        energy_ratio,
    }
}
