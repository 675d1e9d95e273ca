use serde::{Deserialize, Serialize};

use crate::error::{RecipeError, Result};

/// Reference nutrition data for one ingredient, expressed per serving.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IngredientFact {
    pub name: String,
    #[serde(alias = "servsize")]
    pub serving_size_g: f64,
    #[serde(alias = "servcals")]
    pub calories: f64,
    #[serde(alias = "prot")]
    pub protein_g: f64,
    #[serde(alias = "carb")]
    pub carbohydrate_g: f64,
    #[serde(alias = "fat")]
    pub fat_g: f64,
}

impl IngredientFact {
    pub fn new(
        name: impl Into<String>,
        serving_size_g: f64,
        calories: f64,
        protein_g: f64,
        carbohydrate_g: f64,
        fat_g: f64,
    ) -> Result<Self> {
        let fact = Self {
            name: name.into(),
            serving_size_g,
            calories,
            protein_g,
            carbohydrate_g,
            fat_g,
        };
        fact.validate()?;
        Ok(fact)
    }

    /// Calories per gram.
    pub fn density(&self) -> f64 {
        self.calories / self.serving_size_g
    }

    pub fn protein_per_gram(&self) -> f64 {
        self.protein_g / self.serving_size_g
    }

    pub fn carbohydrate_per_gram(&self) -> f64 {
        self.carbohydrate_g / self.serving_size_g
    }

    pub fn fat_per_gram(&self) -> f64 {
        self.fat_g / self.serving_size_g
    }

    /// Checks that the fact can take part in an optimization: a positive serving
    /// size and density, and non-negative macro amounts.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| RecipeError::InvalidReferenceData {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("ingredient name is empty".to_string()));
        }
        if !self.serving_size_g.is_finite() || self.serving_size_g <= 0.0 {
            return Err(invalid(format!(
                "serving size must be positive, got {}",
                self.serving_size_g
            )));
        }
        let density = self.density();
        if !density.is_finite() || density <= 0.0 {
            return Err(invalid(format!("density must be positive, got {}", density)));
        }
        for (label, value) in [
            ("protein", self.protein_g),
            ("carbohydrate", self.carbohydrate_g),
            ("fat", self.fat_g),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{} must be non-negative, got {}", label, value)));
            }
        }
        Ok(())
    }
}

/// An (ingredient, grams) pair as written in a recipe.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecipeLine {
    pub ingredient: String,
    #[serde(default)]
    pub mass: f64,
}

impl RecipeLine {
    pub fn new(ingredient: impl Into<String>, mass: f64) -> Self {
        Self {
            ingredient: ingredient.into(),
            mass,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResolvedLine {
    pub line: RecipeLine,
    pub fact: IngredientFact,
}

/// Recipe lines joined against their nutrition facts, in recipe order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ResolvedRecipe {
    lines: Vec<ResolvedLine>,
}

impl ResolvedRecipe {
    pub fn new(lines: Vec<ResolvedLine>) -> Self {
        Self { lines }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (RecipeLine, IngredientFact)>) -> Self {
        Self {
            lines: pairs
                .into_iter()
                .map(|(line, fact)| ResolvedLine { line, fact })
                .collect(),
        }
    }

    pub fn lines(&self) -> &[ResolvedLine] {
        &self.lines
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn masses(&self) -> Vec<f64> {
        self.lines.iter().map(|l| l.line.mass).collect()
    }

    pub fn recipe_lines(&self) -> Vec<RecipeLine> {
        self.lines.iter().map(|l| l.line.clone()).collect()
    }

    /// Returns a copy of the recipe with every line's mass replaced, in order.
    pub fn with_masses(&self, masses: &[f64]) -> Result<Self> {
        if masses.len() != self.lines.len() {
            return Err(RecipeError::MassCount {
                expected: self.lines.len(),
                actual: masses.len(),
            });
        }

        let mut lines = self.lines.clone();
        for (resolved, &mass) in lines.iter_mut().zip(masses) {
            if !mass.is_finite() || mass < 0.0 {
                return Err(RecipeError::InvalidMass {
                    ingredient: resolved.line.ingredient.clone(),
                    mass,
                });
            }
            resolved.line.mass = mass;
        }
        Ok(Self { lines })
    }
}
