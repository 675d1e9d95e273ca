use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RecipeError, Result};
use crate::recipe::{IngredientFact, RecipeLine, ResolvedLine, ResolvedRecipe};

fn lookup_key(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Immutable reference table of nutrition facts, keyed case-insensitively by name.
///
/// Built once and passed by reference into [`NutritionTable::resolve`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<IngredientFact>", into = "Vec<IngredientFact>")]
pub struct NutritionTable {
    facts: Vec<IngredientFact>,
    index: HashMap<String, usize>,
}

impl NutritionTable {
    /// Builds the table, validating every fact and rejecting duplicate names.
    pub fn new(facts: Vec<IngredientFact>) -> Result<Self> {
        let mut index = HashMap::with_capacity(facts.len());
        for (position, fact) in facts.iter().enumerate() {
            fact.validate()?;
            if index.insert(lookup_key(&fact.name), position).is_some() {
                return Err(RecipeError::DuplicateIngredient(fact.name.clone()));
            }
        }
        Ok(Self { facts, index })
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&IngredientFact> {
        self.index.get(&lookup_key(name)).map(|&i| &self.facts[i])
    }

    /// Joins recipe lines against the table.
    ///
    /// Fails on the first line without a match; nothing is returned for a
    /// partially resolved recipe.
    pub fn resolve(&self, lines: &[RecipeLine]) -> Result<ResolvedRecipe> {
        let mut resolved = Vec::with_capacity(lines.len());
        for line in lines {
            if !line.mass.is_finite() || line.mass < 0.0 {
                return Err(RecipeError::InvalidMass {
                    ingredient: line.ingredient.clone(),
                    mass: line.mass,
                });
            }
            let fact = self
                .get(&line.ingredient)
                .ok_or_else(|| RecipeError::Resolution(line.ingredient.clone()))?;
            resolved.push(ResolvedLine {
                line: line.clone(),
                fact: fact.clone(),
            });
        }
        Ok(ResolvedRecipe::new(resolved))
    }
}

impl TryFrom<Vec<IngredientFact>> for NutritionTable {
    type Error = RecipeError;

    fn try_from(facts: Vec<IngredientFact>) -> Result<Self> {
        Self::new(facts)
    }
}

impl From<NutritionTable> for Vec<IngredientFact> {
    fn from(table: NutritionTable) -> Self {
        table.facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> NutritionTable {
        NutritionTable::new(vec![
            IngredientFact::new("Chicken Breast", 100.0, 165.0, 31.0, 0.0, 3.6).unwrap(),
            IngredientFact::new("Potato", 100.0, 77.0, 2.0, 17.0, 0.1).unwrap(),
            IngredientFact::new("Olive Oil", 15.0, 119.0, 0.0, 0.0, 13.5).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = sample_table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("potato").unwrap().name, "Potato");
        assert_eq!(table.get("  OLIVE oil ").unwrap().serving_size_g, 15.0);
        assert!(table.get("butter").is_none());
    }

    #[test]
    fn test_resolve_keeps_recipe_order() {
        let table = sample_table();
        let recipe = table
            .resolve(&[
                RecipeLine::new("olive oil", 10.0),
                RecipeLine::new("CHICKEN BREAST", 200.0),
            ])
            .unwrap();
        assert_eq!(recipe.len(), 2);
        assert_eq!(recipe.lines()[0].fact.name, "Olive Oil");
        assert_eq!(recipe.lines()[1].line.mass, 200.0);
    }

    #[test]
    fn test_resolve_unknown_ingredient_fails() {
        let table = sample_table();
        let err = table
            .resolve(&[RecipeLine::new("potato", 100.0), RecipeLine::new("mayonnaise", 30.0)])
            .unwrap_err();
        assert_eq!(err, RecipeError::Resolution("mayonnaise".to_string()));
    }

    #[test]
    fn test_resolve_rejects_negative_mass() {
        let table = sample_table();
        let err = table.resolve(&[RecipeLine::new("potato", -1.0)]).unwrap_err();
        assert!(matches!(err, RecipeError::InvalidMass { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = NutritionTable::new(vec![
            IngredientFact::new("Egg", 50.0, 72.0, 6.3, 0.4, 4.8).unwrap(),
            IngredientFact::new("EGG", 50.0, 72.0, 6.3, 0.4, 4.8).unwrap(),
        ])
        .unwrap_err();
        assert_eq!(err, RecipeError::DuplicateIngredient("EGG".to_string()));
    }

    #[test]
    fn test_invalid_fact_rejected_on_build() {
        let bad = IngredientFact {
            name: "Ghost".to_string(),
            serving_size_g: 100.0,
            calories: -5.0,
            protein_g: 0.0,
            carbohydrate_g: 0.0,
            fat_g: 0.0,
        };
        assert!(matches!(
            NutritionTable::new(vec![bad]),
            Err(RecipeError::InvalidReferenceData { .. })
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"[{"name":"Rice","serving_size_g":100,"calories":130,"protein_g":2.7,"carbohydrate_g":28,"fat_g":0.3},
                       {"name":"rice","serving_size_g":100,"calories":130,"protein_g":2.7,"carbohydrate_g":28,"fat_g":0.3}]"#;
        assert!(serde_json::from_str::<NutritionTable>(json).is_err());
    }
}
