use serde::{Deserialize, Serialize};

use crate::error::{RecipeError, Result};
use crate::optim::macros::MacroRatio;

/// What the optimizer aims for. Always holds a normalized energy ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OptimizationTarget {
    calories: f64,
    energy_ratio: MacroRatio,
    total_mass: Option<f64>,
}

impl OptimizationTarget {
    /// Validates the targets and normalizes the energy ratio.
    ///
    /// # Arguments
    /// * `calories`: total calories of the recipe, must be positive.
    /// * `energy_ratio`: desired calorie split between protein, carbs and fat. Need not sum to 1.
    /// * `total_mass`: total grams of the recipe; `None` leaves the mass unconstrained.
    pub fn new(calories: f64, energy_ratio: MacroRatio, total_mass: Option<f64>) -> Result<Self> {
        if !calories.is_finite() || calories <= 0.0 {
            return Err(RecipeError::InvalidTarget(format!(
                "target calories must be positive, got {}",
                calories
            )));
        }
        if let Some(mass) = total_mass {
            if !mass.is_finite() || mass <= 0.0 {
                return Err(RecipeError::InvalidTarget(format!(
                    "target mass must be positive, got {}",
                    mass
                )));
            }
        }
        let energy_ratio = energy_ratio.normalized().map_err(|e| match e {
            RecipeError::DegenerateRatio => {
                RecipeError::InvalidTarget("target ratio components are all zero".to_string())
            }
            other => other,
        })?;

        Ok(Self {
            calories,
            energy_ratio,
            total_mass,
        })
    }

    pub fn calories(&self) -> f64 {
        self.calories
    }

    pub fn energy_ratio(&self) -> MacroRatio {
        self.energy_ratio
    }

    pub fn total_mass(&self) -> Option<f64> {
        self.total_mass
    }
}

/// Meal parameters as written in a parameter document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealParams {
    pub total_calories: f64,
    pub ratio_calories_from_protein: f64,
    pub ratio_calories_from_carbs: f64,
    pub ratio_calories_from_fat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_size_in_grams: Option<f64>,
}

impl MealParams {
    pub fn to_target(&self) -> Result<OptimizationTarget> {
        OptimizationTarget::new(
            self.total_calories,
            MacroRatio::new(
                self.ratio_calories_from_protein,
                self.ratio_calories_from_carbs,
                self.ratio_calories_from_fat,
            ),
            self.meal_size_in_grams,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_normalizes_ratio() {
        let target = OptimizationTarget::new(500.0, MacroRatio::new(2.0, 2.0, 1.0), Some(450.0)).unwrap();
        let ratio = target.energy_ratio();
        assert!((ratio.protein - 0.4).abs() < 1e-12);
        assert!((ratio.carbohydrate - 0.4).abs() < 1e-12);
        assert!((ratio.fat - 0.2).abs() < 1e-12);
        assert_eq!(target.total_mass(), Some(450.0));
    }

    #[test]
    fn test_invalid_calories() {
        for calories in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            let result = OptimizationTarget::new(calories, MacroRatio::new(1.0, 1.0, 1.0), None);
            assert!(matches!(result, Err(RecipeError::InvalidTarget(_))), "{}", calories);
        }
    }

    #[test]
    fn test_invalid_mass() {
        let result = OptimizationTarget::new(500.0, MacroRatio::new(1.0, 1.0, 1.0), Some(0.0));
        assert!(matches!(result, Err(RecipeError::InvalidTarget(_))));
    }

    #[test]
    fn test_zero_ratio_is_invalid_target() {
        let err = OptimizationTarget::new(500.0, MacroRatio::new(0.0, 0.0, 0.0), None).unwrap_err();
        assert!(matches!(err, RecipeError::InvalidTarget(_)));
        assert!(err.to_string().contains("all zero"));
    }

    #[test]
    fn test_negative_ratio_is_invalid_target() {
        let result = OptimizationTarget::new(500.0, MacroRatio::new(0.5, 0.7, -0.2), None);
        assert!(matches!(result, Err(RecipeError::InvalidTarget(_))));
    }

    #[test]
    fn test_meal_params_from_json() {
        let json = r#"{
            "total_calories": 500,
            "ratio_calories_from_protein": 0.4,
            "ratio_calories_from_carbs": 0.4,
            "ratio_calories_from_fat": 0.2,
            "meal_size_in_grams": 450
        }"#;
        let params: MealParams = serde_json::from_str(json).unwrap();
        let target = params.to_target().unwrap();
        assert_eq!(target.calories(), 500.0);
        assert_eq!(target.total_mass(), Some(450.0));
    }

    #[test]
    fn test_meal_params_without_size() {
        let json = r#"{"total_calories": 300, "ratio_calories_from_protein": 1,
                       "ratio_calories_from_carbs": 1, "ratio_calories_from_fat": 1}"#;
        let params: MealParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.meal_size_in_grams, None);
        assert_eq!(params.to_target().unwrap().total_mass(), None);
    }
}
