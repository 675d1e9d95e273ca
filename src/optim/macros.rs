use serde::{Deserialize, Serialize};

use crate::error::{RecipeError, Result};

/// Atwater factors, kcal per gram.
pub const PROTEIN_KCAL_PER_G: f64 = 4.0;
pub const CARBOHYDRATE_KCAL_PER_G: f64 = 4.0;
pub const FAT_KCAL_PER_G: f64 = 9.0;

pub const KCAL_PER_G: [f64; 3] = [PROTEIN_KCAL_PER_G, CARBOHYDRATE_KCAL_PER_G, FAT_KCAL_PER_G];

/// A (protein, carbohydrate, fat) split.
///
/// The same type carries both mass ratios (fractions of macro grams) and energy
/// ratios (fractions of macro calories); which one a value holds is up to the
/// function that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroRatio {
    pub protein: f64,
    pub carbohydrate: f64,
    pub fat: f64,
}

impl MacroRatio {
    pub fn new(protein: f64, carbohydrate: f64, fat: f64) -> Self {
        Self {
            protein,
            carbohydrate,
            fat,
        }
    }

    pub fn from_array([protein, carbohydrate, fat]: [f64; 3]) -> Self {
        Self::new(protein, carbohydrate, fat)
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.protein, self.carbohydrate, self.fat]
    }

    pub fn sum(&self) -> f64 {
        self.protein + self.carbohydrate + self.fat
    }

    /// Scales the ratio so its components sum to 1.
    pub fn normalized(&self) -> Result<Self> {
        check_components(self)?;
        let total = self.sum();
        if total <= 0.0 {
            return Err(RecipeError::DegenerateRatio);
        }
        Ok(Self::from_array(self.as_array().map(|v| v / total)))
    }

    /// Sum of squared component-wise differences.
    pub fn squared_distance(&self, other: &Self) -> f64 {
        self.as_array()
            .iter()
            .zip(other.as_array())
            .map(|(a, b)| (a - b).powi(2))
            .sum()
    }
}

fn check_components(ratio: &MacroRatio) -> Result<()> {
    if ratio.as_array().iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(RecipeError::InvalidTarget(format!(
            "macro ratio components must be finite and non-negative, got ({}, {}, {})",
            ratio.protein, ratio.carbohydrate, ratio.fat
        )));
    }
    Ok(())
}

/// Converts a macro mass ratio into the normalized energy ratio.
///
/// Each component is weighted by its kcal-per-gram factor (4/4/9) and the
/// weighted values are divided by their sum. Fails with
/// [`RecipeError::DegenerateRatio`] when every component is zero.
pub fn normalize_to_energy_ratio(mass_ratio: MacroRatio) -> Result<MacroRatio> {
    check_components(&mass_ratio)?;
    let mut weighted = mass_ratio.as_array();
    for (value, factor) in weighted.iter_mut().zip(KCAL_PER_G) {
        *value *= factor;
    }
    let total: f64 = weighted.iter().sum();
    if total <= 0.0 {
        return Err(RecipeError::DegenerateRatio);
    }
    Ok(MacroRatio::from_array(weighted.map(|v| v / total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_equal_mass_split() {
        let energy = normalize_to_energy_ratio(MacroRatio::new(1.0, 1.0, 1.0)).unwrap();
        assert!((energy.protein - 4.0 / 17.0).abs() < 1e-12);
        assert!((energy.carbohydrate - 4.0 / 17.0).abs() < 1e-12);
        assert!((energy.fat - 9.0 / 17.0).abs() < 1e-12);
    }

    #[test]
    fn test_scale_invariant() {
        let a = normalize_to_energy_ratio(MacroRatio::new(0.2, 0.5, 0.3)).unwrap();
        let b = normalize_to_energy_ratio(MacroRatio::new(20.0, 50.0, 30.0)).unwrap();
        assert!(a.squared_distance(&b) < 1e-24);
    }

    #[test]
    fn test_pure_fat_stays_pure() {
        let energy = normalize_to_energy_ratio(MacroRatio::new(0.0, 0.0, 3.0)).unwrap();
        assert_eq!(energy, MacroRatio::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_all_zero_is_degenerate() {
        assert_eq!(
            normalize_to_energy_ratio(MacroRatio::new(0.0, 0.0, 0.0)),
            Err(RecipeError::DegenerateRatio)
        );
    }

    #[test]
    fn test_negative_component_rejected() {
        assert!(matches!(
            normalize_to_energy_ratio(MacroRatio::new(0.5, -0.1, 0.6)),
            Err(RecipeError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_random_ratios_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..500 {
            let ratio = MacroRatio::new(
                rng.gen_range(0.0..10.0),
                rng.gen_range(0.0..10.0),
                rng.gen_range(0.0..10.0),
            );
            let energy = normalize_to_energy_ratio(ratio).unwrap();
            assert!((energy.sum() - 1.0).abs() < 1e-12);
            assert!(energy.as_array().iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn test_normalized() {
        let ratio = MacroRatio::new(40.0, 40.0, 20.0).normalized().unwrap();
        assert!((ratio.protein - 0.4).abs() < 1e-12);
        assert!((ratio.fat - 0.2).abs() < 1e-12);
        assert!(MacroRatio::new(0.0, 0.0, 0.0).normalized().is_err());
    }
}
