use thiserror::Error;

/// Errors raised while resolving a recipe or optimizing its masses.
///
/// Everything except `Convergence` is a precondition failure and is raised
/// before the solver runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecipeError {
    #[error("ingredient '{0}' has no matching entry in the nutrition table")]
    Resolution(String),

    #[error("invalid optimization target: {0}")]
    InvalidTarget(String),

    #[error("invalid reference data for '{name}': {reason}")]
    InvalidReferenceData { name: String, reason: String },

    #[error("recipe has no ingredients")]
    EmptyRecipe,

    #[error("invalid mass {mass} for ingredient '{ingredient}'")]
    InvalidMass { ingredient: String, mass: f64 },

    #[error("expected {expected} masses, one per recipe line, got {actual}")]
    MassCount { expected: usize, actual: usize },

    #[error("duplicate ingredient '{0}' in nutrition table")]
    DuplicateIngredient(String),

    #[error("macro ratio is undefined when every weighted component is zero")]
    DegenerateRatio,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(
        "solver stopped after {iterations} iterations with constraint violation {violation:e} (tolerance {tolerance:e})"
    )]
    Convergence {
        iterations: usize,
        violation: f64,
        tolerance: f64,
        best_masses: Vec<f64>,
    },
}

pub type Result<T> = std::result::Result<T, RecipeError>;
