pub mod cli;
pub mod error;
pub mod nutritional_matcher;
pub mod optim;
pub mod recipe;
pub mod recipe_aggregator;
pub mod request;

pub use error::RecipeError;
pub use nutritional_matcher::NutritionTable;
pub use recipe::{IngredientFact, RecipeLine, ResolvedLine, ResolvedRecipe};
