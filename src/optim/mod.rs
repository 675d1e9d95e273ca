pub mod macros;
pub mod nutri_eval;
pub mod optimizer;
pub mod solver;
pub mod targets;

pub use macros::{normalize_to_energy_ratio, MacroRatio};
pub use optimizer::{optimize, optimize_recipe, ConvergencePolicy, OptimizationResult, OptimizerConfig};
pub use targets::{MealParams, OptimizationTarget};
