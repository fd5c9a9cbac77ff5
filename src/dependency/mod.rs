pub mod date;
pub mod evaluator;
pub mod relation;

pub use evaluator::{DependencyEvaluator, DependentExecute};
