//! Policy evaluation: path matching and the decision engine

pub mod engine;
pub mod path_matcher;

pub use engine::{evaluate_policy, DecisionEngine};
pub use path_matcher::{normalize, path_matches};
