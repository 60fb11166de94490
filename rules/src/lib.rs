pub mod adapters;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod store;

pub use error::RuleError;
pub use evaluator::{evaluate_event, ActionResult, EvaluationResult, RuleResult};
pub use model::{Action, Condition, Logic, NewRule, Rule, RuleDefinition};
pub use store::{MemoryRuleStore, RuleStore};
