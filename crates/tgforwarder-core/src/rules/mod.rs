pub mod conditions;
pub mod repositories;
pub mod selector;
pub mod types;

pub use conditions::{
    EvaluationContext, FilterError, FilterSpec, GroupOperator, LegacyFilter, LogicNode,
    MAX_FILTER_DEPTH, Predicate, evaluate, evaluate_condition, evaluate_node,
};
pub use repositories::{RuleError, RuleRepository};
pub use selector::{RuleSelector, RuleStore, SelectorError};
pub use types::{AiConfig, DeliveryMethod, NewRule, Rule, RuleValidationError};
